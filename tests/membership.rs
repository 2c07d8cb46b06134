//! End-to-end membership scenarios

mod common;

use common::{new_cluster, replay};
use memgrid::membership::{ConsensusLog, ServerStatus, ServiceMask, UpdateKind};
use memgrid::{Error, ServerId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

#[test]
fn test_backup_cluster_bootstrap() {
    let (list, transport, _journal) = new_cluster();

    let mut ids = Vec::new();
    for (i, speed) in [100, 200, 300].iter().enumerate() {
        let id = list
            .enlist_server(
                None,
                ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
                *speed,
                &format!("http://backup-{}:6000", i),
            )
            .unwrap();
        ids.push(id);
    }

    assert_eq!(list.master_count(), 0);
    assert_eq!(list.backup_count(), 3);
    for id in &ids {
        assert_eq!(list.get(*id).unwrap().replication_id, 1);
    }

    list.sync();

    // Every membership-capable follower was brought up from a full list.
    for id in &ids {
        let delivered = transport.delivered_to(*id);
        assert!(!delivered.is_empty());
        assert_eq!(delivered[0].kind, UpdateKind::FullList);
        assert_eq!(list.get(*id).unwrap().server_list_version, list.version());
        assert_eq!(list.get(*id).unwrap().is_being_updated, 0);
    }
}

#[test]
fn test_follower_replay_matches_coordinator_state() {
    let (list, transport, _journal) = new_cluster();

    let follower = list
        .enlist_server(
            None,
            ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
            100,
            "http://backup-0:6000",
        )
        .unwrap();

    let master = list
        .enlist_server(None, ServiceMask::MASTER, 0, "http://master-0:6000")
        .unwrap();
    for i in 1..3 {
        list.enlist_server(
            None,
            ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
            100 * i,
            &format!("http://backup-{}:6000", i),
        )
        .unwrap();
    }
    list.set_force_down_for_testing(true);
    list.hint_server_down(master).unwrap();
    list.sync();

    let replayed = replay(&transport.delivered_to(follower));
    let snapshot: BTreeMap<u32, _> = list
        .serialize(ServiceMask::MASTER | ServiceMask::BACKUP)
        .servers
        .into_iter()
        .map(|server| (server.server_id.index(), server))
        .collect();

    assert_eq!(replayed, snapshot);
    // The crashed master is still visible to members, just not up.
    assert_eq!(
        replayed.get(&master.index()).unwrap().status,
        ServerStatus::Crashed
    );
}

#[test]
fn test_reenlistment_replaces_old_incarnation() {
    let (list, transport, _journal) = new_cluster();

    let observer = list
        .enlist_server(
            None,
            ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
            100,
            "http://backup-0:6000",
        )
        .unwrap();
    let old = list
        .enlist_server(
            None,
            ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
            200,
            "http://backup-1:6000",
        )
        .unwrap();
    list.sync();

    let new = list
        .enlist_server(
            Some(old),
            ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
            200,
            "http://backup-1:6000",
        )
        .unwrap();
    assert_eq!(new, ServerId::new(old.index(), old.generation() + 1));
    list.sync();

    // Members apply the removal of the old incarnation before the addition
    // of the new one, within a single versioned update.
    let delivered = transport.delivered_to(observer);
    let replacement = delivered
        .iter()
        .find(|update| update.servers.iter().any(|s| s.server_id == new))
        .unwrap();
    let down_pos = replacement
        .servers
        .iter()
        .position(|s| s.server_id == old && s.status == ServerStatus::Down)
        .unwrap();
    let up_pos = replacement
        .servers
        .iter()
        .position(|s| s.server_id == new && s.status == ServerStatus::Up)
        .unwrap();
    assert!(down_pos < up_pos);

    let replayed = replay(&delivered);
    assert_eq!(
        replayed.get(&new.index()).unwrap().server_id,
        new,
        "follower must end up with the new incarnation"
    );
}

#[test]
fn test_crashed_master_awaits_recovery() {
    let (list, _transport, journal) = new_cluster();
    list.set_force_down_for_testing(true);

    let master = list
        .enlist_server(
            None,
            ServiceMask::MASTER | ServiceMask::MEMBERSHIP,
            0,
            "http://master-0:6000",
        )
        .unwrap();
    assert!(list.hint_server_down(master).unwrap());

    // Masters stay crashed until their recovery completes; only then does
    // an external remove() clear the slot.
    assert_eq!(list.get(master).unwrap().status, ServerStatus::Crashed);
    assert_eq!(list.master_count(), 0);

    list.remove(master).unwrap();
    assert!(matches!(list.get(master), Err(Error::UnknownServer(_))));
    assert!(journal.entries().unwrap().is_empty());
}

#[test]
fn test_membership_churn_converges() {
    let (list, transport, _journal) = new_cluster();
    let mut rng = rand::thread_rng();

    let observer = list
        .enlist_server(
            None,
            ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
            100,
            "http://backup-observer:6000",
        )
        .unwrap();

    let mut live: Vec<ServerId> = Vec::new();
    for round in 0..40 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let services = if rng.gen_bool(0.5) {
                ServiceMask::MASTER
            } else {
                ServiceMask::BACKUP
            };
            let id = list
                .enlist_server(
                    None,
                    services,
                    rng.gen_range(50..500),
                    &format!("http://server-{}:6000", round),
                )
                .unwrap();
            live.push(id);
        } else {
            let victim = *live.choose(&mut rng).unwrap();
            live.retain(|id| *id != victim);
            list.crashed(victim).unwrap();
            list.remove(victim).unwrap();
        }
    }
    list.sync();

    let replayed = replay(&transport.delivered_to(observer));
    let snapshot: BTreeMap<u32, _> = list
        .serialize(ServiceMask::MASTER | ServiceMask::BACKUP)
        .servers
        .into_iter()
        .map(|server| (server.server_id.index(), server))
        .collect();
    assert_eq!(replayed, snapshot);
}
