//! Coordinator crash-recovery scenarios
//!
//! Each test journals some membership operations, "crashes" the coordinator
//! by dropping its server list, and brings up a fresh one over the same
//! consensus log.

mod common;

use common::{new_cluster, test_config, MockTransport};
use memgrid::membership::{
    InMemoryLog, JournalRecord, MasterRecoveryInfo, NoopRecovery, ServerList, ServerStatus,
    ServiceMask,
};
use memgrid::{Error, ServerId};
use std::sync::Arc;

fn recovered_list(journal: Arc<InMemoryLog>) -> ServerList {
    let list = ServerList::new(
        &test_config(),
        journal,
        MockTransport::new(),
        Arc::new(NoopRecovery),
    );
    list.recover().unwrap();
    list
}

#[test]
fn test_recover_interrupted_enlistment() {
    // Simulate a crash after journaling ServerEnlisting but before
    // ServerEnlisted: only the provisional record exists.
    let journal = Arc::new(InMemoryLog::new());
    let provisional = JournalRecord::ServerEnlisting {
        server_id: ServerId::new(1, 0),
        service_mask: ServiceMask::MASTER,
        read_speed: 0,
        service_locator: "http://master-0:6000".to_string(),
    };
    use memgrid::membership::ConsensusLog;
    journal.append(&provisional.encode().unwrap(), &[]).unwrap();

    let list = recovered_list(journal.clone());

    // The slot was re-created at the original id, not a fresh one.
    let entry = list.get(ServerId::new(1, 0)).unwrap();
    assert_eq!(entry.status, ServerStatus::Up);
    assert_eq!(entry.service_locator, "http://master-0:6000");
    assert_eq!(list.master_count(), 1);

    // The enlistment was sealed: exactly one live record, the
    // ServerEnlisted that superseded the provisional one.
    let live: Vec<JournalRecord> = journal
        .entries()
        .unwrap()
        .iter()
        .map(|(_, payload)| JournalRecord::decode(payload).unwrap())
        .collect();
    assert_eq!(live.len(), 1);
    assert!(matches!(live[0], JournalRecord::ServerEnlisted { .. }));

    // A later enlistment at the same index must not collide.
    list.remove(ServerId::new(1, 0)).unwrap();
    let reused = list
        .enlist_server(None, ServiceMask::MASTER, 0, "http://master-1:6000")
        .unwrap();
    assert_eq!(reused, ServerId::new(1, 1));
}

#[test]
fn test_recover_completed_enlistments() {
    let (list, _transport, journal) = new_cluster();
    let master = list
        .enlist_server(None, ServiceMask::MASTER, 0, "http://master-0:6000")
        .unwrap();
    let backup = list
        .enlist_server(None, ServiceMask::BACKUP, 250, "http://backup-0:6000")
        .unwrap();
    drop(list);

    let recovered = recovered_list(journal);

    let master_entry = recovered.get(master).unwrap();
    assert_eq!(master_entry.service_locator, "http://master-0:6000");
    let backup_entry = recovered.get(backup).unwrap();
    assert_eq!(backup_entry.expected_read_mbytes_per_sec, 250);
    assert_eq!(recovered.master_count(), 1);
    assert_eq!(recovered.backup_count(), 1);
}

#[test]
fn test_recover_master_recovery_info() {
    let (list, _transport, journal) = new_cluster();
    let master = list
        .enlist_server(None, ServiceMask::MASTER, 0, "http://master-0:6000")
        .unwrap();
    list.set_master_recovery_info(master, MasterRecoveryInfo::new(vec![7, 7]))
        .unwrap();
    drop(list);

    let recovered = recovered_list(journal);
    assert_eq!(
        recovered.get(master).unwrap().master_recovery_info,
        MasterRecoveryInfo::new(vec![7, 7])
    );
}

#[test]
fn test_recover_interrupted_force_down() {
    // Crash after journaling ForceServerDown but before applying it.
    let (list, _transport, journal) = new_cluster();
    let backup = list
        .enlist_server(None, ServiceMask::BACKUP, 100, "http://backup-0:6000")
        .unwrap();
    drop(list);

    use memgrid::membership::ConsensusLog;
    let record = JournalRecord::ForceServerDown { server_id: backup };
    journal.append(&record.encode().unwrap(), &[]).unwrap();

    let recovered = recovered_list(journal.clone());

    // A backup with no master service is removed outright, and every
    // journal record about it is superseded.
    assert!(matches!(
        recovered.get(backup),
        Err(Error::UnknownServer(_))
    ));
    assert_eq!(recovered.backup_count(), 0);
    assert!(journal.entries().unwrap().is_empty());
}
