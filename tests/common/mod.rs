//! Shared fixtures for memgrid integration tests
#![allow(dead_code)]

use memgrid::common::CoordinatorConfig;
use memgrid::membership::{
    InMemoryLog, NoopRecovery, ServerId, ServerList, ServerListUpdate, ServerStatus, UpdateKind,
    UpdateRpc, UpdateTransport,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport whose RPCs complete instantly, recording every update
/// delivered per follower.
pub struct MockTransport {
    deliveries: Mutex<HashMap<ServerId, Vec<ServerListUpdate>>>,
    pub pingable: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(MockTransport {
            deliveries: Mutex::new(HashMap::new()),
            pingable: AtomicBool::new(true),
        })
    }

    pub fn delivered_to(&self, id: ServerId) -> Vec<ServerListUpdate> {
        self.deliveries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

impl UpdateTransport for MockTransport {
    fn send_update(
        &self,
        target: ServerId,
        _locator: &str,
        update: &ServerListUpdate,
    ) -> Box<dyn UpdateRpc> {
        self.deliveries
            .lock()
            .unwrap()
            .entry(target)
            .or_default()
            .push(update.clone());
        Box::new(InstantRpc { consumed: false })
    }

    fn ping(&self, _target: ServerId, _locator: &str, _deadline: Duration) -> bool {
        self.pingable.load(Ordering::Relaxed)
    }
}

struct InstantRpc {
    consumed: bool,
}

impl UpdateRpc for InstantRpc {
    fn is_ready(&mut self) -> bool {
        true
    }

    fn wait(&mut self) -> memgrid::Result<()> {
        self.consumed = true;
        Ok(())
    }

    fn cancel(&mut self) {}
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        ping_timeout_ms: 10,
        ..CoordinatorConfig::default()
    }
}

pub fn new_cluster() -> (ServerList, Arc<MockTransport>, Arc<InMemoryLog>) {
    let journal = Arc::new(InMemoryLog::new());
    let transport = MockTransport::new();
    let list = ServerList::new(
        &test_config(),
        journal.clone(),
        transport.clone(),
        Arc::new(NoopRecovery),
    );
    (list, transport, journal)
}

/// Replay a follower's received updates the way a member would: full lists
/// replace everything, deltas upsert entries and drop the removed ones.
/// Returns the surviving entries keyed by slot index.
pub fn replay(updates: &[ServerListUpdate]) -> BTreeMap<u32, memgrid::membership::ServerListEntry> {
    let mut members = BTreeMap::new();
    for update in updates {
        if update.kind == UpdateKind::FullList {
            members.clear();
        }
        for server in &update.servers {
            if server.status == ServerStatus::Down {
                members.remove(&server.server_id.index());
            } else {
                members.insert(server.server_id.index(), server.clone());
            }
        }
    }
    members
}
