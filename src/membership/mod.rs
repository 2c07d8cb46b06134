//! Cluster membership service
//!
//! The coordinator is the authority on which servers belong to the cluster.
//! This module maintains that list, assigns `(index, generation)` server
//! ids, verifies and records failures, forms replication groups of backups,
//! journals every mutation to an external consensus log so a coordinator
//! crash loses nothing, and pushes a monotonically versioned view of the
//! list to every membership-capable server.

pub mod entry;
pub mod id;
pub mod journal;
pub mod list;
mod ops;
pub mod recovery;
mod store;
pub mod tracker;
pub mod transport;
mod updater;
pub mod wire;

pub use entry::{Entry, MasterRecoveryInfo};
pub use id::{ServerId, ServerStatus, ServiceMask};
pub use journal::{ConsensusLog, EntryId, InMemoryLog, JournalRecord};
pub use list::{ServerList, REPLICATION_GROUP_SIZE};
pub use recovery::{NoopRecovery, RecoveryManager};
pub use tracker::{ServerChange, ServerTracker};
pub use transport::{HttpTransport, UpdateRpc, UpdateTransport};
pub use wire::{ServerListEntry, ServerListUpdate, UpdateKind};

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for the membership unit tests.

    use super::*;
    use crate::common::config::CoordinatorConfig;
    use crate::Result;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Transport whose RPCs complete instantly, recording every update
    /// delivered per follower. Pings answer according to `pingable`.
    pub(crate) struct MockTransport {
        pub(crate) deliveries: Mutex<HashMap<ServerId, Vec<ServerListUpdate>>>,
        pub(crate) pingable: AtomicBool,
        /// When set, RPCs never complete (for timeout tests).
        pub(crate) hang: AtomicBool,
    }

    impl MockTransport {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(MockTransport {
                deliveries: Mutex::new(HashMap::new()),
                pingable: AtomicBool::new(true),
                hang: AtomicBool::new(false),
            })
        }

        pub(crate) fn delivered_to(&self, id: ServerId) -> Vec<ServerListUpdate> {
            self.deliveries
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .unwrap_or_default()
        }

        pub(crate) fn send_count(&self, id: ServerId) -> usize {
            self.delivered_to(id).len()
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
            Box::new(MockRpc {
                outcome: Some(Ok(())),
                hang: self.hang.load(Ordering::Relaxed),
            })
        }

        fn ping(&self, _target: ServerId, _locator: &str, _deadline: Duration) -> bool {
            self.pingable.load(Ordering::Relaxed)
        }
    }

    pub(crate) struct MockRpc {
        outcome: Option<Result<()>>,
        hang: bool,
    }

    impl UpdateRpc for MockRpc {
        fn is_ready(&mut self) -> bool {
            !self.hang
        }

        fn wait(&mut self) -> Result<()> {
            self.outcome
                .take()
                .unwrap_or_else(|| Err(crate::Error::Transport("rpc consumed twice".to_string())))
        }

        fn cancel(&mut self) {
            self.outcome = None;
        }
    }

    pub(crate) fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            rpc_timeout_ms: 0,
            ping_timeout_ms: 10,
            ..CoordinatorConfig::default()
        }
    }

    /// A list wired to an in-memory journal and an instant mock transport.
    pub(crate) fn test_list() -> (ServerList, Arc<MockTransport>, Arc<InMemoryLog>) {
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
}
