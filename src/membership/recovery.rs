//! Master recovery hand-off
//!
//! When a server is forced out of the cluster the membership service hands
//! a pre-crash snapshot of its entry to the recovery subsystem, which
//! decides whether a master recovery must run. The subsystem is external;
//! only the seam is defined here.

use crate::membership::entry::Entry;

pub trait RecoveryManager: Send + Sync {
    fn start_master_recovery(&self, entry: &Entry);
}

/// Recovery hook that only logs, for deployments and tests that run the
/// membership service without a recovery subsystem.
pub struct NoopRecovery;

impl RecoveryManager for NoopRecovery {
    fn start_master_recovery(&self, entry: &Entry) {
        tracing::debug!(server_id = %entry.server_id, "no recovery manager attached; skipping master recovery");
    }
}
