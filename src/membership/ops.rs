//! Two-phase journaled mutations
//!
//! Each operation here runs in two phases. `execute` appends the
//! operation's state to the consensus log and then calls `complete`, which
//! applies the effect in memory and invalidates superseded log entries.
//! During coordinator recovery only `complete` is replayed, fed the
//! surviving record's entry id, so `complete` must never assume `execute`
//! ran in this process.
//!
//! All methods require the membership lock; callers pass the guarded state
//! explicitly.

use crate::membership::id::{ServerId, ServiceMask};
use crate::membership::journal::{EntryId, JournalRecord};
use crate::membership::list::Shared;
use crate::membership::store::ListState;
use crate::membership::MasterRecoveryInfo;
use crate::{Error, Result};

/// Enlists a server: allocates its id, journals the provisional
/// `ServerEnlisting` record, installs the entry, and seals the enlistment
/// with a `ServerEnlisted` record superseding the provisional one.
pub(crate) struct EnlistServer<'a> {
    shared: &'a Shared,
    server_id: Option<ServerId>,
    services: ServiceMask,
    read_speed: u32,
    service_locator: String,
}

impl<'a> EnlistServer<'a> {
    pub(crate) fn new(
        shared: &'a Shared,
        services: ServiceMask,
        read_speed: u32,
        service_locator: &str,
    ) -> Self {
        EnlistServer {
            shared,
            server_id: None,
            services,
            read_speed,
            service_locator: service_locator.to_string(),
        }
    }

    /// Recovery constructor: the id was already allocated by the previous
    /// coordinator and comes from the journaled record.
    pub(crate) fn at(
        shared: &'a Shared,
        server_id: ServerId,
        services: ServiceMask,
        read_speed: u32,
        service_locator: String,
    ) -> Self {
        EnlistServer {
            shared,
            server_id: Some(server_id),
            services,
            read_speed,
            service_locator,
        }
    }

    pub(crate) fn execute(mut self, state: &mut ListState) -> Result<ServerId> {
        let id = state.generate_unique_id();
        self.server_id = Some(id);

        let record = JournalRecord::ServerEnlisting {
            server_id: id,
            service_mask: self.services,
            read_speed: self.read_speed,
            service_locator: self.service_locator.clone(),
        };
        let entry_id = self.shared.journal.append(&record.encode()?, &[])?;
        state.get_mut(id)?.server_info_log_id = entry_id;
        tracing::debug!(entry_id, server_id = %id, "journaled ServerEnlisting");

        self.complete(state, entry_id)
    }

    pub(crate) fn complete(self, state: &mut ListState, entry_id: EntryId) -> Result<ServerId> {
        let id = self
            .server_id
            .ok_or_else(|| Error::Internal("enlist operation has no server id".to_string()))?;

        self.shared
            .add_locked(state, id, &self.service_locator, self.services, self.read_speed);

        tracing::info!(
            server_id = %id,
            locator = %self.service_locator,
            services = %self.services,
            "enlisting new server"
        );

        if self.services.has(ServiceMask::BACKUP) {
            tracing::debug!(
                server_id = %id,
                read_mbytes_per_sec = self.read_speed,
                "enlisted backup read speed"
            );
            self.shared.create_replication_group(state);
        }

        let record = JournalRecord::ServerEnlisted {
            server_id: id,
            service_mask: self.services,
            read_speed: self.read_speed,
            service_locator: self.service_locator.clone(),
        };
        let sealed_id = self.shared.journal.append(&record.encode()?, &[entry_id])?;
        state.get_mut(id)?.server_info_log_id = sealed_id;
        tracing::debug!(entry_id = sealed_id, server_id = %id, "journaled ServerEnlisted");

        Ok(id)
    }
}

/// Forces a server out of the cluster: journals the intent, marks the
/// entry crashed (removing it outright if no master recovery will run),
/// hands the pre-crash snapshot to the recovery subsystem, reshuffles the
/// replication group, and invalidates the server's journal records.
pub(crate) struct ForceServerDown<'a> {
    shared: &'a Shared,
    server_id: ServerId,
}

impl<'a> ForceServerDown<'a> {
    pub(crate) fn new(shared: &'a Shared, server_id: ServerId) -> Self {
        ForceServerDown { shared, server_id }
    }

    pub(crate) fn execute(self, state: &mut ListState) -> Result<()> {
        let record = JournalRecord::ForceServerDown {
            server_id: self.server_id,
        };
        let entry_id = self.shared.journal.append(&record.encode()?, &[])?;
        tracing::debug!(entry_id, server_id = %self.server_id, "journaled ForceServerDown");

        self.complete(state, entry_id)
    }

    pub(crate) fn complete(self, state: &mut ListState, entry_id: EntryId) -> Result<()> {
        let id = self.server_id;

        // Read the journal references and snapshot the entry before it is
        // mutated; the snapshot is what the recovery subsystem sees.
        let snapshot = state.get(id)?.clone();
        let info_log_id = snapshot.server_info_log_id;
        let update_log_id = snapshot.server_update_log_id;

        self.shared.crashed_locked(state, id)?;

        // Without a master service there is no recovery to finish later, so
        // the entry must leave the list immediately; recoveries normally do
        // this when they complete.
        if !snapshot.services.has(ServiceMask::MASTER) {
            self.shared.remove_locked(state, id)?;
        }

        self.shared.recovery.start_master_recovery(&snapshot);

        self.shared
            .remove_replication_group(state, snapshot.replication_id);
        self.shared.create_replication_group(state);

        let mut invalidates = Vec::new();
        if info_log_id != 0 {
            invalidates.push(info_log_id);
        }
        invalidates.push(entry_id);
        if update_log_id != 0 {
            invalidates.push(update_log_id);
        }
        self.shared.journal.invalidate(&invalidates)?;

        Ok(())
    }
}

/// Replaces a master's recovery info. The new `ServerUpdate` record
/// supersedes the server's previous one, so exactly one is live per server.
pub(crate) struct SetMasterRecoveryInfo<'a> {
    shared: &'a Shared,
    server_id: ServerId,
    info: MasterRecoveryInfo,
}

impl<'a> SetMasterRecoveryInfo<'a> {
    pub(crate) fn new(shared: &'a Shared, server_id: ServerId, info: MasterRecoveryInfo) -> Self {
        SetMasterRecoveryInfo {
            shared,
            server_id,
            info,
        }
    }

    pub(crate) fn execute(self, state: &mut ListState) -> Result<()> {
        let old_entry_id = state
            .iget(self.server_id)
            .map(|entry| entry.server_update_log_id)
            .unwrap_or(0);

        // Carry over the rest of a prior update record if one exists; only
        // the recovery info is being replaced.
        let record = if old_entry_id != 0 {
            let payload = self.shared.journal.read(old_entry_id)?;
            match JournalRecord::decode(&payload)? {
                JournalRecord::ServerUpdate { server_id, .. } => JournalRecord::ServerUpdate {
                    server_id,
                    master_recovery_info: self.info.clone(),
                },
                other => {
                    return Err(Error::Journal(format!(
                        "entry {} is not a ServerUpdate record: {:?}",
                        old_entry_id, other
                    )))
                }
            }
        } else {
            JournalRecord::ServerUpdate {
                server_id: self.server_id,
                master_recovery_info: self.info.clone(),
            }
        };

        let invalidates = if old_entry_id != 0 {
            vec![old_entry_id]
        } else {
            Vec::new()
        };
        let entry_id = self.shared.journal.append(&record.encode()?, &invalidates)?;
        tracing::debug!(entry_id, server_id = %self.server_id, "journaled ServerUpdate");

        self.complete(state, entry_id)
    }

    pub(crate) fn complete(self, state: &mut ListState, entry_id: EntryId) -> Result<()> {
        match state.get_mut(self.server_id) {
            Ok(entry) => {
                entry.server_update_log_id = entry_id;
                entry.master_recovery_info = self.info;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    server_id = %self.server_id,
                    "set_master_recovery_info: server does not exist"
                );
                self.shared.journal.invalidate(&[entry_id])?;
                Err(err)
            }
        }
    }
}
