//! Coordinator-side server records

use crate::membership::id::{ServerId, ServerStatus, ServiceMask};
use crate::membership::journal::EntryId;
use crate::membership::wire::ServerListEntry;
use serde::{Deserialize, Serialize};

/// Opaque blob the master-recovery subsystem stores per master, used to rule
/// out inconsistent open replicas during recovery. The membership service
/// only journals and hands it back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterRecoveryInfo(pub Vec<u8>);

impl MasterRecoveryInfo {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        MasterRecoveryInfo(bytes.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The authoritative record for one enlisted server.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub server_id: ServerId,
    pub service_locator: String,
    pub services: ServiceMask,
    /// Read speed reported by an enlisting backup; 0 for non-backups.
    pub expected_read_mbytes_per_sec: u32,
    pub status: ServerStatus,
    /// Replication group this backup belongs to; 0 = unassigned.
    pub replication_id: u64,
    pub master_recovery_info: MasterRecoveryInfo,
    /// Last server-list version this follower is known to have applied.
    pub server_list_version: u64,
    /// Version currently in flight to this follower; 0 = none.
    pub is_being_updated: u64,
    /// Journal entry holding this server's enlistment record.
    pub server_info_log_id: EntryId,
    /// Journal entry holding this server's latest update record.
    pub server_update_log_id: EntryId,
}

impl Entry {
    pub(crate) fn new(server_id: ServerId, service_locator: String, services: ServiceMask) -> Self {
        Entry {
            server_id,
            service_locator,
            services,
            expected_read_mbytes_per_sec: 0,
            status: ServerStatus::Up,
            replication_id: 0,
            master_recovery_info: MasterRecoveryInfo::default(),
            server_list_version: 0,
            is_being_updated: 0,
            server_info_log_id: 0,
            server_update_log_id: 0,
        }
    }

    /// An up server running the master service.
    pub fn is_master(&self) -> bool {
        self.status == ServerStatus::Up && self.services.has(ServiceMask::MASTER)
    }

    /// An up server running the backup service.
    pub fn is_backup(&self) -> bool {
        self.status == ServerStatus::Up && self.services.has(ServiceMask::BACKUP)
    }

    pub(crate) fn to_wire(&self) -> ServerListEntry {
        ServerListEntry {
            server_id: self.server_id,
            services: self.services,
            service_locator: self.service_locator.clone(),
            status: self.status,
            expected_read_mbytes_per_sec: if self.services.has(ServiceMask::BACKUP) {
                self.expected_read_mbytes_per_sec
            } else {
                0
            },
            replication_id: self.replication_id,
        }
    }
}

/// One persistent position in the server list. The slot survives entry
/// destruction so `next_generation` keeps counting across re-use of the
/// index.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) next_generation: u32,
    pub(crate) entry: Option<Entry>,
}
