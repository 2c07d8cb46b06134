//! Outbound server-list messages
//!
//! These are the records disseminated to cluster members: either a full
//! snapshot of the list or one incremental, versioned delta. Members apply
//! deltas strictly in version order, so the coordinator never skips or
//! reorders them. Framing is handled by the transport.

use crate::membership::id::{ServerId, ServerStatus, ServiceMask};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Complete enumeration of the list, sent to followers with no list yet.
    FullList,
    /// Incremental delta containing only the entries that changed.
    Update,
}

/// One server as seen by cluster members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerListEntry {
    pub server_id: ServerId,
    pub services: ServiceMask,
    pub service_locator: String,
    pub status: ServerStatus,
    pub expected_read_mbytes_per_sec: u32,
    pub replication_id: u64,
}

/// A versioned server-list message, the unit of dissemination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerListUpdate {
    pub version_number: u64,
    pub kind: UpdateKind,
    pub servers: Vec<ServerListEntry>,
}

impl ServerListUpdate {
    pub fn new(kind: UpdateKind) -> Self {
        ServerListUpdate {
            version_number: 0,
            kind,
            servers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_json_roundtrip() {
        let update = ServerListUpdate {
            version_number: 4,
            kind: UpdateKind::Update,
            servers: vec![ServerListEntry {
                server_id: ServerId::new(2, 1),
                services: ServiceMask::BACKUP | ServiceMask::MEMBERSHIP,
                service_locator: "http://backup-2:6000".to_string(),
                status: ServerStatus::Crashed,
                expected_read_mbytes_per_sec: 300,
                replication_id: 1,
            }],
        };

        let json = serde_json::to_string(&update).unwrap();
        let back: ServerListUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
        assert!(json.contains("\"update\""));
    }
}
