//! Consensus-log journaling
//!
//! Every mutating membership operation is made crash-recoverable by writing
//! its state to an external replicated consensus log before applying it.
//! Operations follow a two-phase pattern: *execute* appends a record and
//! then applies the effect; *complete* applies the effect only and is what
//! coordinator recovery replays, fed the surviving record and its entry id.
//! Superseded records are invalidated so the log stays bounded.

use crate::membership::entry::MasterRecoveryInfo;
use crate::membership::id::{ServerId, ServiceMask};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Identifier of one entry in the consensus log. 0 means "no entry".
pub type EntryId = u64;

/// The external replicated log. Implementations must be linearizable and
/// are driven by a single writer (this coordinator).
pub trait ConsensusLog: Send + Sync {
    /// Append `payload` as a new entry, atomically invalidating the listed
    /// superseded entries, and return the new entry's id.
    fn append(&self, payload: &[u8], invalidates: &[EntryId]) -> Result<EntryId>;

    /// Read back the payload of a live entry.
    fn read(&self, id: EntryId) -> Result<Vec<u8>>;

    /// Invalidate entries without appending anything.
    fn invalidate(&self, ids: &[EntryId]) -> Result<()>;

    /// All live entries in append order, for recovery replay.
    fn entries(&self) -> Result<Vec<(EntryId, Vec<u8>)>>;
}

/// Journaled membership operation state. The `entry_type` tag is part of
/// the log format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry_type")]
pub enum JournalRecord {
    /// Provisional enlistment: the id has been allocated but the server is
    /// not yet visible to the cluster.
    ServerEnlisting {
        server_id: ServerId,
        service_mask: ServiceMask,
        read_speed: u32,
        service_locator: String,
    },
    /// Completed enlistment; supersedes the matching `ServerEnlisting`.
    ServerEnlisted {
        server_id: ServerId,
        service_mask: ServiceMask,
        read_speed: u32,
        service_locator: String,
    },
    /// Latest per-server update; supersedes the prior `ServerUpdate` for
    /// the same server.
    ServerUpdate {
        server_id: ServerId,
        master_recovery_info: MasterRecoveryInfo,
    },
    ForceServerDown { server_id: ServerId },
}

impl JournalRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Journal(format!("encode failed: {}", e)))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Journal(format!("decode failed: {}", e)))
    }
}

/// In-process implementation of [`ConsensusLog`], used by tests and
/// single-node deployments. Entry ids start at 1 and are never re-used.
pub struct InMemoryLog {
    inner: Mutex<InMemoryLogInner>,
}

struct InMemoryLogInner {
    next_id: EntryId,
    entries: BTreeMap<EntryId, Vec<u8>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog {
            inner: Mutex::new(InMemoryLogInner {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        InMemoryLog::new()
    }
}

impl ConsensusLog for InMemoryLog {
    fn append(&self, payload: &[u8], invalidates: &[EntryId]) -> Result<EntryId> {
        let mut inner = self.inner.lock().unwrap();
        for id in invalidates {
            inner.entries.remove(id);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, payload.to_vec());
        Ok(id)
    }

    fn read(&self, id: EntryId) -> Result<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Journal(format!("no live entry {}", id)))
    }

    fn invalidate(&self, ids: &[EntryId]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.entries.remove(id);
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(EntryId, Vec<u8>)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .iter()
            .map(|(id, payload)| (*id, payload.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tags_are_stable() {
        let record = JournalRecord::ServerEnlisting {
            server_id: ServerId::new(1, 0),
            service_mask: ServiceMask::MASTER,
            read_speed: 0,
            service_locator: "http://master-1:6000".to_string(),
        };
        let json = String::from_utf8(record.encode().unwrap()).unwrap();
        assert!(json.contains("\"entry_type\":\"ServerEnlisting\""));
        assert_eq!(JournalRecord::decode(json.as_bytes()).unwrap(), record);
    }

    #[test]
    fn test_in_memory_log_append_invalidates() {
        let log = InMemoryLog::new();
        let first = log.append(b"a", &[]).unwrap();
        let second = log.append(b"b", &[first]).unwrap();

        assert!(log.read(first).is_err());
        assert_eq!(log.read(second).unwrap(), b"b");

        let live = log.entries().unwrap();
        assert_eq!(live, vec![(second, b"b".to_vec())]);
    }

    #[test]
    fn test_in_memory_log_ids_not_reused() {
        let log = InMemoryLog::new();
        let first = log.append(b"a", &[]).unwrap();
        log.invalidate(&[first]).unwrap();
        let second = log.append(b"b", &[]).unwrap();
        assert!(second > first);
    }
}
