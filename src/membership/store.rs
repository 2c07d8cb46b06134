//! Guarded membership state
//!
//! Everything the coordinator mutates under its single lock lives in
//! [`ListState`]: the sparse slot array, service counters, the current list
//! version, the buffer of staged changes, the log of committed updates, and
//! the dispatcher's scan cursor. Methods here are pure state operations;
//! orchestration (journaling, tracker fan-out, condvar signalling) lives in
//! the server list itself.

use crate::membership::entry::{Entry, Slot};
use crate::membership::id::{ServerId, ServerStatus, ServiceMask};
use crate::membership::wire::{ServerListEntry, ServerListUpdate, UpdateKind};
use crate::{Error, Result};
use std::collections::VecDeque;

/// Cursor state for the dispatcher's rotating eligibility scan.
#[derive(Debug, Default)]
pub(crate) struct ScanState {
    /// Slot index where the next scan starts.
    pub(crate) search_index: usize,
    /// Minimum version any follower still needs, folded in during the scan;
    /// updates at or below it are pruned when the cursor wraps past 0.
    pub(crate) min_version: u64,
    /// Cached "nothing eligible" result, invalidated by commits and by any
    /// follower version rollback.
    pub(crate) no_updates_found: bool,
}

pub(crate) struct ListState {
    pub(crate) slots: Vec<Slot>,
    pub(crate) num_masters: u32,
    pub(crate) num_backups: u32,
    /// Version of the most recent committed update; strictly increasing.
    pub(crate) version: u64,
    /// Staged changes not yet sealed into a versioned update.
    pub(crate) update: Vec<ServerListEntry>,
    /// Committed updates not yet applied by every follower, oldest first and
    /// gap-free in version numbers.
    pub(crate) updates: VecDeque<ServerListUpdate>,
    pub(crate) last_scan: ScanState,
    pub(crate) next_replication_id: u64,
}

impl ListState {
    pub(crate) fn new() -> Self {
        ListState {
            slots: Vec::new(),
            num_masters: 0,
            num_backups: 0,
            version: 0,
            update: Vec::new(),
            updates: VecDeque::new(),
            last_scan: ScanState::default(),
            next_replication_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Lookup that tolerates absence: `None` if the slot is empty or the
    /// generation does not match.
    pub(crate) fn iget(&self, id: ServerId) -> Option<&Entry> {
        self.slots
            .get(id.index() as usize)
            .and_then(|slot| slot.entry.as_ref())
            .filter(|entry| entry.server_id == id)
    }

    pub(crate) fn iget_mut(&mut self, id: ServerId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index() as usize)
            .and_then(|slot| slot.entry.as_mut())
            .filter(|entry| entry.server_id == id)
    }

    pub(crate) fn get(&self, id: ServerId) -> Result<&Entry> {
        self.iget(id).ok_or(Error::UnknownServer(id))
    }

    pub(crate) fn get_mut(&mut self, id: ServerId) -> Result<&mut Entry> {
        self.iget_mut(id).ok_or(Error::UnknownServer(id))
    }

    pub(crate) fn get_index(&self, index: usize) -> Result<Option<&Entry>> {
        if index < self.slots.len() {
            Ok(self.slots[index].entry.as_ref())
        } else {
            Err(Error::IndexOutOfRange(index))
        }
    }

    /// Lowest free index, growing the list if every slot is occupied.
    /// Index 0 is reserved and never returned.
    pub(crate) fn first_free_index(&mut self) -> usize {
        let mut index = 1;
        while index < self.slots.len() {
            if self.slots[index].entry.is_none() {
                break;
            }
            index += 1;
        }

        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, Slot::default);
        }

        index
    }

    /// Allocate a fresh id and reserve its slot with a placeholder entry.
    /// The placeholder carries no services, so it does not affect the
    /// master/backup counters until a real `add` replaces it.
    pub(crate) fn generate_unique_id(&mut self) -> ServerId {
        let index = self.first_free_index();
        let slot = &mut self.slots[index];
        let id = ServerId::new(index as u32, slot.next_generation);
        slot.next_generation += 1;
        slot.entry = Some(Entry::new(id, String::new(), ServiceMask::empty()));
        id
    }

    /// Full-list snapshot of every present entry whose services intersect
    /// `filter`, in slot order. Members rely on that order when applying.
    pub(crate) fn serialize(&self, filter: ServiceMask) -> ServerListUpdate {
        let mut out = ServerListUpdate::new(UpdateKind::FullList);
        for slot in &self.slots {
            if let Some(entry) = &slot.entry {
                if entry.services.intersects(filter) {
                    out.servers.push(entry.to_wire());
                }
            }
        }
        out.version_number = self.version;
        out
    }

    /// True when every up membership-capable follower has applied the
    /// current version and nothing is in flight.
    pub(crate) fn is_cluster_up_to_date(&self) -> bool {
        for slot in &self.slots {
            if let Some(entry) = &slot.entry {
                if entry.services.has(ServiceMask::MEMBERSHIP)
                    && entry.status == ServerStatus::Up
                    && (entry.server_list_version != self.version || entry.is_being_updated > 0)
                {
                    return false;
                }
            }
        }
        true
    }
}
