//! Background dissemination of server-list updates
//!
//! A single worker thread keeps every membership-capable follower's server
//! list current. It maintains a pool of update slots, each optionally
//! carrying one in-flight RPC, and adapts how many slots are eligible so
//! that by the time a pass over the pool finishes, the RPCs started at its
//! beginning are done: the pool grows while every slot stays busy and
//! shrinks once it is consistently underused.
//!
//! Followers with no list yet get a full snapshot; everyone else gets
//! incremental updates strictly in version order. An RPC that fails or
//! times out only reverts the follower's in-flight marker, so the scan
//! picks the follower up again without losing its applied version.

use crate::membership::id::{ServerId, ServerStatus, ServiceMask};
use crate::membership::list::Shared;
use crate::membership::store::ListState;
use crate::membership::transport::UpdateRpc;
use crate::membership::wire::{ServerListUpdate, UpdateKind};
use crate::Error;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One slot in the updater's pool, holding at most one in-flight RPC.
struct UpdateSlot {
    server_id: ServerId,
    service_locator: String,
    /// Version the follower had before this RPC; restored on failure.
    original_version: u64,
    payload: ServerListUpdate,
    rpc: Option<Box<dyn UpdateRpc>>,
    started: Instant,
}

impl UpdateSlot {
    fn new() -> Self {
        UpdateSlot {
            server_id: ServerId::new(0, 0),
            service_locator: String::new(),
            original_version: 0,
            payload: ServerListUpdate::new(UpdateKind::Update),
            rpc: None,
            started: Instant::now(),
        }
    }
}

pub(crate) struct Updater {
    shared: Arc<Shared>,
}

impl Updater {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Updater { shared }
    }

    /// Main loop. Exits when `halt_updater` sets the stop flag; all
    /// in-flight RPCs are cancelled and their entries reverted on the way
    /// out.
    pub(crate) fn run(self) {
        let mut slots: Vec<UpdateSlot> = Vec::new();
        let mut in_use: Vec<usize> = Vec::new();
        let mut free: Vec<usize> = Vec::new();

        let mut concurrent = self.shared.concurrent_updates.load(Ordering::Relaxed).max(1);
        for i in 0..concurrent {
            slots.push(UpdateSlot::new());
            in_use.push(i);
        }

        while !self.shared.stop_updater.load(Ordering::Acquire) {
            // Position (within in_use) of the last slot seen without an RPC.
            let mut last_free: Option<usize> = None;
            let mut live_rpcs = 0;

            for pos in 0..in_use.len() {
                if self.dispatch_rpc(&mut slots[in_use[pos]]) {
                    live_rpcs += 1;
                } else {
                    last_free = Some(pos);
                }
            }

            if in_use.len() == live_rpcs && last_free.is_none() {
                // Every slot stayed busy for the whole pass; add capacity.
                if free.is_empty() {
                    slots.push(UpdateSlot::new());
                    free.push(slots.len() - 1);
                }
                concurrent += 1;
                in_use.push(free.remove(0));
                self.shared.concurrent_updates.store(concurrent, Ordering::Relaxed);
            } else if live_rpcs + 1 < in_use.len() {
                // Consistently below load; the slack of one prevents
                // growing and shrinking on alternating passes.
                if let Some(pos) = last_free {
                    concurrent -= 1;
                    free.push(in_use.remove(pos));
                    self.shared.concurrent_updates.store(concurrent, Ordering::Relaxed);
                }
            }

            if live_rpcs == 0 {
                let mut state = self.shared.state.lock().unwrap();
                while !self.shared.stop_updater.load(Ordering::Acquire)
                    && !self.shared.has_updates(&mut state)
                {
                    // Nothing in flight and nothing eligible: the cluster
                    // is momentarily caught up.
                    self.shared.list_up_to_date.notify_all();
                    state = self.shared.has_updates_or_stop.wait(state).unwrap();
                }
            } else {
                // Don't spin while RPCs are pending.
                thread::sleep(Duration::from_millis(1));
            }
        }

        for &slot_index in &in_use {
            let slot = &mut slots[slot_index];
            if let Some(mut rpc) = slot.rpc.take() {
                rpc.cancel();
                self.shared
                    .update_entry_version(slot.server_id, slot.original_version);
            }
        }
    }

    /// Drive one slot: harvest a finished RPC, enforce the timeout, and
    /// start the next eligible update. Returns true if the slot holds a
    /// live RPC afterwards.
    fn dispatch_rpc(&self, slot: &mut UpdateSlot) -> bool {
        if let Some(rpc) = slot.rpc.as_mut() {
            if rpc.is_ready() {
                let new_version = match rpc.wait() {
                    Ok(()) => slot.payload.version_number,
                    Err(Error::ServerNotUp(_)) => {
                        tracing::info!(
                            server_id = %slot.server_id,
                            "update arrived during/after the server was crashed or removed"
                        );
                        slot.original_version
                    }
                    Err(e) => {
                        tracing::info!(
                            server_id = %slot.server_id,
                            error = %e,
                            "server list update failed; trying again later"
                        );
                        slot.original_version
                    }
                };
                slot.rpc = None;
                self.shared.update_entry_version(slot.server_id, new_version);
            } else {
                let timeout = self.shared.rpc_timeout;
                if !timeout.is_zero() && slot.started.elapsed() > timeout {
                    tracing::info!(
                        server_id = %slot.server_id,
                        elapsed_ms = slot.started.elapsed().as_millis() as u64,
                        "server list update timed out; trying again later"
                    );
                    if let Some(mut rpc) = slot.rpc.take() {
                        rpc.cancel();
                    }
                    self.shared
                        .update_entry_version(slot.server_id, slot.original_version);
                }
            }
        }

        if slot.rpc.is_some() {
            return true;
        }

        if !self.shared.load_next_update(slot) {
            return false;
        }

        slot.rpc = Some(self.shared.transport.send_update(
            slot.server_id,
            &slot.service_locator,
            &slot.payload,
        ));
        slot.started = Instant::now();
        true
    }
}

impl Shared {
    /// Rotating scan for a follower that needs an update and has no RPC in
    /// flight. Leaves the cursor on the hit so `load_next_update` can read
    /// it. Prunes the update log each time the cursor wraps past slot 0,
    /// using the minimum version folded in during the previous rotation.
    ///
    /// A cached negative result short-circuits the scan until a commit or a
    /// follower rollback invalidates it, so the common all-caught-up case
    /// costs nothing.
    pub(crate) fn has_updates(&self, state: &mut ListState) -> bool {
        if state.last_scan.no_updates_found || state.slots.is_empty() {
            return false;
        }

        let len = state.slots.len();
        let start = state.last_scan.search_index.min(len - 1);
        let mut i = start;
        loop {
            if i == 0 {
                let min_version = state.last_scan.min_version;
                self.prune_updates(state, min_version);
                state.last_scan.min_version = 0;
            }

            if let Some(entry) = state.slots[i].entry.as_ref() {
                if entry.services.has(ServiceMask::MEMBERSHIP)
                    && entry.status == ServerStatus::Up
                {
                    let entry_min_version = if entry.server_list_version != 0 {
                        entry.server_list_version
                    } else {
                        entry.is_being_updated
                    };
                    if state.last_scan.min_version == 0
                        || (entry_min_version > 0 && entry_min_version < state.last_scan.min_version)
                    {
                        state.last_scan.min_version = entry_min_version;
                    }

                    if entry.server_list_version != state.version && entry.is_being_updated == 0 {
                        state.last_scan.search_index = i;
                        state.last_scan.no_updates_found = false;
                        return true;
                    }
                }
            }

            i = (i + 1) % len;
            if i == start {
                break;
            }
        }

        state.last_scan.no_updates_found = true;
        false
    }

    /// Fill `slot` with the next update owed to an eligible follower and
    /// mark the version in flight. Whoever takes the slot must eventually
    /// call `update_entry_version` for it, success or not, or the entry
    /// stays stuck in the in-flight state.
    pub(crate) fn load_next_update(&self, slot: &mut UpdateSlot) -> bool {
        let mut state = self.state.lock().unwrap();

        if !self.has_updates(&mut state) {
            return false;
        }

        // The cursor was left on the eligible entry by has_updates.
        let len = state.slots.len();
        let index = state.last_scan.search_index;
        state.last_scan.search_index = (index + 1) % len;
        let version = state.version;

        let Some(entry) = state.slots[index].entry.as_mut() else {
            return false;
        };
        slot.server_id = entry.server_id;
        slot.service_locator = entry.service_locator.clone();
        slot.original_version = entry.server_list_version;

        if entry.server_list_version == 0 {
            // Follower has no list yet; send a full snapshot.
            entry.is_being_updated = version;
            slot.payload = state.serialize(ServiceMask::MASTER | ServiceMask::BACKUP);
        } else {
            let target_version = entry.server_list_version + 1;
            entry.is_being_updated = target_version;

            // The update log is gap-free from the minimum follower version
            // through the head, so the target record must be present.
            let head = match state.updates.front() {
                Some(update) => update.version_number,
                None => {
                    tracing::error!(
                        server_id = %slot.server_id,
                        target_version,
                        "update log is empty but a follower still needs an update"
                    );
                    if let Some(entry) = state.iget_mut(slot.server_id) {
                        entry.is_being_updated = 0;
                    }
                    return false;
                }
            };
            match state.updates.get((target_version - head) as usize) {
                Some(update) => slot.payload = update.clone(),
                None => {
                    tracing::error!(
                        server_id = %slot.server_id,
                        target_version,
                        head,
                        "update log is missing a record a follower needs"
                    );
                    if let Some(entry) = state.iget_mut(slot.server_id) {
                        entry.is_being_updated = 0;
                    }
                    return false;
                }
            }
        }

        true
    }

    /// Record the terminal outcome of an update RPC: the follower now has
    /// `version` and nothing is in flight to it. Unknown ids are ignored,
    /// since the server may have been removed mid-flight.
    pub(crate) fn update_entry_version(&self, id: ServerId, version: u64) {
        let mut state = self.state.lock().unwrap();

        let head_version = state.version;
        if let Some(entry) = state.iget_mut(id) {
            tracing::debug!(
                server_id = %id,
                from = entry.server_list_version,
                to = version,
                "follower server list version updated"
            );
            entry.server_list_version = version;
            entry.is_being_updated = 0;

            if version < head_version {
                state.last_scan.no_updates_found = false;
            }
        }
    }
}
