//! The coordinator's authoritative server list
//!
//! [`ServerList`] owns the membership state of the cluster: it assigns
//! server ids, applies membership mutations under a single coarse lock,
//! journals every mutation to the external consensus log, fans events out
//! to local trackers, and seals each batch of changes into a versioned
//! update that the background updater disseminates to every
//! membership-capable follower.
//!
//! Mutators hold the lock for their entire body. Internal helpers that
//! assume the lock take the guarded [`ListState`] explicitly, so the
//! locking discipline is visible in every signature.

use crate::common::config::CoordinatorConfig;
use crate::membership::entry::Entry;
use crate::membership::id::{ServerId, ServerStatus, ServiceMask};
use crate::membership::journal::{ConsensusLog, EntryId, JournalRecord};
use crate::membership::ops::{EnlistServer, ForceServerDown, SetMasterRecoveryInfo};
use crate::membership::recovery::RecoveryManager;
use crate::membership::store::ListState;
use crate::membership::tracker::{ServerChange, ServerTracker};
use crate::membership::transport::UpdateTransport;
use crate::membership::wire::{ServerListUpdate, UpdateKind};
use crate::membership::MasterRecoveryInfo;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Backups are grouped in threes for replicated writes.
pub const REPLICATION_GROUP_SIZE: usize = 3;

/// State and collaborators shared between caller threads and the updater.
pub(crate) struct Shared {
    pub(crate) state: Mutex<ListState>,
    /// Wakes the updater: signalled by `commit_update` and by halt.
    pub(crate) has_updates_or_stop: Condvar,
    /// Wakes `sync` callers: broadcast when the update log drains and when
    /// the updater finds nothing left in flight.
    pub(crate) list_up_to_date: Condvar,
    pub(crate) stop_updater: AtomicBool,
    pub(crate) journal: Arc<dyn ConsensusLog>,
    pub(crate) transport: Arc<dyn UpdateTransport>,
    pub(crate) recovery: Arc<dyn RecoveryManager>,
    trackers: Mutex<Vec<Arc<dyn ServerTracker>>>,
    /// Target number of simultaneous update RPCs; adapted by the updater.
    pub(crate) concurrent_updates: AtomicUsize,
    /// Per-RPC deadline; zero means wait forever.
    pub(crate) rpc_timeout: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) force_down_for_testing: AtomicBool,
}

pub struct ServerList {
    pub(crate) shared: Arc<Shared>,
    updater: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ServerList {
    /// Create the list and start its background updater.
    pub fn new(
        config: &CoordinatorConfig,
        journal: Arc<dyn ConsensusLog>,
        transport: Arc<dyn UpdateTransport>,
        recovery: Arc<dyn RecoveryManager>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ListState::new()),
            has_updates_or_stop: Condvar::new(),
            list_up_to_date: Condvar::new(),
            stop_updater: AtomicBool::new(true),
            journal,
            transport,
            recovery,
            trackers: Mutex::new(Vec::new()),
            concurrent_updates: AtomicUsize::new(config.concurrent_updates.max(1)),
            rpc_timeout: config.rpc_timeout(),
            ping_timeout: config.ping_timeout(),
            force_down_for_testing: AtomicBool::new(false),
        });

        let list = ServerList {
            shared,
            updater: Mutex::new(None),
        };
        list.start_updater();
        list
    }

    pub fn register_tracker(&self, tracker: Arc<dyn ServerTracker>) {
        self.shared.trackers.lock().unwrap().push(tracker);
    }

    /// Skip the verification ping in `hint_server_down` and treat every
    /// suspect as dead. Test hook.
    pub fn set_force_down_for_testing(&self, force: bool) {
        self.shared
            .force_down_for_testing
            .store(force, Ordering::Relaxed);
    }

    // === Membership mutators ===

    /// Install a server at a given id. Normally servers arrive through
    /// `enlist_server`; this is the direct form used when replaying an
    /// enlistment that had already completed before a coordinator crash.
    pub fn add(&self, id: ServerId, service_locator: &str, services: ServiceMask, read_speed: u32) {
        let mut state = self.shared.state.lock().unwrap();
        self.shared
            .add_locked(&mut state, id, service_locator, services, read_speed);
        self.shared.commit_update(&mut state);
    }

    /// Mark a server crashed, keeping its entry while recovery retains the
    /// resources it needs. No-op if already crashed; must not be called on
    /// a removed server.
    pub fn crashed(&self, id: ServerId) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        self.shared.crashed_locked(&mut state, id)?;
        self.shared.commit_update(&mut state);
        Ok(())
    }

    /// Remove a server whose crash has been fully recovered. The entry is
    /// destroyed; the slot and its generation counter persist.
    pub fn remove(&self, id: ServerId) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        self.shared.remove_locked(&mut state, id)?;
        self.shared.commit_update(&mut state);
        Ok(())
    }

    /// Allocate a fresh `ServerId` without enlisting anything at it yet.
    pub fn generate_unique_id(&self) -> ServerId {
        let mut state = self.shared.state.lock().unwrap();
        state.generate_unique_id()
    }

    /// Enlist a new server, optionally replacing a presumed-dead older
    /// incarnation. When the replaced id is still alive it is forced down
    /// first, so the committed update carries its removal before the new
    /// server's addition; members rely on that order when applying.
    pub fn enlist_server(
        &self,
        replaces_id: Option<ServerId>,
        services: ServiceMask,
        read_speed: u32,
        service_locator: &str,
    ) -> Result<ServerId> {
        let mut state = self.shared.state.lock().unwrap();

        if let Some(replaces) = replaces_id {
            if state.iget(replaces).is_some() {
                tracing::info!(
                    locator = service_locator,
                    replaces = %replaces,
                    "enlisting server claims to replace a live server id; \
                     taking its word for it and assuming the old server failed"
                );
                self.shared.force_server_down_locked(&mut state, replaces)?;
            }
        }

        let new_id =
            EnlistServer::new(&self.shared, services, read_speed, service_locator).execute(&mut state)?;

        if let Some(replaces) = replaces_id {
            tracing::info!(new = %new_id, old = %replaces, "newly enlisted server replaces old server");
        }

        self.shared.commit_update(&mut state);
        Ok(new_id)
    }

    /// Investigate a crash report. Returns `Ok(false)` if the server
    /// answered the verification ping (false alarm, nothing mutated);
    /// `Ok(true)` if it was already gone or has now been forced down.
    pub fn hint_server_down(&self, id: ServerId) -> Result<bool> {
        let mut state = self.shared.state.lock().unwrap();

        let locator = match state.iget(id) {
            Some(entry) if entry.status == ServerStatus::Up => entry.service_locator.clone(),
            _ => {
                tracing::info!(server_id = %id, "spurious crash report on unknown server id");
                return Ok(true);
            }
        };

        tracing::info!(server_id = %id, %locator, "checking status of suspect server");
        if !self.verify_server_failure(id, &locator) {
            return Ok(false);
        }

        tracing::info!(
            server_id = %id,
            "server has crashed; notifying the cluster and starting recovery"
        );
        self.shared.force_server_down_locked(&mut state, id)?;
        self.shared.commit_update(&mut state);
        Ok(true)
    }

    /// Replace the opaque recovery info the coordinator must hold to safely
    /// recover this master's log.
    pub fn set_master_recovery_info(&self, id: ServerId, info: MasterRecoveryInfo) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        SetMasterRecoveryInfo::new(&self.shared, id, info).execute(&mut state)
    }

    // === Reads ===

    /// Copy of the entry for `id`; fails with `UnknownServer` if the slot
    /// is empty or holds a different incarnation.
    pub fn get(&self, id: ServerId) -> Result<Entry> {
        let state = self.shared.state.lock().unwrap();
        state.get(id).cloned()
    }

    /// Copy of the entry at a list position, `None` if unoccupied.
    pub fn get_index(&self, index: u32) -> Result<Option<Entry>> {
        let state = self.shared.state.lock().unwrap();
        Ok(state.get_index(index as usize)?.cloned())
    }

    /// Number of up masters; crashed and removed servers are not counted.
    pub fn master_count(&self) -> u32 {
        self.shared.state.lock().unwrap().num_masters
    }

    /// Number of up backups; crashed and removed servers are not counted.
    pub fn backup_count(&self) -> u32 {
        self.shared.state.lock().unwrap().num_backups
    }

    /// Position of the first up master at or after `start_index`.
    pub fn next_master_index(&self, start_index: u32) -> Option<u32> {
        let state = self.shared.state.lock().unwrap();
        Self::next_of(&state, start_index, Entry::is_master)
    }

    /// Position of the first up backup at or after `start_index`.
    pub fn next_backup_index(&self, start_index: u32) -> Option<u32> {
        let state = self.shared.state.lock().unwrap();
        Self::next_of(&state, start_index, Entry::is_backup)
    }

    fn next_of(state: &ListState, start_index: u32, pred: fn(&Entry) -> bool) -> Option<u32> {
        let mut index = start_index as usize;
        while index < state.len() {
            if state.slots[index].entry.as_ref().map_or(false, pred) {
                return Some(index as u32);
            }
            index += 1;
        }
        None
    }

    /// Number of slots in the list, occupied or not.
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the most recent committed update.
    pub fn version(&self) -> u64 {
        self.shared.state.lock().unwrap().version
    }

    /// Full-list snapshot of every entry whose services intersect `filter`.
    pub fn serialize(&self, filter: ServiceMask) -> ServerListUpdate {
        let state = self.shared.state.lock().unwrap();
        state.serialize(filter)
    }

    // === Dissemination control ===

    /// Block until every up membership-capable follower has applied the
    /// current version and no update RPC is outstanding.
    pub fn sync(&self) {
        self.start_updater();
        let mut state = self.shared.state.lock().unwrap();
        while !state.is_cluster_up_to_date() {
            state = self.shared.list_up_to_date.wait(state).unwrap();
        }
    }

    /// Start the background updater if it is not already running.
    pub fn start_updater(&self) {
        let mut updater = self.updater.lock().unwrap();
        if updater.is_none() {
            self.shared.stop_updater.store(false, Ordering::Release);
            let worker = crate::membership::updater::Updater::new(Arc::clone(&self.shared));
            match thread::Builder::new()
                .name("membership-updater".to_string())
                .spawn(move || worker.run())
            {
                Ok(handle) => *updater = Some(handle),
                Err(e) => tracing::error!("failed to spawn membership updater: {}", e),
            }
        }
        // Tell it to look for work regardless.
        self.shared.has_updates_or_stop.notify_one();
    }

    /// Stop the background updater, cancelling its in-flight RPCs and
    /// leaving the cluster out of date. Call `sync` first to force a
    /// synchronization point before halting.
    pub fn halt_updater(&self) {
        {
            let _state = self.shared.state.lock().unwrap();
            self.shared.stop_updater.store(true, Ordering::Release);
            self.shared.has_updates_or_stop.notify_one();
        }

        let handle = self.updater.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // === Coordinator crash recovery ===

    /// Replay every live journal record in append order, applying only the
    /// complete phase of each operation.
    pub fn recover(&self) -> Result<()> {
        let entries = self.shared.journal.entries()?;
        for (entry_id, payload) in entries {
            let record = JournalRecord::decode(&payload)?;
            match &record {
                JournalRecord::ServerEnlisting { .. } => {
                    self.enlist_server_recover(&record, entry_id)?;
                }
                JournalRecord::ServerEnlisted { .. } => {
                    self.enlisted_server_recover(&record, entry_id)?;
                }
                JournalRecord::ServerUpdate { .. } => {
                    self.set_master_recovery_info_recover(&record, entry_id)?;
                }
                JournalRecord::ForceServerDown { .. } => {
                    self.force_server_down_recover(&record, entry_id)?;
                }
            }
        }
        Ok(())
    }

    /// Finish an enlistment whose `ServerEnlisting` record survived a
    /// coordinator crash. Re-creates the slot at the recorded id, then
    /// seals the enlistment as the original coordinator would have.
    pub fn enlist_server_recover(&self, record: &JournalRecord, entry_id: EntryId) -> Result<ServerId> {
        let JournalRecord::ServerEnlisting {
            server_id,
            service_mask,
            read_speed,
            service_locator,
        } = record
        else {
            return Err(Error::Internal(
                "enlist_server_recover requires a ServerEnlisting record".to_string(),
            ));
        };
        tracing::debug!(server_id = %server_id, "recovering provisional enlistment");

        let mut state = self.shared.state.lock().unwrap();
        let id = EnlistServer::at(
            &self.shared,
            *server_id,
            *service_mask,
            *read_speed,
            service_locator.clone(),
        )
        .complete(&mut state, entry_id)?;
        self.shared.commit_update(&mut state);
        Ok(id)
    }

    /// Re-install a server whose enlistment had fully completed before the
    /// coordinator crashed.
    pub fn enlisted_server_recover(&self, record: &JournalRecord, entry_id: EntryId) -> Result<()> {
        let JournalRecord::ServerEnlisted {
            server_id,
            service_mask,
            read_speed,
            service_locator,
        } = record
        else {
            return Err(Error::Internal(
                "enlisted_server_recover requires a ServerEnlisted record".to_string(),
            ));
        };
        tracing::debug!(server_id = %server_id, "recovering completed enlistment");

        let mut state = self.shared.state.lock().unwrap();
        self.shared
            .add_locked(&mut state, *server_id, service_locator, *service_mask, *read_speed);
        state.get_mut(*server_id)?.server_info_log_id = entry_id;
        self.shared.commit_update(&mut state);
        Ok(())
    }

    /// Finish a `ForceServerDown` whose record survived a coordinator
    /// crash.
    pub fn force_server_down_recover(&self, record: &JournalRecord, entry_id: EntryId) -> Result<()> {
        let JournalRecord::ForceServerDown { server_id } = record else {
            return Err(Error::Internal(
                "force_server_down_recover requires a ForceServerDown record".to_string(),
            ));
        };
        tracing::debug!(server_id = %server_id, "recovering forced server down");

        let mut state = self.shared.state.lock().unwrap();
        ForceServerDown::new(&self.shared, *server_id).complete(&mut state, entry_id)
    }

    /// Re-apply a `ServerUpdate` record after a coordinator crash.
    pub fn set_master_recovery_info_recover(
        &self,
        record: &JournalRecord,
        entry_id: EntryId,
    ) -> Result<()> {
        let JournalRecord::ServerUpdate {
            server_id,
            master_recovery_info,
        } = record
        else {
            return Err(Error::Internal(
                "set_master_recovery_info_recover requires a ServerUpdate record".to_string(),
            ));
        };
        tracing::debug!(server_id = %server_id, "recovering master recovery info");

        let mut state = self.shared.state.lock().unwrap();
        SetMasterRecoveryInfo::new(&self.shared, *server_id, master_recovery_info.clone())
            .complete(&mut state, entry_id)
    }

    fn verify_server_failure(&self, id: ServerId, locator: &str) -> bool {
        if self.shared.force_down_for_testing.load(Ordering::Relaxed) {
            return true;
        }

        if self
            .shared
            .transport
            .ping(id, locator, self.shared.ping_timeout)
        {
            tracing::info!(server_id = %id, %locator, "false positive crash report");
            return false;
        }
        tracing::info!(server_id = %id, %locator, "verified server failure");
        true
    }
}

impl Drop for ServerList {
    fn drop(&mut self) {
        self.halt_updater();
    }
}

impl Shared {
    pub(crate) fn add_locked(
        &self,
        state: &mut ListState,
        id: ServerId,
        service_locator: &str,
        services: ServiceMask,
        read_speed: u32,
    ) {
        let index = id.index() as usize;

        // During coordinator recovery the slot may never have been
        // allocated in this process, so grow on demand.
        if index >= state.slots.len() {
            state.slots.resize_with(index + 1, Default::default);
        }

        let mut entry = Entry::new(id, service_locator.to_string(), services);
        if services.has(ServiceMask::MASTER) {
            state.num_masters += 1;
        }
        if services.has(ServiceMask::BACKUP) {
            state.num_backups += 1;
            entry.expected_read_mbytes_per_sec = read_speed;
        }

        let wire = entry.to_wire();
        let slot = &mut state.slots[index];
        slot.next_generation = id.generation() + 1;
        slot.entry = Some(entry);
        state.update.push(wire);

        if let Some(entry) = state.slots[index].entry.as_ref() {
            self.notify_trackers(entry, ServerChange::Added);
        }
    }

    pub(crate) fn crashed_locked(&self, state: &mut ListState, id: ServerId) -> Result<()> {
        if state.get(id)?.status == ServerStatus::Crashed {
            return Ok(());
        }
        debug_assert_ne!(state.get(id)?.status, ServerStatus::Down);

        let entry = state.get_mut(id)?;
        let was_master = entry.is_master();
        let was_backup = entry.is_backup();
        entry.status = ServerStatus::Crashed;

        if was_master {
            state.num_masters -= 1;
        }
        if was_backup {
            state.num_backups -= 1;
        }

        let wire = state.iget(id).map(|entry| entry.to_wire());
        if let Some(wire) = wire {
            state.update.push(wire);
        }
        if let Some(entry) = state.iget(id) {
            self.notify_trackers(entry, ServerChange::Crashed);
        }
        Ok(())
    }

    pub(crate) fn remove_locked(&self, state: &mut ListState, id: ServerId) -> Result<()> {
        state.get(id)?;
        self.crashed_locked(state, id)?;

        // The entry is destroyed immediately, but the serialized update
        // must still carry the final status.
        let removed = {
            let entry = state.get_mut(id)?;
            entry.status = ServerStatus::Down;
            entry.clone()
        };
        state.update.push(removed.to_wire());
        state.slots[id.index() as usize].entry = None;

        self.notify_trackers(&removed, ServerChange::Removed);
        Ok(())
    }

    pub(crate) fn force_server_down_locked(&self, state: &mut ListState, id: ServerId) -> Result<()> {
        ForceServerDown::new(self, id).execute(state)
    }

    /// Change a backup's replication group and stage the change for the
    /// next committed update. Skipped for servers that are not up.
    fn set_replication_id_locked(
        &self,
        state: &mut ListState,
        id: ServerId,
        replication_id: u64,
    ) -> Result<()> {
        let wire = {
            let entry = state.get_mut(id)?;
            if entry.status != ServerStatus::Up {
                return Ok(());
            }
            entry.replication_id = replication_id;
            entry.to_wire()
        };
        state.update.push(wire);
        Ok(())
    }

    /// Assign every listed backup to `replication_id`. Returns false if any
    /// of them is gone; assignments already made are not rolled back.
    pub(crate) fn assign_replication_group(
        &self,
        state: &mut ListState,
        replication_id: u64,
        group: &[ServerId],
    ) -> bool {
        for &id in group {
            if state.iget(id).is_none() {
                return false;
            }
            let _ = self.set_replication_id_locked(state, id, replication_id);
        }
        true
    }

    /// Form as many full replication groups as the pool of up, unassigned
    /// backups allows.
    pub(crate) fn create_replication_group(&self, state: &mut ListState) {
        let mut free_backups: Vec<ServerId> = state
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.is_backup() && entry.replication_id == 0)
            .map(|entry| entry.server_id)
            .collect();

        while free_backups.len() >= REPLICATION_GROUP_SIZE {
            let group = free_backups.split_off(free_backups.len() - REPLICATION_GROUP_SIZE);
            let replication_id = state.next_replication_id;
            self.assign_replication_group(state, replication_id, &group);
            state.next_replication_id += 1;
        }
    }

    /// Dissolve a replication group, returning its surviving members to the
    /// unassigned pool. Group 0 is the unassigned pool itself.
    pub(crate) fn remove_replication_group(&self, state: &mut ListState, replication_id: u64) {
        if replication_id == 0 {
            return;
        }

        let group: Vec<ServerId> = state
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.is_backup() && entry.replication_id == replication_id)
            .map(|entry| entry.server_id)
            .collect();

        if !group.is_empty() {
            self.assign_replication_group(state, 0, &group);
        }
    }

    /// Seal the staged changes into one versioned update and wake the
    /// updater. Committing with nothing staged is a no-op: the version does
    /// not advance and the updater stays asleep.
    pub(crate) fn commit_update(&self, state: &mut ListState) {
        if state.update.is_empty() {
            return;
        }

        state.version += 1;
        let sealed = ServerListUpdate {
            version_number: state.version,
            kind: UpdateKind::Update,
            servers: std::mem::take(&mut state.update),
        };
        state.updates.push_back(sealed);
        state.last_scan.no_updates_found = false;
        self.has_updates_or_stop.notify_one();
    }

    /// Drop committed updates every follower has applied, up to and
    /// including `version`. Broadcasts `list_up_to_date` when the log
    /// drains.
    pub(crate) fn prune_updates(&self, state: &mut ListState, version: u64) {
        debug_assert!(version <= state.version);

        while state
            .updates
            .front()
            .map_or(false, |u| u.version_number <= version)
        {
            state.updates.pop_front();
        }

        if state.updates.is_empty() {
            self.list_up_to_date.notify_all();
        }
    }

    fn notify_trackers(&self, entry: &Entry, change: ServerChange) {
        let trackers = self.trackers.lock().unwrap();
        for tracker in trackers.iter() {
            tracker.enqueue_change(entry, change);
        }
        for tracker in trackers.iter() {
            tracker.fire_callback();
        }
    }
}
