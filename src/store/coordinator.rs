use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::store::backend::{StorageBackend, StoreError};
use crate::store::schema::{FieldGroup, PersistedSnapshot, SCHEMA_VERSION, SnapshotPatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SavePriority {
    Low,
    Medium,
    /// Bypasses the debounce window and flushes immediately.
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistenceSettings {
    /// Coalescing window for medium-priority saves.
    pub debounce_ms: u64,
    /// Low-priority saves wait `debounce_ms * low_priority_factor`.
    pub low_priority_factor: u32,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            low_priority_factor: 3,
        }
    }
}

impl From<&Config> for PersistenceSettings {
    fn from(config: &Config) -> Self {
        Self {
            debounce_ms: config.debounce_ms,
            low_priority_factor: config.low_priority_factor,
        }
    }
}

impl PersistenceSettings {
    fn window_ms(&self, priority: SavePriority) -> i64 {
        let debounce = i64::try_from(self.debounce_ms).unwrap_or(i64::MAX);
        match priority {
            SavePriority::High => 0,
            SavePriority::Medium => debounce,
            SavePriority::Low => debounce.saturating_mul(i64::from(self.low_priority_factor)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushResult {
    /// Nothing was pending.
    Clean,
    Written,
    /// The write failed; the pending groups stay queued for the next cycle.
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub writes: u64,
    pub failed_writes: u64,
    pub coalesced_saves: u64,
    pub reconciliations: u64,
}

/// Owns the in-memory snapshot of one writer and decides when it reaches
/// storage.
///
/// Saves are queued per field group with the highest priority requested so
/// far; one debounce deadline covers the whole queue. The in-memory snapshot
/// is authoritative for this writer until a write succeeds.
pub struct PersistenceCoordinator {
    backend: Box<dyn StorageBackend>,
    clock: SharedClock,
    settings: PersistenceSettings,
    writer_id: String,
    local: PersistedSnapshot,
    pending: BTreeMap<FieldGroup, SavePriority>,
    deadline_ms: Option<i64>,
    last_stamp: i64,
    /// Groups pulled in from other writers during flushes, not yet reported.
    absorbed: Vec<FieldGroup>,
    stats: PersistenceStats,
}

impl PersistenceCoordinator {
    pub fn new(
        backend: Box<dyn StorageBackend>,
        clock: SharedClock,
        settings: PersistenceSettings,
    ) -> Self {
        let writer_id = format!("{:016x}", rand::thread_rng().r#gen::<u64>());
        Self {
            backend,
            clock,
            settings,
            writer_id,
            local: PersistedSnapshot::default(),
            pending: BTreeMap::new(),
            deadline_ms: None,
            last_stamp: 0,
            absorbed: Vec::new(),
            stats: PersistenceStats::default(),
        }
    }

    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    pub fn snapshot(&self) -> &PersistedSnapshot {
        &self.local
    }

    pub fn stats(&self) -> PersistenceStats {
        self.stats
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn deadline_ms(&self) -> Option<i64> {
        self.deadline_ms
    }

    /// Groups merged from other writers as a side effect of flushing since the
    /// last call. The caller folds these back into its own state.
    pub fn take_absorbed(&mut self) -> Vec<FieldGroup> {
        std::mem::take(&mut self.absorbed)
    }

    /// Make `snapshot` the in-memory state, e.g. after a restore.
    pub fn adopt(&mut self, snapshot: PersistedSnapshot) {
        self.last_stamp = self.last_stamp.max(
            snapshot
                .group_stamps
                .values()
                .copied()
                .max()
                .unwrap_or(0),
        );
        self.local = snapshot;
    }

    /// Merge `patch` into the in-memory snapshot and schedule its write.
    pub fn queue_save(&mut self, patch: SnapshotPatch, priority: SavePriority) -> FlushResult {
        if patch.is_empty() {
            return FlushResult::Clean;
        }
        let stamp = self.next_stamp();
        let touched = self.local.apply_patch(patch, stamp);
        let before = self.pending.len();
        for group in touched {
            let entry = self.pending.entry(group).or_insert(priority);
            *entry = (*entry).max(priority);
        }
        if self.pending.len() == before {
            self.stats.coalesced_saves += 1;
        }

        if priority == SavePriority::High {
            return self.flush();
        }
        let due = self
            .clock
            .now_ms()
            .saturating_add(self.settings.window_ms(priority));
        self.deadline_ms = Some(self.deadline_ms.map_or(due, |d| d.min(due)));
        FlushResult::Clean
    }

    /// Debounce timer tick. Flushes when the deadline has passed.
    pub fn poll(&mut self) -> FlushResult {
        match self.deadline_ms {
            Some(deadline) if self.clock.now_ms() >= deadline => self.flush(),
            _ => FlushResult::Clean,
        }
    }

    /// Write everything pending now, regardless of the deadline. Call before
    /// the host goes away.
    pub fn force_sync(&mut self) -> FlushResult {
        self.flush()
    }

    /// Stored snapshot, or `None` when missing, unreadable, corrupt or from
    /// another schema version.
    pub fn load_session(&self) -> Option<PersistedSnapshot> {
        let raw = match self.backend.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(%err, "snapshot read failed");
                return None;
            }
        };
        match serde_json::from_str::<PersistedSnapshot>(&raw) {
            Ok(snapshot) if snapshot.is_current_schema() => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    found = snapshot.schema_version,
                    expected = SCHEMA_VERSION,
                    "ignoring snapshot with foreign schema version"
                );
                None
            }
            Err(err) => {
                warn!(%err, "ignoring corrupt snapshot");
                None
            }
        }
    }

    /// Erase the stored snapshot and reset in-memory state.
    pub fn clear_session(&mut self) {
        if let Err(err) = self.backend.clear() {
            warn!(%err, "clearing stored snapshot failed");
        }
        // The wipe is itself a write: later saves must still sort after every
        // earlier one, or other writers would ignore the reset.
        let floor = self.local.last_saved_at_ms.max(self.last_stamp);
        self.local = PersistedSnapshot {
            last_saved_at_ms: floor,
            ..PersistedSnapshot::default()
        };
        self.pending.clear();
        self.absorbed.clear();
        self.deadline_ms = None;
        info!(writer = %self.writer_id, "session cleared");
    }

    /// Pull in groups another writer saved more recently. Returns the groups
    /// that changed locally.
    pub fn reconcile(&mut self) -> Vec<FieldGroup> {
        let Some(remote) = self.load_session() else {
            return Vec::new();
        };
        if remote.last_saved_at_ms <= self.local.last_saved_at_ms {
            return Vec::new();
        }

        let mut merged = Vec::new();
        for &group in FieldGroup::all() {
            if remote.group_stamp(group) > self.local.group_stamp(group) {
                self.local.copy_group_from(&remote, group);
                self.pending.remove(&group);
                merged.push(group);
            }
        }
        self.local.last_saved_at_ms = remote.last_saved_at_ms;
        self.last_stamp = self.last_stamp.max(remote.last_saved_at_ms);
        if self.pending.is_empty() {
            self.deadline_ms = None;
        }
        self.stats.reconciliations += 1;
        debug!(
            remote_writer = %remote.writer_id,
            ?merged,
            "reconciled with newer stored snapshot"
        );
        merged
    }

    fn flush(&mut self) -> FlushResult {
        if self.pending.is_empty() {
            self.deadline_ms = None;
            return FlushResult::Clean;
        }
        // Absorb newer groups from other writers first so this write does not
        // roll them back.
        for group in self.reconcile() {
            if !self.absorbed.contains(&group) {
                self.absorbed.push(group);
            }
        }

        let now = self.clock.now_ms();
        let mut candidate = self.local.clone();
        candidate.schema_version = SCHEMA_VERSION;
        candidate.writer_id = self.writer_id.clone();
        candidate.last_saved_at_ms = now.max(self.local.last_saved_at_ms + 1);

        match self.write_snapshot(&candidate) {
            Ok(()) => {
                debug!(
                    groups = self.pending.len(),
                    saved_at = candidate.last_saved_at_ms,
                    "snapshot written"
                );
                self.local = candidate;
                self.last_stamp = self.last_stamp.max(self.local.last_saved_at_ms);
                self.pending.clear();
                self.deadline_ms = None;
                self.stats.writes += 1;
                FlushResult::Written
            }
            Err(err) => {
                warn!(%err, "snapshot write failed, keeping in-memory state");
                self.stats.failed_writes += 1;
                self.deadline_ms =
                    Some(now.saturating_add(self.settings.window_ms(SavePriority::Medium)));
                FlushResult::Failed
            }
        }
    }

    fn write_snapshot(&self, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        self.backend.write(&payload)
    }

    fn next_stamp(&mut self) -> i64 {
        let stamp = self.clock.now_ms().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        stamp
    }
}
