use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::engine::EngineError;
use crate::store::coordinator::{FlushResult, PersistenceCoordinator, SavePriority};
use crate::store::schema::{FieldGroup, PersistedSnapshot, SnapshotPatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    AutoRestoring,
    FreshInitialized,
    Active,
    Cleared,
}

/// How the session came up.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionStart {
    /// A recent snapshot with progress was resumed as-is.
    Restored(PersistedSnapshot),
    /// Fresh start. Carries the stored snapshot when one was readable but too
    /// old (or empty) to resume.
    Fresh(Option<PersistedSnapshot>),
}

/// Host events that may require a flush or a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconciliationTrigger {
    Hidden,
    Blur,
    Shutdown,
    Focus,
    StorageChanged,
    /// Debounce timer tick.
    Tick,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    Idle,
    Flushed,
    FlushFailed,
    Reconciled(Vec<FieldGroup>),
}

impl From<FlushResult> for TriggerOutcome {
    fn from(result: FlushResult) -> Self {
        match result {
            FlushResult::Clean => TriggerOutcome::Idle,
            FlushResult::Written => TriggerOutcome::Flushed,
            FlushResult::Failed => TriggerOutcome::FlushFailed,
        }
    }
}

pub struct SessionLifecycleManager {
    coordinator: PersistenceCoordinator,
    clock: SharedClock,
    restore_window_ms: i64,
    state: LifecycleState,
}

impl SessionLifecycleManager {
    pub fn new(coordinator: PersistenceCoordinator, clock: SharedClock, restore_window_ms: i64) -> Self {
        Self {
            coordinator,
            clock,
            restore_window_ms,
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn coordinator(&self) -> &PersistenceCoordinator {
        &self.coordinator
    }

    pub fn snapshot(&self) -> &PersistedSnapshot {
        self.coordinator.snapshot()
    }

    pub fn take_absorbed(&mut self) -> Vec<FieldGroup> {
        self.coordinator.take_absorbed()
    }

    /// Resume the stored session when it is recent and has progress,
    /// otherwise start fresh. Always ends `Active`.
    pub fn initialize(&mut self) -> SessionStart {
        let now = self.clock.now_ms();
        let stored = self.coordinator.load_session();

        let start = match stored {
            Some(snapshot)
                if snapshot.has_progress()
                    && now - snapshot.last_saved_at_ms <= self.restore_window_ms =>
            {
                self.state = LifecycleState::AutoRestoring;
                info!(
                    session = snapshot.session_number,
                    age_ms = now - snapshot.last_saved_at_ms,
                    "restoring previous session"
                );
                self.coordinator.adopt(snapshot.clone());
                SessionStart::Restored(snapshot)
            }
            other => {
                self.state = LifecycleState::FreshInitialized;
                if let Some(snapshot) = &other {
                    debug!(
                        age_ms = now - snapshot.last_saved_at_ms,
                        "stored session too old or empty, starting fresh"
                    );
                    self.coordinator.adopt(snapshot.clone());
                }
                SessionStart::Fresh(other)
            }
        };
        self.state = LifecycleState::Active;
        start
    }

    /// Discard the stored session. Follow with [`begin_fresh`](Self::begin_fresh).
    pub fn start_new_session(&mut self) -> Result<(), EngineError> {
        if self.state != LifecycleState::Active {
            return Err(EngineError::InvalidInput(format!(
                "cannot start a new session from {:?}",
                self.state
            )));
        }
        self.coordinator.clear_session();
        self.state = LifecycleState::Cleared;
        Ok(())
    }

    pub fn begin_fresh(&mut self) -> Result<(), EngineError> {
        if self.state != LifecycleState::Cleared {
            return Err(EngineError::InvalidInput(format!(
                "cannot begin a fresh session from {:?}",
                self.state
            )));
        }
        self.state = LifecycleState::FreshInitialized;
        self.state = LifecycleState::Active;
        Ok(())
    }

    /// Queue a save. Ignored unless the session is active.
    pub fn persist(&mut self, patch: SnapshotPatch, priority: SavePriority) -> FlushResult {
        if self.state != LifecycleState::Active {
            debug!(state = ?self.state, "save ignored outside an active session");
            return FlushResult::Clean;
        }
        self.coordinator.queue_save(patch, priority)
    }

    pub fn handle_trigger(&mut self, trigger: ReconciliationTrigger) -> TriggerOutcome {
        if trigger == ReconciliationTrigger::Tick {
            return self.coordinator.poll().into();
        }
        if self.state != LifecycleState::Active {
            return TriggerOutcome::Idle;
        }
        match trigger {
            ReconciliationTrigger::Hidden
            | ReconciliationTrigger::Blur
            | ReconciliationTrigger::Shutdown => self.coordinator.force_sync().into(),
            ReconciliationTrigger::Focus | ReconciliationTrigger::StorageChanged => {
                let merged = self.coordinator.reconcile();
                if merged.is_empty() {
                    TriggerOutcome::Idle
                } else {
                    TriggerOutcome::Reconciled(merged)
                }
            }
            ReconciliationTrigger::Tick => TriggerOutcome::Idle,
        }
    }
}
