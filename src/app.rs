use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::analytics::{OutcomeEvent, OutcomeSink};
use crate::catalog::{DifficultyTier, WordCatalog, WordItem};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::engine::EngineError;
use crate::engine::dashboard::{DashboardProgress, DashboardSessionGenerator, needs_regeneration};
use crate::engine::progress::{
    ActivityLog, Goal, ProgressAggregator, ProgressSets, ProgressSummary, StreakState,
};
use crate::engine::scheduler::{AggregateStats, SchedulerSettings, SessionInfo, SessionWordScheduler};
use crate::engine::word_history::{WordHistoryEntry, WordHistoryStore};
use crate::session::lifecycle::{
    ReconciliationTrigger, SessionLifecycleManager, SessionStart, TriggerOutcome,
};
use crate::store::backend::StorageBackend;
use crate::store::coordinator::{
    FlushResult, PersistenceCoordinator, PersistenceSettings, SavePriority,
};
use crate::store::schema::{FieldGroup, PersistedSnapshot, PositionGroup, ProgressGroup, SnapshotPatch};

/// Pseudo-category that switches to cross-category dashboard batches.
pub const DASHBOARD_CATEGORY: &str = "dashboard";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartKind {
    Restored,
    Fresh,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnswerOutcome {
    pub entry: WordHistoryEntry,
    /// A new batch was generated as a consequence of this answer.
    pub regenerated: bool,
    pub save: FlushResult,
}

pub struct App {
    pub config: Config,
    catalog: Arc<dyn WordCatalog>,
    clock: SharedClock,
    history: WordHistoryStore,
    progress: ProgressSets,
    streak: StreakState,
    activity: ActivityLog,
    goals: Vec<Goal>,
    completed_words: u32,
    dashboard_stage: DifficultyTier,
    active_category: String,
    session_number: u32,
    batch: Vec<WordItem>,
    cursor: usize,
    last_info: Option<SessionInfo>,
    start_kind: StartKind,
    scheduler: SessionWordScheduler,
    dashboard: DashboardSessionGenerator,
    lifecycle: SessionLifecycleManager,
    sink: Box<dyn OutcomeSink>,
}

impl App {
    /// Build the engine and bring the session up: restore the stored session
    /// when recent, otherwise start fresh.
    pub fn new(
        config: Config,
        catalog: Arc<dyn WordCatalog>,
        backend: Box<dyn StorageBackend>,
        clock: SharedClock,
        sink: Box<dyn OutcomeSink>,
    ) -> Self {
        let settings = SchedulerSettings::from(&config);
        let coordinator = PersistenceCoordinator::new(
            backend,
            Arc::clone(&clock),
            PersistenceSettings::from(&config),
        );
        let lifecycle =
            SessionLifecycleManager::new(coordinator, Arc::clone(&clock), config.restore_window_ms());

        let mut app = Self {
            history: WordHistoryStore::new(config.mastery_half_life_days),
            progress: ProgressSets::default(),
            streak: StreakState::default(),
            activity: ActivityLog::default(),
            goals: config.goals.clone(),
            completed_words: 0,
            dashboard_stage: DifficultyTier::Easy,
            active_category: config.default_category.clone(),
            session_number: 1,
            batch: Vec::new(),
            cursor: 0,
            last_info: None,
            start_kind: StartKind::Fresh,
            scheduler: SessionWordScheduler::new(
                Arc::clone(&catalog),
                settings.clone(),
                Arc::clone(&clock),
            ),
            dashboard: DashboardSessionGenerator::new(Arc::clone(&catalog), settings, Arc::clone(&clock)),
            lifecycle,
            catalog,
            clock,
            sink,
            config,
        };
        app.start();
        app
    }

    fn start(&mut self) {
        match self.lifecycle.initialize() {
            SessionStart::Restored(snapshot) => {
                self.start_kind = StartKind::Restored;
                self.apply_groups(&snapshot, FieldGroup::all());
                if self.remaining() == 0 {
                    self.advance_session();
                    self.save(self.position_patch(), SavePriority::High);
                }
            }
            SessionStart::Fresh(previous) => {
                self.start_kind = StartKind::Fresh;
                if let Some(snapshot) = previous {
                    // Learning carries over; only the position starts over.
                    self.apply_groups(
                        &snapshot,
                        &[
                            FieldGroup::Progress,
                            FieldGroup::WordHistory,
                            FieldGroup::Dashboard,
                        ],
                    );
                    self.session_number = snapshot.session_number;
                    self.advance_session();
                } else {
                    self.regenerate();
                }
                self.save(self.full_patch(), SavePriority::Medium);
            }
        }
        if self.snapshot().goals != self.goals {
            debug!("stored goals differ from config, refreshing");
            let patch = SnapshotPatch {
                goals: Some(self.goals.clone()),
                ..SnapshotPatch::default()
            };
            self.save(patch, SavePriority::Low);
        }
        info!(
            kind = ?self.start_kind,
            category = %self.active_category,
            session = self.session_number,
            words = self.batch.len(),
            "session started"
        );
    }

    pub fn start_kind(&self) -> StartKind {
        self.start_kind
    }

    pub fn active_category(&self) -> &str {
        &self.active_category
    }

    pub fn is_dashboard(&self) -> bool {
        self.active_category == DASHBOARD_CATEGORY
    }

    pub fn session_number(&self) -> u32 {
        self.session_number
    }

    pub fn batch(&self) -> &[WordItem] {
        &self.batch
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.batch.len().saturating_sub(self.cursor)
    }

    pub fn current_word(&self) -> Option<&WordItem> {
        self.batch.get(self.cursor)
    }

    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.last_info.as_ref()
    }

    pub fn history(&self) -> &WordHistoryStore {
        &self.history
    }

    pub fn progress(&self) -> &ProgressSets {
        &self.progress
    }

    pub fn completed_words(&self) -> u32 {
        self.completed_words
    }

    pub fn dashboard_stage(&self) -> DifficultyTier {
        self.dashboard_stage
    }

    pub fn catalog(&self) -> &dyn WordCatalog {
        self.catalog.as_ref()
    }

    pub fn snapshot(&self) -> &PersistedSnapshot {
        self.lifecycle.snapshot()
    }

    /// Exhaustion of the active category against current history.
    pub fn exhaustion_level(&self) -> f64 {
        self.scheduler
            .exhaustion_level(&self.active_category, &self.history, &self.progress)
    }

    pub fn summary(&self) -> ProgressSummary {
        ProgressAggregator {
            sets: &self.progress,
            streak: &self.streak,
            activity: &self.activity,
            goals: &self.goals,
            completed_words: self.completed_words,
        }
        .summarize(self.clock.today())
    }

    /// Record one answer. Unknown ids are rejected before anything changes.
    pub fn answer(&mut self, word_id: u32, correct: bool) -> Result<AnswerOutcome, EngineError> {
        let word = self
            .catalog
            .word(word_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown word id {word_id}")))?;

        let now = self.clock.now_ms();
        let today = self.clock.today();
        let entry = self.history.record_outcome(word_id, correct, now)?;

        self.progress.record(word_id, correct);
        let previous_completed = self.completed_words;
        self.completed_words += 1;
        self.activity.record_word(today);
        self.streak.record_activity(today);

        if self.current_word().is_some_and(|w| w.id == word_id) {
            self.cursor += 1;
        }

        self.sink.record(&OutcomeEvent {
            word_id,
            correct,
            category: word.category,
            session_number: self.session_number,
            mastery_score: entry.mastery_score,
            at: DateTime::<Utc>::from_timestamp_millis(now).unwrap_or_default(),
        });

        let regenerated = self.remaining() == 0
            || (self.is_dashboard()
                && needs_regeneration(
                    previous_completed,
                    self.completed_words,
                    self.config.regeneration_interval,
                ));
        if regenerated {
            self.advance_session();
        }

        let mut patch = SnapshotPatch {
            progress: Some(self.progress_group()),
            word_history: Some(self.history.entries().clone()),
            position: Some(self.position_group()),
            ..SnapshotPatch::default()
        };
        if regenerated && self.is_dashboard() {
            patch.dashboard = Some(self.dashboard_stage);
        }
        let priority = if regenerated {
            SavePriority::High
        } else {
            SavePriority::Medium
        };
        let save = self.save(patch, priority);

        Ok(AnswerOutcome {
            entry,
            regenerated,
            save,
        })
    }

    /// Switch categories (or to [`DASHBOARD_CATEGORY`]) and start a new batch.
    pub fn select_category(&mut self, category: &str) -> Result<(), EngineError> {
        if category != DASHBOARD_CATEGORY && !self.catalog.categories().iter().any(|c| c == category) {
            return Err(EngineError::InvalidInput(format!("unknown category `{category}`")));
        }
        if category == self.active_category {
            return Ok(());
        }
        self.active_category = category.to_string();
        self.advance_session();
        let mut patch = self.position_patch();
        if self.is_dashboard() {
            patch.dashboard = Some(self.dashboard_stage);
        }
        self.save(patch, SavePriority::High);
        Ok(())
    }

    /// Erase all stored and in-memory learning state and begin again at
    /// session one.
    pub fn start_new_session(&mut self) -> Result<(), EngineError> {
        self.lifecycle.start_new_session()?;
        self.history = WordHistoryStore::new(self.config.mastery_half_life_days);
        self.progress = ProgressSets::default();
        self.streak = StreakState::default();
        self.activity = ActivityLog::default();
        self.goals = self.config.goals.clone();
        self.completed_words = 0;
        self.dashboard_stage = DifficultyTier::Easy;
        self.session_number = 1;
        self.lifecycle.begin_fresh()?;
        self.regenerate();
        self.save(self.full_patch(), SavePriority::High);
        info!("started a new session");
        Ok(())
    }

    /// Route a host event through the lifecycle and fold any merged groups
    /// back into the in-memory state.
    pub fn handle_trigger(&mut self, trigger: ReconciliationTrigger) -> TriggerOutcome {
        let outcome = self.lifecycle.handle_trigger(trigger);
        let mut groups = self.lifecycle.take_absorbed();
        if let TriggerOutcome::Reconciled(merged) = &outcome {
            for group in merged {
                if !groups.contains(group) {
                    groups.push(*group);
                }
            }
        }
        self.fold_remote(&groups);
        outcome
    }

    pub fn shutdown(&mut self) -> TriggerOutcome {
        self.handle_trigger(ReconciliationTrigger::Shutdown)
    }

    fn advance_session(&mut self) {
        self.session_number += 1;
        self.regenerate();
    }

    fn regenerate(&mut self) {
        let selection = if self.is_dashboard() {
            let view = DashboardProgress {
                history: &self.history,
                progress: &self.progress,
                completed_words: self.completed_words,
            };
            let selection = self
                .dashboard
                .generate_dashboard_session(&view, self.session_number);
            self.dashboard_stage = selection.session_info.difficulty_tier;
            selection
        } else {
            self.scheduler.generate_session(
                &self.active_category,
                &self.history,
                &self.progress,
                &AggregateStats {
                    completed_words: self.completed_words,
                },
                self.session_number,
            )
        };
        self.batch = selection.words;
        self.cursor = 0;
        self.last_info = Some(selection.session_info);
        self.activity.record_session(self.clock.today());
    }

    fn save(&mut self, patch: SnapshotPatch, priority: SavePriority) -> FlushResult {
        let result = self.lifecycle.persist(patch, priority);
        let absorbed = self.lifecycle.take_absorbed();
        self.fold_remote(&absorbed);
        result
    }

    fn fold_remote(&mut self, groups: &[FieldGroup]) {
        if groups.is_empty() {
            return;
        }
        let snapshot = self.lifecycle.snapshot().clone();
        self.apply_groups(&snapshot, groups);
        debug!(?groups, "applied groups from another writer");
    }

    fn apply_groups(&mut self, snapshot: &PersistedSnapshot, groups: &[FieldGroup]) {
        for group in groups {
            match group {
                FieldGroup::Progress => {
                    self.progress = ProgressSets::from_lists(
                        &snapshot.remembered,
                        &snapshot.forgotten,
                        &snapshot.excluded,
                    );
                    self.completed_words = snapshot.completed_words;
                    self.streak = snapshot.streak.clone();
                    self.activity = snapshot.activity.clone();
                }
                FieldGroup::WordHistory => {
                    self.history = WordHistoryStore::from_entries(
                        snapshot.word_history.clone(),
                        self.config.mastery_half_life_days,
                    );
                }
                FieldGroup::Position => {
                    if !snapshot.active_category.is_empty() {
                        self.active_category = snapshot.active_category.clone();
                    }
                    self.session_number = snapshot.session_number.max(1);
                    self.batch = snapshot
                        .current_batch
                        .iter()
                        .filter_map(|&id| self.catalog.word(id))
                        .collect();
                    self.cursor = snapshot.cursor.min(self.batch.len());
                    self.last_info = None;
                }
                FieldGroup::Dashboard => self.dashboard_stage = snapshot.dashboard_stage,
                // Goals belong to the config; the stored copy is only a mirror.
                FieldGroup::Goals => {}
            }
        }
    }

    fn progress_group(&self) -> ProgressGroup {
        let (remembered, forgotten, excluded) = self.progress.to_lists();
        ProgressGroup {
            remembered,
            forgotten,
            excluded,
            completed_words: self.completed_words,
            streak: self.streak.clone(),
            activity: self.activity.clone(),
        }
    }

    fn position_group(&self) -> PositionGroup {
        PositionGroup {
            active_category: self.active_category.clone(),
            session_number: self.session_number,
            current_batch: self.batch.iter().map(|w| w.id).collect(),
            cursor: self.cursor,
        }
    }

    fn position_patch(&self) -> SnapshotPatch {
        SnapshotPatch {
            // Generating a batch bumps the daily session count.
            progress: Some(self.progress_group()),
            position: Some(self.position_group()),
            ..SnapshotPatch::default()
        }
    }

    fn full_patch(&self) -> SnapshotPatch {
        SnapshotPatch {
            progress: Some(self.progress_group()),
            word_history: Some(self.history.entries().clone()),
            position: Some(self.position_group()),
            dashboard: Some(self.dashboard_stage),
            goals: Some(self.goals.clone()),
        }
    }
}
