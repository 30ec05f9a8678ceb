use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::DifficultyTier;
use crate::engine::progress::{ActivityLog, Goal, StreakState};
use crate::engine::word_history::WordHistoryEntry;

pub const SCHEMA_VERSION: u32 = 1;

/// Merge granularity for the snapshot. A write or a cross-writer merge always
/// replaces whole groups, never single fields inside one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    /// Progress sets, counters, streak and activity log.
    Progress,
    WordHistory,
    /// Active category, session number and position inside the batch.
    Position,
    Dashboard,
    Goals,
}

impl FieldGroup {
    pub fn all() -> &'static [FieldGroup] {
        &[
            FieldGroup::Progress,
            FieldGroup::WordHistory,
            FieldGroup::Position,
            FieldGroup::Dashboard,
            FieldGroup::Goals,
        ]
    }
}

/// The single consolidated document persisted per learner profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub schema_version: u32,
    pub last_saved_at_ms: i64,
    #[serde(default)]
    pub writer_id: String,
    pub active_category: String,
    pub session_number: u32,
    pub remembered: Vec<u32>,
    pub forgotten: Vec<u32>,
    pub excluded: Vec<u32>,
    pub word_history: BTreeMap<u32, WordHistoryEntry>,
    pub dashboard_stage: DifficultyTier,
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub completed_words: u32,
    #[serde(default)]
    pub streak: StreakState,
    #[serde(default)]
    pub activity: ActivityLog,
    #[serde(default)]
    pub current_batch: Vec<u32>,
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub group_stamps: BTreeMap<FieldGroup, i64>,
}

impl Default for PersistedSnapshot {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_saved_at_ms: 0,
            writer_id: String::new(),
            active_category: String::new(),
            session_number: 0,
            remembered: Vec::new(),
            forgotten: Vec::new(),
            excluded: Vec::new(),
            word_history: BTreeMap::new(),
            dashboard_stage: DifficultyTier::Easy,
            goals: Vec::new(),
            completed_words: 0,
            streak: StreakState::default(),
            activity: ActivityLog::default(),
            current_batch: Vec::new(),
            cursor: 0,
            group_stamps: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressGroup {
    pub remembered: Vec<u32>,
    pub forgotten: Vec<u32>,
    pub excluded: Vec<u32>,
    pub completed_words: u32,
    pub streak: StreakState,
    pub activity: ActivityLog,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PositionGroup {
    pub active_category: String,
    pub session_number: u32,
    pub current_batch: Vec<u32>,
    pub cursor: usize,
}

/// Partial update handed to the persistence coordinator. `None` groups are
/// left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotPatch {
    pub progress: Option<ProgressGroup>,
    pub word_history: Option<BTreeMap<u32, WordHistoryEntry>>,
    pub position: Option<PositionGroup>,
    pub dashboard: Option<DifficultyTier>,
    pub goals: Option<Vec<Goal>>,
}

impl SnapshotPatch {
    pub fn groups(&self) -> Vec<FieldGroup> {
        let mut groups = Vec::new();
        if self.progress.is_some() {
            groups.push(FieldGroup::Progress);
        }
        if self.word_history.is_some() {
            groups.push(FieldGroup::WordHistory);
        }
        if self.position.is_some() {
            groups.push(FieldGroup::Position);
        }
        if self.dashboard.is_some() {
            groups.push(FieldGroup::Dashboard);
        }
        if self.goals.is_some() {
            groups.push(FieldGroup::Goals);
        }
        groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups().is_empty()
    }
}

impl PersistedSnapshot {
    pub fn is_current_schema(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }

    pub fn group_stamp(&self, group: FieldGroup) -> i64 {
        self.group_stamps.get(&group).copied().unwrap_or(0)
    }

    /// Any learning recorded at all. Snapshots without it are not worth
    /// restoring.
    pub fn has_progress(&self) -> bool {
        self.completed_words > 0
            || !self.remembered.is_empty()
            || !self.forgotten.is_empty()
            || !self.word_history.is_empty()
    }

    /// Replace every group present in the patch and stamp it. Returns the
    /// groups that were touched.
    pub fn apply_patch(&mut self, patch: SnapshotPatch, stamp: i64) -> Vec<FieldGroup> {
        let groups = patch.groups();
        if let Some(progress) = patch.progress {
            self.remembered = progress.remembered;
            self.forgotten = progress.forgotten;
            self.excluded = progress.excluded;
            self.completed_words = progress.completed_words;
            self.streak = progress.streak;
            self.activity = progress.activity;
        }
        if let Some(history) = patch.word_history {
            self.word_history = history;
        }
        if let Some(position) = patch.position {
            self.active_category = position.active_category;
            self.session_number = position.session_number;
            self.current_batch = position.current_batch;
            self.cursor = position.cursor;
        }
        if let Some(stage) = patch.dashboard {
            self.dashboard_stage = stage;
        }
        if let Some(goals) = patch.goals {
            self.goals = goals;
        }
        for &group in &groups {
            self.group_stamps.insert(group, stamp);
        }
        groups
    }

    /// Copy one group (and its stamp) from `other`.
    pub fn copy_group_from(&mut self, other: &PersistedSnapshot, group: FieldGroup) {
        match group {
            FieldGroup::Progress => {
                self.remembered = other.remembered.clone();
                self.forgotten = other.forgotten.clone();
                self.excluded = other.excluded.clone();
                self.completed_words = other.completed_words;
                self.streak = other.streak.clone();
                self.activity = other.activity.clone();
            }
            FieldGroup::WordHistory => self.word_history = other.word_history.clone(),
            FieldGroup::Position => {
                self.active_category = other.active_category.clone();
                self.session_number = other.session_number;
                self.current_batch = other.current_batch.clone();
                self.cursor = other.cursor;
            }
            FieldGroup::Dashboard => self.dashboard_stage = other.dashboard_stage,
            FieldGroup::Goals => self.goals = other.goals.clone(),
        }
        self.group_stamps.insert(group, other.group_stamp(group));
    }

    pub fn progress_group(&self) -> ProgressGroup {
        ProgressGroup {
            remembered: self.remembered.clone(),
            forgotten: self.forgotten.clone(),
            excluded: self.excluded.clone(),
            completed_words: self.completed_words,
            streak: self.streak.clone(),
            activity: self.activity.clone(),
        }
    }

    pub fn position_group(&self) -> PositionGroup {
        PositionGroup {
            active_category: self.active_category.clone(),
            session_number: self.session_number,
            current_batch: self.current_batch.clone(),
            cursor: self.cursor,
        }
    }
}
