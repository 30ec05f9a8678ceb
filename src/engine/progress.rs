use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Days of activity kept in the log; older days no longer feed any goal.
const ACTIVITY_RETENTION_DAYS: i64 = 400;

// --- Progress sets ---

/// Remembered / forgotten / excluded word ids. The three sets are pairwise
/// disjoint; every mutation is a single move between them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressSets {
    remembered: BTreeSet<u32>,
    forgotten: BTreeSet<u32>,
    excluded: BTreeSet<u32>,
}

impl ProgressSets {
    /// Rebuild from persisted lists. Overlaps can only come from a hand-edited
    /// or foreign snapshot: excluded wins, then remembered.
    pub fn from_lists(remembered: &[u32], forgotten: &[u32], excluded: &[u32]) -> Self {
        let excluded: BTreeSet<u32> = excluded.iter().copied().filter(|&id| id != 0).collect();
        let mut overlapped = false;
        let remembered: BTreeSet<u32> = remembered
            .iter()
            .copied()
            .filter(|id| *id != 0)
            .filter(|id| {
                let clash = excluded.contains(id);
                overlapped |= clash;
                !clash
            })
            .collect();
        let forgotten: BTreeSet<u32> = forgotten
            .iter()
            .copied()
            .filter(|id| *id != 0)
            .filter(|id| {
                let clash = excluded.contains(id) || remembered.contains(id);
                overlapped |= clash;
                !clash
            })
            .collect();
        if overlapped {
            warn!("progress sets overlapped; resolved in favour of excluded, then remembered");
        }
        Self {
            remembered,
            forgotten,
            excluded,
        }
    }

    pub fn mark_remembered(&mut self, id: u32) {
        self.forgotten.remove(&id);
        self.excluded.remove(&id);
        self.remembered.insert(id);
    }

    pub fn mark_forgotten(&mut self, id: u32) {
        self.remembered.remove(&id);
        self.excluded.remove(&id);
        self.forgotten.insert(id);
    }

    /// Take a word out of rotation entirely.
    pub fn exclude(&mut self, id: u32) {
        self.remembered.remove(&id);
        self.forgotten.remove(&id);
        self.excluded.insert(id);
    }

    pub fn include(&mut self, id: u32) {
        self.excluded.remove(&id);
    }

    pub fn record(&mut self, id: u32, correct: bool) {
        if correct {
            self.mark_remembered(id);
        } else {
            self.mark_forgotten(id);
        }
    }

    pub fn is_remembered(&self, id: u32) -> bool {
        self.remembered.contains(&id)
    }

    pub fn is_forgotten(&self, id: u32) -> bool {
        self.forgotten.contains(&id)
    }

    pub fn is_excluded(&self, id: u32) -> bool {
        self.excluded.contains(&id)
    }

    pub fn remembered(&self) -> &BTreeSet<u32> {
        &self.remembered
    }

    pub fn forgotten(&self) -> &BTreeSet<u32> {
        &self.forgotten
    }

    pub fn excluded(&self) -> &BTreeSet<u32> {
        &self.excluded
    }

    pub fn to_lists(&self) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
        (
            self.remembered.iter().copied().collect(),
            self.forgotten.iter().copied().collect(),
            self.excluded.iter().copied().collect(),
        )
    }

    pub fn is_disjoint(&self) -> bool {
        self.remembered.is_disjoint(&self.forgotten)
            && self.remembered.is_disjoint(&self.excluded)
            && self.forgotten.is_disjoint(&self.excluded)
    }
}

// --- Accuracy ---

/// Whole-percent share of remembered words among all answered words.
pub fn accuracy(remembered: usize, forgotten: usize) -> u32 {
    let total = remembered + forgotten;
    if total == 0 {
        return 0;
    }
    (100.0 * remembered as f64 / total as f64).round() as u32
}

// --- Streak ---

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub current: u32,
    pub best: u32,
    pub last_active_day: Option<NaiveDate>,
}

impl StreakState {
    /// Register a qualifying event on `day`. Returns true when the streak
    /// value changed.
    pub fn record_activity(&mut self, day: NaiveDate) -> bool {
        let before = self.current;
        match self.last_active_day {
            Some(last) if last == day => return false,
            // Events arriving out of order (clock skew) never rewind the streak.
            Some(last) if last > day => return false,
            Some(last) if day.signed_duration_since(last).num_days() == 1 => {
                self.current += 1;
            }
            _ => self.current = 1,
        }
        self.best = self.best.max(self.current);
        self.last_active_day = Some(day);
        before != self.current
    }

    /// Streak as it should be displayed on `today`: a streak whose last day is
    /// older than yesterday has lapsed.
    pub fn current_on(&self, today: NaiveDate) -> u32 {
        match self.last_active_day {
            Some(last) if today.signed_duration_since(last).num_days() <= 1 => self.current,
            _ => 0,
        }
    }
}

// --- Activity log ---

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    #[serde(default)]
    pub words: BTreeMap<NaiveDate, u32>,
    #[serde(default)]
    pub sessions: BTreeMap<NaiveDate, u32>,
}

impl ActivityLog {
    pub fn record_word(&mut self, day: NaiveDate) {
        *self.words.entry(day).or_default() += 1;
        self.prune(day);
    }

    pub fn record_session(&mut self, day: NaiveDate) {
        *self.sessions.entry(day).or_default() += 1;
        self.prune(day);
    }

    pub fn words_on(&self, day: NaiveDate) -> u32 {
        self.words.get(&day).copied().unwrap_or(0)
    }

    pub fn sessions_on(&self, day: NaiveDate) -> u32 {
        self.sessions.get(&day).copied().unwrap_or(0)
    }

    /// Words completed in the inclusive day range.
    pub fn words_between(&self, from: NaiveDate, to: NaiveDate) -> u32 {
        if from > to {
            return 0;
        }
        self.words.range(from..=to).map(|(_, n)| *n).sum()
    }

    fn prune(&mut self, today: NaiveDate) {
        let cutoff = today - Duration::days(ACTIVITY_RETENTION_DAYS);
        self.words.retain(|day, _| *day >= cutoff);
        self.sessions.retain(|day, _| *day >= cutoff);
    }
}

// --- Goals ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalKind {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    #[serde(rename = "type")]
    pub kind: GoalKind,
    pub target: u32,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub kind: GoalKind,
    pub current: u32,
    pub target: u32,
    /// Display ratio, clamped to `[0, 1]`. `current` is never capped.
    pub ratio: f64,
    pub completed: bool,
}

pub fn goal_progress(goal: &Goal, activity: &ActivityLog, today: NaiveDate) -> GoalProgress {
    let current = match goal.kind {
        GoalKind::Daily => activity.words_on(today),
        GoalKind::Weekly => {
            let offset = today.weekday().num_days_from_monday() as i64;
            activity.words_between(today - Duration::days(offset), today)
        }
        GoalKind::Monthly => {
            let first = today.with_day(1).unwrap_or(today);
            activity.words_between(first, today)
        }
    };
    let ratio = if goal.target == 0 {
        1.0
    } else {
        (current as f64 / goal.target as f64).clamp(0.0, 1.0)
    };
    GoalProgress {
        kind: goal.kind,
        current,
        target: goal.target,
        ratio,
        completed: current >= goal.target,
    }
}

// --- Aggregate ---

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub accuracy: u32,
    pub remembered: usize,
    pub forgotten: usize,
    pub excluded: usize,
    pub completed_words: u32,
    pub streak: u32,
    pub best_streak: u32,
    pub daily_session_count: u32,
    pub goals: Vec<GoalProgress>,
}

/// Read-only view over everything the summary is derived from.
pub struct ProgressAggregator<'a> {
    pub sets: &'a ProgressSets,
    pub streak: &'a StreakState,
    pub activity: &'a ActivityLog,
    pub goals: &'a [Goal],
    pub completed_words: u32,
}

impl ProgressAggregator<'_> {
    pub fn summarize(&self, today: NaiveDate) -> ProgressSummary {
        ProgressSummary {
            accuracy: accuracy(self.sets.remembered().len(), self.sets.forgotten().len()),
            remembered: self.sets.remembered().len(),
            forgotten: self.sets.forgotten().len(),
            excluded: self.sets.excluded().len(),
            completed_words: self.completed_words,
            streak: self.streak.current_on(today),
            best_streak: self.streak.best,
            daily_session_count: self.activity.sessions_on(today),
            goals: self
                .goals
                .iter()
                .filter(|g| g.is_active)
                .map(|g| goal_progress(g, self.activity, today))
                .collect(),
        }
    }
}
