use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;

const MS_PER_DAY: f64 = 86_400_000.0;
const DEFAULT_HALF_LIFE_DAYS: f64 = 14.0;
/// Share of the mastery score carried by the consecutive-correct streak.
const STREAK_WEIGHT: f64 = 0.7;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordHistoryEntry {
    pub word_id: u32,
    pub times_seen: u32,
    pub times_correct: u32,
    pub consecutive_correct: u32,
    pub last_seen_at_ms: i64,
    pub mastery_score: f64,
}

impl WordHistoryEntry {
    fn new(word_id: u32) -> Self {
        Self {
            word_id,
            ..Self::default()
        }
    }

    pub fn is_seen(&self) -> bool {
        self.times_seen > 0
    }
}

/// Append-only exposure ledger, one entry per word ever shown.
#[derive(Clone, Debug)]
pub struct WordHistoryStore {
    entries: BTreeMap<u32, WordHistoryEntry>,
    half_life_days: f64,
}

impl Default for WordHistoryStore {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

impl WordHistoryStore {
    pub fn new(half_life_days: f64) -> Self {
        Self {
            half_life_days,
            ..Self::default()
        }
    }

    pub fn from_entries(entries: BTreeMap<u32, WordHistoryEntry>, half_life_days: f64) -> Self {
        let entries = entries
            .into_iter()
            .filter(|(id, _)| *id != 0)
            .map(|(id, mut entry)| {
                entry.word_id = id;
                entry.mastery_score = clamp_unit(entry.mastery_score);
                (id, entry)
            })
            .collect();
        Self {
            entries,
            half_life_days,
        }
    }

    pub fn record_outcome(
        &mut self,
        word_id: u32,
        correct: bool,
        now_ms: i64,
    ) -> Result<WordHistoryEntry, EngineError> {
        if word_id == 0 {
            return Err(EngineError::InvalidInput("word id must be non-zero".into()));
        }

        let half_life = self.half_life_days;
        let entry = self
            .entries
            .entry(word_id)
            .or_insert_with(|| WordHistoryEntry::new(word_id));

        let staleness_ms = if entry.is_seen() {
            (now_ms - entry.last_seen_at_ms).max(0)
        } else {
            0
        };

        entry.times_seen += 1;
        if correct {
            entry.times_correct += 1;
            entry.consecutive_correct += 1;
        } else {
            entry.consecutive_correct = 0;
        }
        entry.last_seen_at_ms = entry.last_seen_at_ms.max(now_ms);
        entry.mastery_score = mastery_score(
            entry.consecutive_correct,
            entry.times_correct,
            entry.times_seen,
            staleness_ms,
            half_life,
        );

        Ok(entry.clone())
    }

    pub fn entry(&self, word_id: u32) -> WordHistoryEntry {
        self.entries
            .get(&word_id)
            .cloned()
            .unwrap_or_else(|| WordHistoryEntry::new(word_id))
    }

    pub fn get(&self, word_id: u32) -> Option<&WordHistoryEntry> {
        self.entries.get(&word_id)
    }

    /// Stored mastery decayed by the time elapsed since the word was last seen.
    pub fn mastery_at(&self, word_id: u32, now_ms: i64) -> f64 {
        match self.entries.get(&word_id) {
            Some(entry) if entry.is_seen() => {
                let elapsed = (now_ms - entry.last_seen_at_ms).max(0);
                clamp_unit(entry.mastery_score * decay(elapsed, self.half_life_days))
            }
            _ => 0.0,
        }
    }

    pub fn is_seen(&self, word_id: u32) -> bool {
        self.entries.get(&word_id).is_some_and(|e| e.is_seen())
    }

    /// Ids shown at least once, ascending.
    pub fn seen_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .values()
            .filter(|e| e.is_seen())
            .map(|e| e.word_id)
    }

    pub fn entries(&self) -> &BTreeMap<u32, WordHistoryEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rewards the current run of correct answers (saturating towards 1), blends
/// in lifetime accuracy, then decays by how stale the word was when answered.
pub fn mastery_score(
    consecutive_correct: u32,
    times_correct: u32,
    times_seen: u32,
    staleness_ms: i64,
    half_life_days: f64,
) -> f64 {
    if times_seen == 0 {
        return 0.0;
    }
    let streak = 1.0 - 0.5_f64.powi(consecutive_correct.min(64) as i32);
    let accuracy = times_correct as f64 / times_seen as f64;
    let raw = STREAK_WEIGHT * streak + (1.0 - STREAK_WEIGHT) * accuracy;
    clamp_unit(raw * decay(staleness_ms, half_life_days))
}

fn decay(elapsed_ms: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let days = elapsed_ms.max(0) as f64 / MS_PER_DAY;
    0.5_f64.powf(days / half_life_days)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400_000;

    #[test]
    fn test_first_outcome_creates_entry() {
        let mut store = WordHistoryStore::default();
        assert!(!store.is_seen(7));
        let entry = store.record_outcome(7, true, 1_000).unwrap();
        assert_eq!(entry.word_id, 7);
        assert_eq!(entry.times_seen, 1);
        assert_eq!(entry.times_correct, 1);
        assert_eq!(entry.consecutive_correct, 1);
        assert_eq!(entry.last_seen_at_ms, 1_000);
        assert!(store.is_seen(7));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_zero_id_is_rejected_without_mutation() {
        let mut store = WordHistoryStore::default();
        let err = store.record_outcome(0, true, 1_000).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_wrong_answer_resets_streak() {
        let mut store = WordHistoryStore::default();
        store.record_outcome(3, true, 0).unwrap();
        store.record_outcome(3, true, 10).unwrap();
        let entry = store.record_outcome(3, false, 20).unwrap();
        assert_eq!(entry.consecutive_correct, 0);
        assert_eq!(entry.times_seen, 3);
        assert_eq!(entry.times_correct, 2);
    }

    #[test]
    fn test_mastery_increases_with_consecutive_correct() {
        let mut store = WordHistoryStore::default();
        let mut previous = 0.0;
        for i in 0..6 {
            let entry = store.record_outcome(1, true, i * 1_000).unwrap();
            assert!(
                entry.mastery_score > previous,
                "mastery should rise on correct answer {i}: {} <= {previous}",
                entry.mastery_score
            );
            assert!(entry.mastery_score <= 1.0);
            previous = entry.mastery_score;
        }
    }

    #[test]
    fn test_mastery_decreases_with_staleness() {
        let fresh = mastery_score(3, 3, 3, 0, 14.0);
        let week = mastery_score(3, 3, 3, 7 * DAY, 14.0);
        let month = mastery_score(3, 3, 3, 30 * DAY, 14.0);
        assert!(fresh > week);
        assert!(week > month);
        assert!(month > 0.0);
    }

    #[test]
    fn test_mastery_at_decays_from_last_seen() {
        let mut store = WordHistoryStore::new(14.0);
        store.record_outcome(4, true, 0).unwrap();
        let now = store.mastery_at(4, 0);
        let later = store.mastery_at(4, 14 * DAY);
        assert!((later - now / 2.0).abs() < 1e-9);
        assert_eq!(store.mastery_at(99, 0), 0.0);
    }

    #[test]
    fn test_entry_default_for_unseen() {
        let store = WordHistoryStore::default();
        let entry = store.entry(42);
        assert_eq!(entry.word_id, 42);
        assert_eq!(entry.times_seen, 0);
        assert_eq!(entry.mastery_score, 0.0);
    }

    #[test]
    fn test_from_entries_repairs_keys_and_scores() {
        let mut raw = BTreeMap::new();
        raw.insert(
            5,
            WordHistoryEntry {
                word_id: 99,
                times_seen: 1,
                mastery_score: 4.0,
                ..WordHistoryEntry::default()
            },
        );
        raw.insert(0, WordHistoryEntry::default());
        let store = WordHistoryStore::from_entries(raw, 14.0);
        assert_eq!(store.len(), 1);
        let entry = store.get(5).unwrap();
        assert_eq!(entry.word_id, 5);
        assert_eq!(entry.mastery_score, 1.0);
    }

    #[test]
    fn test_seen_ids_ascending() {
        let mut store = WordHistoryStore::default();
        store.record_outcome(9, false, 0).unwrap();
        store.record_outcome(2, true, 0).unwrap();
        assert_eq!(store.seen_ids().collect::<Vec<_>>(), vec![2, 9]);
    }
}
