use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{DifficultyTier, WordCatalog, WordItem};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::engine::error::SchedulerError;
use crate::engine::progress::ProgressSets;
use crate::engine::word_history::WordHistoryStore;

// --- Tiers ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierThresholds {
    /// Completed-word count below which sessions are easy.
    pub easy_max: u32,
    /// Completed-word count below which sessions are medium.
    pub medium_max: u32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            easy_max: 50,
            medium_max: 100,
        }
    }
}

impl TierThresholds {
    pub fn tier_for(&self, completed_words: u32) -> DifficultyTier {
        if completed_words < self.easy_max {
            DifficultyTier::Easy
        } else if completed_words < self.medium_max {
            DifficultyTier::Medium
        } else {
            DifficultyTier::Hard
        }
    }
}

// --- Settings ---

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub review_cap: f64,
    pub mastery_threshold: f64,
    /// A low-mastery word is not due again until this long after it was seen.
    pub review_cooldown_ms: i64,
    pub tiers: TierThresholds,
    pub seed: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            review_cap: config.review_cap,
            mastery_threshold: config.mastery_threshold,
            review_cooldown_ms: config.review_cooldown_ms(),
            tiers: TierThresholds {
                easy_max: config.easy_max_completed,
                medium_max: config.medium_max_completed,
            },
            seed: config.shuffle_seed,
        }
    }
}

// --- Output ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Only never-seen words.
    NewWords,
    /// New words plus due reviews.
    Mixed,
    /// Only due reviews.
    Review,
    /// Everything was mastered; oldest mastered words come back.
    Recycle,
    /// Uniform random sample over the whole corpus.
    RandomFallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub strategy: SelectionStrategy,
    pub difficulty_tier: DifficultyTier,
    pub new_word_count: usize,
    pub review_word_count: usize,
    pub exhaustion_level: f64,
    pub categories_covered: Vec<String>,
    pub degraded: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystematicSelection {
    pub words: Vec<WordItem>,
    pub session_info: SessionInfo,
}

impl SystematicSelection {
    pub fn ids(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.id).collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub completed_words: u32,
}

// --- Pool partitioning (shared with the dashboard generator) ---

pub(crate) struct PoolPartition {
    /// Never seen, in pool order.
    pub fresh: Vec<WordItem>,
    /// Due for review, oldest `last_seen_at` first.
    pub due: Vec<WordItem>,
    /// Mastered, oldest `last_seen_at` first.
    pub mastered: Vec<WordItem>,
    pub seen: usize,
    pub total: usize,
}

impl PoolPartition {
    pub fn exhaustion_level(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.seen as f64 / self.total as f64
        }
    }
}

pub(crate) fn partition_pool(
    pool: Vec<WordItem>,
    history: &WordHistoryStore,
    progress: &ProgressSets,
    settings: &SchedulerSettings,
    now_ms: i64,
) -> PoolPartition {
    let mut ids = HashSet::new();
    let mut fresh = Vec::new();
    let mut due = Vec::new();
    let mut mastered = Vec::new();
    let mut seen = 0;
    let mut total = 0;

    for word in pool {
        if word.id == 0 || !ids.insert(word.id) {
            continue;
        }
        total += 1;
        let was_seen = history.is_seen(word.id)
            || progress.is_remembered(word.id)
            || progress.is_forgotten(word.id);
        if was_seen {
            seen += 1;
        }
        if progress.is_excluded(word.id) {
            continue;
        }
        if !was_seen {
            fresh.push(word);
            continue;
        }

        let last_seen = history.get(word.id).map_or(0, |e| e.last_seen_at_ms);
        if progress.is_forgotten(word.id) {
            due.push((last_seen, word));
            continue;
        }
        let mastery = history.mastery_at(word.id, now_ms);
        let rested = now_ms - last_seen >= settings.review_cooldown_ms;
        if mastery >= settings.mastery_threshold {
            mastered.push((last_seen, word));
        } else if rested {
            due.push((last_seen, word));
        }
    }

    due.sort_by_key(|(last_seen, w)| (*last_seen, w.id));
    mastered.sort_by_key(|(last_seen, w)| (*last_seen, w.id));

    PoolPartition {
        fresh,
        due: due.into_iter().map(|(_, w)| w).collect(),
        mastered: mastered.into_iter().map(|(_, w)| w).collect(),
        seen,
        total,
    }
}

/// Words at or below the tier first, keeping relative order otherwise.
pub(crate) fn prefer_tier(words: &mut [WordItem], tier: DifficultyTier) {
    words.sort_by_key(|w| w.difficulty > tier);
}

pub(crate) struct Composition {
    pub words: Vec<WordItem>,
    pub new_count: usize,
    pub review_count: usize,
}

/// Fill one batch: the review quota comes first, new words after it, and
/// either side tops up the other when it runs short.
pub(crate) fn compose_batch(
    fresh: &[WordItem],
    due: &[WordItem],
    review_fraction: f64,
    batch_size: usize,
) -> Composition {
    let target = batch_size.min(fresh.len() + due.len());
    let quota = ((review_fraction * target as f64).round() as usize).min(target);

    let mut review_count = quota.min(due.len());
    let new_count = (target - review_count).min(fresh.len());
    review_count = (target - new_count).min(due.len());

    let mut seen = HashSet::with_capacity(target);
    let words: Vec<WordItem> = due[..review_count]
        .iter()
        .chain(&fresh[..new_count])
        .filter(|w| seen.insert(w.id))
        .cloned()
        .collect();

    Composition {
        words,
        new_count,
        review_count,
    }
}

pub(crate) fn categories_covered(words: &[WordItem]) -> Vec<String> {
    let unique: BTreeSet<&str> = words.iter().map(|w| w.category.as_str()).collect();
    unique.into_iter().map(str::to_string).collect()
}

pub(crate) fn strategy_for(new_count: usize, review_count: usize) -> SelectionStrategy {
    match (new_count, review_count) {
        (_, 0) => SelectionStrategy::NewWords,
        (0, _) => SelectionStrategy::Review,
        _ => SelectionStrategy::Mixed,
    }
}

// --- Scheduler ---

pub struct SessionWordScheduler {
    catalog: Arc<dyn WordCatalog>,
    settings: SchedulerSettings,
    clock: SharedClock,
}

impl SessionWordScheduler {
    pub fn new(catalog: Arc<dyn WordCatalog>, settings: SchedulerSettings, clock: SharedClock) -> Self {
        Self {
            catalog,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Next batch for `category`. Never fails: any internal problem yields a
    /// random sample over the whole corpus flagged `degraded`.
    pub fn generate_session(
        &self,
        category: &str,
        history: &WordHistoryStore,
        progress: &ProgressSets,
        stats: &AggregateStats,
        session_number: u32,
    ) -> SystematicSelection {
        match self.try_generate(category, history, progress, stats) {
            Ok(selection) => {
                debug!(
                    category,
                    session_number,
                    words = selection.words.len(),
                    review = selection.session_info.review_word_count,
                    exhaustion = selection.session_info.exhaustion_level,
                    "generated session"
                );
                selection
            }
            Err(err) => {
                warn!(%err, category, session_number, "scheduler degraded to random fallback");
                self.fallback(stats, session_number, exhaustion_or_zero(self, category, history, progress))
            }
        }
    }

    pub fn exhaustion_level(
        &self,
        category: &str,
        history: &WordHistoryStore,
        progress: &ProgressSets,
    ) -> f64 {
        let pool = self.catalog.words_by_category(category);
        partition_pool(pool, history, progress, &self.settings, self.clock.now_ms())
            .exhaustion_level()
    }

    fn try_generate(
        &self,
        category: &str,
        history: &WordHistoryStore,
        progress: &ProgressSets,
        stats: &AggregateStats,
    ) -> Result<SystematicSelection, SchedulerError> {
        let tier = self.settings.tiers.tier_for(stats.completed_words);
        let pool = self.catalog.words_by_category(category);
        if pool.is_empty() {
            return Err(SchedulerError::EmptyCategory(category.to_string()));
        }

        let mut partition =
            partition_pool(pool, history, progress, &self.settings, self.clock.now_ms());
        if partition.fresh.is_empty() && partition.due.is_empty() {
            return Err(SchedulerError::PoolExhausted(category.to_string()));
        }
        prefer_tier(&mut partition.fresh, tier);

        let exhaustion_level = partition.exhaustion_level();
        let review_fraction = self.settings.review_cap.min(exhaustion_level);
        let batch = compose_batch(
            &partition.fresh,
            &partition.due,
            review_fraction,
            self.settings.batch_size,
        );

        Ok(SystematicSelection {
            session_info: SessionInfo {
                strategy: strategy_for(batch.new_count, batch.review_count),
                difficulty_tier: tier,
                new_word_count: batch.new_count,
                review_word_count: batch.review_count,
                exhaustion_level,
                categories_covered: categories_covered(&batch.words),
                degraded: false,
            },
            words: batch.words,
        })
    }

    fn fallback(
        &self,
        stats: &AggregateStats,
        session_number: u32,
        exhaustion_level: f64,
    ) -> SystematicSelection {
        let corpus = self.catalog.all_words();
        let mut rng = match self.settings.seed {
            Some(seed) => SmallRng::seed_from_u64(seed ^ u64::from(session_number)),
            None => SmallRng::from_entropy(),
        };
        let amount = self.settings.batch_size.min(corpus.len());
        let words: Vec<WordItem> = corpus.choose_multiple(&mut rng, amount).cloned().collect();
        if words.is_empty() {
            warn!(err = %SchedulerError::EmptyCorpus, "fallback has nothing to offer");
        }

        SystematicSelection {
            session_info: SessionInfo {
                strategy: SelectionStrategy::RandomFallback,
                difficulty_tier: self.settings.tiers.tier_for(stats.completed_words),
                new_word_count: 0,
                review_word_count: 0,
                exhaustion_level,
                categories_covered: categories_covered(&words),
                degraded: true,
            },
            words,
        }
    }
}

fn exhaustion_or_zero(
    scheduler: &SessionWordScheduler,
    category: &str,
    history: &WordHistoryStore,
    progress: &ProgressSets,
) -> f64 {
    let level = scheduler.exhaustion_level(category, history, progress);
    if level.is_finite() { level } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::clock::ManualClock;

    const MINUTE: i64 = 60_000;

    fn words(category: &str, start: u32, count: u32) -> Vec<WordItem> {
        (start..start + count)
            .map(|id| WordItem {
                id,
                text: format!("{category}-{id}"),
                category: category.to_string(),
                difficulty: DifficultyTier::Easy,
            })
            .collect()
    }

    fn scheduler(catalog: StaticCatalog, clock: &ManualClock) -> SessionWordScheduler {
        let settings = SchedulerSettings {
            seed: Some(11),
            ..SchedulerSettings::default()
        };
        SessionWordScheduler::new(Arc::new(catalog), settings, Arc::new(clock.clone()))
    }

    #[test]
    fn test_tier_thresholds() {
        let tiers = TierThresholds::default();
        assert_eq!(tiers.tier_for(0), DifficultyTier::Easy);
        assert_eq!(tiers.tier_for(49), DifficultyTier::Easy);
        assert_eq!(tiers.tier_for(50), DifficultyTier::Medium);
        assert_eq!(tiers.tier_for(99), DifficultyTier::Medium);
        assert_eq!(tiers.tier_for(100), DifficultyTier::Hard);
    }

    #[test]
    fn test_first_session_takes_whole_small_category() {
        let clock = ManualClock::new(10 * MINUTE);
        let sched = scheduler(StaticCatalog::from_words(words("animals", 1, 20)), &clock);
        let history = WordHistoryStore::default();
        let progress = ProgressSets::default();

        let selection =
            sched.generate_session("animals", &history, &progress, &AggregateStats::default(), 1);
        assert_eq!(selection.words.len(), 20);
        assert_eq!(selection.session_info.review_word_count, 0);
        assert_eq!(selection.session_info.new_word_count, 20);
        assert_eq!(selection.session_info.strategy, SelectionStrategy::NewWords);
        assert_eq!(selection.session_info.exhaustion_level, 0.0);
        assert!(!selection.session_info.degraded);
        assert_eq!(selection.session_info.categories_covered, vec!["animals"]);
    }

    #[test]
    fn test_forgotten_words_lead_oldest_first() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("animals", 1, 20)), &clock);
        let mut history = WordHistoryStore::default();
        let mut progress = ProgressSets::default();

        for id in 1..=20 {
            // Later ids seen earlier so the expected order is reversed.
            let seen_at = (40 - id as i64) * 1_000;
            history.record_outcome(id, id > 5, seen_at).unwrap();
            progress.record(id, id > 5);
        }
        clock.set(60_000);

        let selection = sched.generate_session(
            "animals",
            &history,
            &progress,
            &AggregateStats { completed_words: 20 },
            2,
        );
        let ids = selection.ids();
        assert_eq!(&ids[..5], &[5, 4, 3, 2, 1]);
        assert_eq!(selection.session_info.review_word_count, 5);
        assert_eq!(selection.session_info.exhaustion_level, 1.0);
        assert!(!selection.session_info.degraded);
    }

    #[test]
    fn test_review_share_is_capped() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("food", 1, 100)), &clock);
        let mut history = WordHistoryStore::default();
        let mut progress = ProgressSets::default();
        // 80 of 100 seen and forgotten: exhaustion 0.8, capped to 0.6
        for id in 1..=80 {
            history.record_outcome(id, false, id as i64).unwrap();
            progress.mark_forgotten(id);
        }
        let selection =
            sched.generate_session("food", &history, &progress, &AggregateStats::default(), 3);
        assert_eq!(selection.words.len(), 20);
        assert_eq!(selection.session_info.review_word_count, 12);
        assert_eq!(selection.session_info.new_word_count, 8);
        assert_eq!(selection.session_info.strategy, SelectionStrategy::Mixed);
    }

    #[test]
    fn test_review_share_scales_with_exhaustion() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("food", 1, 100)), &clock);
        let mut history = WordHistoryStore::default();
        let mut progress = ProgressSets::default();
        for id in 1..=25 {
            history.record_outcome(id, false, id as i64).unwrap();
            progress.mark_forgotten(id);
        }
        let selection =
            sched.generate_session("food", &history, &progress, &AggregateStats::default(), 2);
        // exhaustion 0.25 -> 5 of 20
        assert_eq!(selection.session_info.review_word_count, 5);
        assert_eq!(selection.session_info.new_word_count, 15);
    }

    #[test]
    fn test_recently_seen_low_mastery_rests() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("home", 1, 3)), &clock);
        let mut history = WordHistoryStore::default();
        let mut progress = ProgressSets::default();
        history.record_outcome(1, true, 0).unwrap();
        progress.mark_remembered(1);

        clock.set(MINUTE);
        let early =
            sched.generate_session("home", &history, &progress, &AggregateStats::default(), 2);
        assert!(!early.ids().contains(&1));

        clock.set(11 * MINUTE);
        let later =
            sched.generate_session("home", &history, &progress, &AggregateStats::default(), 3);
        assert_eq!(later.ids()[0], 1);
    }

    #[test]
    fn test_excluded_and_mastered_are_skipped() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("body", 1, 4)), &clock);
        let mut history = WordHistoryStore::default();
        let mut progress = ProgressSets::default();
        for t in 0..6 {
            history.record_outcome(1, true, t).unwrap();
        }
        progress.mark_remembered(1);
        progress.exclude(2);

        let selection =
            sched.generate_session("body", &history, &progress, &AggregateStats::default(), 2);
        let ids = selection.ids();
        assert!(!ids.contains(&1));
        assert!(!ids.contains(&2));
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_no_duplicates_when_pool_repeats_ids() {
        struct Repeating;
        impl WordCatalog for Repeating {
            fn words_by_category(&self, _: &str) -> Vec<WordItem> {
                let mut pool = words("x", 1, 5);
                pool.extend(words("x", 1, 5));
                pool
            }
            fn categories(&self) -> Vec<String> {
                vec!["x".into()]
            }
            fn all_words(&self) -> Vec<WordItem> {
                words("x", 1, 5)
            }
        }
        let clock = ManualClock::new(0);
        let sched = SessionWordScheduler::new(
            Arc::new(Repeating),
            SchedulerSettings::default(),
            Arc::new(clock),
        );
        let selection = sched.generate_session(
            "x",
            &WordHistoryStore::default(),
            &ProgressSets::default(),
            &AggregateStats::default(),
            1,
        );
        let unique: HashSet<u32> = selection.ids().into_iter().collect();
        assert_eq!(unique.len(), selection.words.len());
        assert_eq!(selection.words.len(), 5);
    }

    #[test]
    fn test_unknown_category_falls_back_to_corpus() {
        let clock = ManualClock::new(0);
        let mut corpus = words("a", 1, 15);
        corpus.extend(words("b", 100, 15));
        let sched = scheduler(StaticCatalog::from_words(corpus), &clock);

        let selection = sched.generate_session(
            "missing",
            &WordHistoryStore::default(),
            &ProgressSets::default(),
            &AggregateStats::default(),
            1,
        );
        assert!(selection.session_info.degraded);
        assert_eq!(selection.session_info.strategy, SelectionStrategy::RandomFallback);
        assert_eq!(selection.words.len(), 20);
        let unique: HashSet<u32> = selection.ids().into_iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_exhausted_pool_falls_back() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("a", 1, 3)), &clock);
        let mut progress = ProgressSets::default();
        for id in 1..=3 {
            progress.exclude(id);
        }
        let selection = sched.generate_session(
            "a",
            &WordHistoryStore::default(),
            &progress,
            &AggregateStats::default(),
            4,
        );
        assert!(selection.session_info.degraded);
        assert_eq!(selection.words.len(), 3);
    }

    #[test]
    fn test_empty_corpus_fallback_is_empty_not_panic() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(Vec::new()), &clock);
        let selection = sched.generate_session(
            "anything",
            &WordHistoryStore::default(),
            &ProgressSets::default(),
            &AggregateStats::default(),
            1,
        );
        assert!(selection.session_info.degraded);
        assert!(selection.words.is_empty());
    }

    #[test]
    fn test_seeded_fallback_is_reproducible() {
        let clock = ManualClock::new(0);
        let sched = scheduler(StaticCatalog::from_words(words("a", 1, 50)), &clock);
        let run = || {
            sched
                .generate_session(
                    "none",
                    &WordHistoryStore::default(),
                    &ProgressSets::default(),
                    &AggregateStats::default(),
                    9,
                )
                .ids()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_new_words_prefer_current_tier() {
        let clock = ManualClock::new(0);
        let mut pool = words("mix", 1, 3);
        pool[0].difficulty = DifficultyTier::Hard;
        pool[1].difficulty = DifficultyTier::Medium;
        let sched = scheduler(StaticCatalog::from_words(pool), &clock);
        let selection = sched.generate_session(
            "mix",
            &WordHistoryStore::default(),
            &ProgressSets::default(),
            &AggregateStats::default(),
            1,
        );
        assert_eq!(selection.ids(), vec![3, 1, 2]);
    }

    #[test]
    fn test_compose_batch_tops_up_short_side() {
        let fresh = words("f", 1, 2);
        let due = words("d", 100, 30);
        let batch = compose_batch(&fresh, &due, 0.1, 20);
        assert_eq!(batch.words.len(), 20);
        assert_eq!(batch.new_count, 2);
        assert_eq!(batch.review_count, 18);
    }
}
