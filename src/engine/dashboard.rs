use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::{WordCatalog, WordItem};
use crate::clock::SharedClock;
use crate::engine::progress::ProgressSets;
use crate::engine::scheduler::{
    SchedulerSettings, SelectionStrategy, SessionInfo, SystematicSelection, categories_covered,
    compose_batch, partition_pool, prefer_tier, strategy_for,
};
use crate::engine::word_history::WordHistoryStore;

/// Everything the dashboard batch is derived from.
#[derive(Clone, Copy)]
pub struct DashboardProgress<'a> {
    pub history: &'a WordHistoryStore,
    pub progress: &'a ProgressSets,
    pub completed_words: u32,
}

/// True when the completed-word count moved across a multiple of `interval`
/// since the last generation. The caller regenerates when this fires.
pub fn needs_regeneration(previous_completed: u32, current_completed: u32, interval: u32) -> bool {
    let interval = interval.max(1);
    current_completed / interval > previous_completed / interval
}

/// Cross-category session builder for the home dashboard. Pure with respect
/// to its inputs: calling it early, late or twice never changes state.
pub struct DashboardSessionGenerator {
    catalog: Arc<dyn WordCatalog>,
    settings: SchedulerSettings,
    clock: SharedClock,
}

impl DashboardSessionGenerator {
    pub fn new(catalog: Arc<dyn WordCatalog>, settings: SchedulerSettings, clock: SharedClock) -> Self {
        Self {
            catalog,
            settings,
            clock,
        }
    }

    pub fn generate_dashboard_session(
        &self,
        progress: &DashboardProgress<'_>,
        session_number: u32,
    ) -> SystematicSelection {
        let tier = self.settings.tiers.tier_for(progress.completed_words);
        let corpus = self.catalog.all_words();
        let mut partition = partition_pool(
            corpus,
            progress.history,
            progress.progress,
            &self.settings,
            self.clock.now_ms(),
        );
        let exhaustion_level = partition.exhaustion_level();

        if partition.total == 0 {
            warn!(session_number, "dashboard corpus is empty");
            return SystematicSelection {
                words: Vec::new(),
                session_info: SessionInfo {
                    strategy: SelectionStrategy::RandomFallback,
                    difficulty_tier: tier,
                    new_word_count: 0,
                    review_word_count: 0,
                    exhaustion_level,
                    categories_covered: Vec::new(),
                    degraded: true,
                },
            };
        }

        if partition.fresh.is_empty() && partition.due.is_empty() {
            let words: Vec<WordItem> = partition
                .mastered
                .into_iter()
                .take(self.settings.batch_size)
                .collect();
            debug!(session_number, words = words.len(), "dashboard recycling mastered words");
            return SystematicSelection {
                session_info: SessionInfo {
                    strategy: SelectionStrategy::Recycle,
                    difficulty_tier: tier,
                    new_word_count: 0,
                    review_word_count: words.len(),
                    exhaustion_level,
                    categories_covered: categories_covered(&words),
                    degraded: false,
                },
                words,
            };
        }

        prefer_tier(&mut partition.fresh, tier);
        let fresh = interleave_categories(partition.fresh);
        let review_fraction = self.settings.review_cap.min(exhaustion_level);
        let batch = compose_batch(&fresh, &partition.due, review_fraction, self.settings.batch_size);

        SystematicSelection {
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
        }
    }
}

/// Round-robin over categories so a dashboard batch is not one category deep.
/// Order inside each category is preserved; categories rotate alphabetically.
fn interleave_categories(words: Vec<WordItem>) -> Vec<WordItem> {
    let total = words.len();
    let mut queues: BTreeMap<String, VecDeque<WordItem>> = BTreeMap::new();
    for word in words {
        queues.entry(word.category.clone()).or_default().push_back(word);
    }
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        for queue in queues.values_mut() {
            if let Some(word) = queue.pop_front() {
                out.push(word);
            }
        }
    }
    out
}
