use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// One answered word, as reported to analytics.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEvent {
    pub word_id: u32,
    pub correct: bool,
    pub category: String,
    pub session_number: u32,
    pub mastery_score: f64,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget analytics transport. Implementations must not block or
/// fail the caller; anything they cannot deliver is dropped.
pub trait OutcomeSink: Send {
    fn record(&self, event: &OutcomeEvent);
}

#[derive(Debug, Default)]
pub struct NullSink;

impl OutcomeSink for NullSink {
    fn record(&self, _event: &OutcomeEvent) {}
}

/// Emits each outcome as a structured `tracing` event on the `vocabr::outcome`
/// target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record(&self, event: &OutcomeEvent) {
        info!(
            target: "vocabr::outcome",
            word_id = event.word_id,
            correct = event.correct,
            category = %event.category,
            session = event.session_number,
            mastery = event.mastery_score,
            at = %event.at,
            "outcome"
        );
    }
}
