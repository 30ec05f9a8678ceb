use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Rejected before any state was touched.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Internal scheduling failures. These never leave the scheduler; they select
/// the random fallback instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("category `{0}` has no words")]
    EmptyCategory(String),
    #[error("no eligible words left in `{0}`")]
    PoolExhausted(String),
    #[error("catalog is empty")]
    EmptyCorpus,
}
