pub mod dashboard;
pub mod error;
pub mod progress;
pub mod scheduler;
pub mod word_history;

pub use error::EngineError;
pub use scheduler::{SessionInfo, SystematicSelection};
