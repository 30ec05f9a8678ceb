pub mod lifecycle;

pub use lifecycle::{
    LifecycleState, ReconciliationTrigger, SessionLifecycleManager, SessionStart, TriggerOutcome,
};
