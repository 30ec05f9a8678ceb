// Library target carries the engine; main.rs is a thin CLI host over it and
// the integration tests and benchmarks import from here.

pub mod analytics;
pub mod app;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod event;
pub mod session;
pub mod store;
