pub mod backend;
pub mod coordinator;
pub mod json_store;
pub mod schema;

pub use backend::{MemoryBackend, StorageBackend, StoreError};
pub use coordinator::{FlushResult, PersistenceCoordinator, PersistenceSettings, SavePriority};
pub use json_store::JsonFileBackend;
pub use schema::{FieldGroup, PersistedSnapshot, SnapshotPatch};
