use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage quota exceeded: {size} bytes over a {quota} byte quota")]
    QuotaExceeded { size: usize, quota: usize },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the snapshot document. One backend instance belongs to one
/// writer; several writers may point at the same underlying storage.
pub trait StorageBackend: Send {
    fn read(&self) -> Result<Option<String>, StoreError>;
    fn write(&self, payload: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Notice that another writer changed the shared storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageChanged;

#[derive(Default)]
struct SharedSlot {
    payload: Option<String>,
    quota: Option<usize>,
    fail_writes: bool,
    next_writer: usize,
    subscribers: Vec<(usize, Sender<StorageChanged>)>,
}

/// In-process storage shared by every handle cloned from it. Each handle acts
/// as a separate writer: a write notifies the subscribers of every *other*
/// handle, never its own.
pub struct MemoryBackend {
    slot: Arc<Mutex<SharedSlot>>,
    writer: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let slot = Arc::new(Mutex::new(SharedSlot {
            next_writer: 1,
            ..SharedSlot::default()
        }));
        Self { slot, writer: 0 }
    }

    /// Another writer on the same storage (a second tab or process).
    pub fn handle(&self) -> Self {
        let mut slot = self.lock();
        let writer = slot.next_writer;
        slot.next_writer += 1;
        Self {
            slot: Arc::clone(&self.slot),
            writer,
        }
    }

    pub fn subscribe(&self) -> Receiver<StorageChanged> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push((self.writer, tx));
        rx
    }

    pub fn set_quota(&self, quota: Option<usize>) {
        self.lock().quota = quota;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Overwrite the stored payload without notifying anyone.
    pub fn put_raw(&self, payload: &str) {
        self.lock().payload = Some(payload.to_string());
    }

    pub fn raw(&self) -> Option<String> {
        self.lock().payload.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SharedSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_others(slot: &mut SharedSlot, author: usize) {
        slot.subscribers
            .retain(|(writer, tx)| *writer == author || tx.send(StorageChanged).is_ok());
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.lock().payload.clone())
    }

    fn write(&self, payload: &str) -> Result<(), StoreError> {
        let mut slot = self.lock();
        if slot.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        if let Some(quota) = slot.quota {
            if payload.len() > quota {
                return Err(StoreError::QuotaExceeded {
                    size: payload.len(),
                    quota,
                });
            }
        }
        slot.payload = Some(payload.to_string());
        Self::notify_others(&mut slot, self.writer);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut slot = self.lock();
        slot.payload = None;
        Self::notify_others(&mut slot, self.writer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_payload() {
        let a = MemoryBackend::new();
        let b = a.handle();
        a.write("hello").unwrap();
        assert_eq!(b.read().unwrap().as_deref(), Some("hello"));
        b.clear().unwrap();
        assert_eq!(a.read().unwrap(), None);
    }

    #[test]
    fn writer_is_not_notified_of_its_own_write() {
        let a = MemoryBackend::new();
        let b = a.handle();
        let a_rx = a.subscribe();
        let b_rx = b.subscribe();

        a.write("one").unwrap();
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv(), Ok(StorageChanged));

        b.write("two").unwrap();
        assert_eq!(a_rx.try_recv(), Ok(StorageChanged));
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn quota_rejects_large_payload_and_keeps_old_one() {
        let backend = MemoryBackend::new();
        backend.write("ok").unwrap();
        backend.set_quota(Some(4));
        let err = backend.write("too large").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { size: 9, quota: 4 }));
        assert_eq!(backend.raw().as_deref(), Some("ok"));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let a = MemoryBackend::new();
        let b = a.handle();
        drop(b.subscribe());
        a.write("x").unwrap();
        assert!(a.lock().subscribers.is_empty());
    }
}
