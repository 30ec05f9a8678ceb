use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::store::backend::{StorageBackend, StoreError};

const SNAPSHOT_FILE: &str = "session.json";

/// Snapshot stored as one JSON file. Writes go to a temp file that is synced
/// and renamed over the target, so readers never see a torn document.
pub struct JsonFileBackend {
    base_dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new() -> Result<Self> {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vocabr");
        Self::with_base_dir(base_dir)
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.base_dir.join(SNAPSHOT_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        // Per-process temp name so two writers never share a staging file.
        self.snapshot_path()
            .with_extension(format!("{}.tmp", std::process::id()))
    }
}

impl StorageBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.snapshot_path()) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, payload: &str) -> Result<(), StoreError> {
        let path = self.snapshot_path();
        let tmp_path = self.tmp_path();

        let staged = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(payload.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(err) = staged {
            let _ = fs::remove_file(&tmp_path);
            if err.kind() == ErrorKind::StorageFull {
                return Err(StoreError::QuotaExceeded {
                    size: payload.len(),
                    quota: 0,
                });
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.snapshot_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
