use std::path::{Path, PathBuf};

use super::subscriptions::Subscriptions;
use super::types::StoreError;
use crate::util::atomic_write;

/// Whole-file JSON persistence for [`Subscriptions`].
///
/// The store is always read and written as one document; there are no
/// incremental writes. It is an explicit value handed to whoever needs it,
/// not process-wide state.
#[derive(Debug, Clone)]
pub struct SubscriptionStore {
    path: PathBuf,
}

impl SubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the store.
    ///
    /// # Errors
    ///
    /// All errors are fatal; nothing is repaired:
    /// - [`StoreError::Io`] if the file cannot be read (including not found)
    /// - [`StoreError::Corrupt`] for malformed JSON or a missing required key
    /// - [`StoreError::InconsistentIndex`] if the title/id index is broken
    pub fn load(&self) -> Result<Subscriptions, StoreError> {
        let content = std::fs::read(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let subs: Subscriptions = serde_json::from_slice(&content).map_err(StoreError::Corrupt)?;
        subs.validate()?;

        tracing::debug!(
            path = %self.path.display(),
            feeds = subs.len(),
            "Loaded subscription store"
        );
        Ok(subs)
    }

    /// Like [`load`](Self::load), but a store file that does not exist yet
    /// is created empty (first run). Every other failure stays fatal.
    pub fn load_or_init(&self) -> Result<Subscriptions, StoreError> {
        match std::fs::metadata(&self.path) {
            Ok(_) => self.load(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let subs = Subscriptions::new();
                self.save(&subs)?;
                tracing::info!(path = %self.path.display(), "Initialized empty subscription store");
                Ok(subs)
            }
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Serializes the whole state and replaces the file.
    ///
    /// Serialization happens fully in memory first; if it fails, the file on
    /// disk is not touched. The write itself goes through a temp file and a
    /// rename, so a crash mid-write leaves the previous file intact.
    pub fn save(&self, subs: &Subscriptions) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(subs).map_err(StoreError::Serialize)?;
        atomic_write(&self.path, &content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(
            path = %self.path.display(),
            feeds = subs.len(),
            bytes = content.len(),
            "Saved subscription store"
        );
        Ok(())
    }
}
