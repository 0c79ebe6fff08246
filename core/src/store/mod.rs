/// Document tree storage backed by sled.
///
/// Every document lives at a path-string key (`users/<key>`,
/// `conversations/<id>/messages`, ...) and is stored as a JSON envelope
/// carrying a monotonic version. Reads and writes are atomic per single
/// document only — nothing spans two documents, which is exactly the
/// consistency surface the synchronizer is written against.
use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Well-known document paths.
pub mod paths {
    use crate::identity::UserKey;

    /// `users/<key>` — user record (first/last name).
    pub fn user(key: &UserKey) -> String {
        format!("users/{}", key)
    }

    /// `users/<key>/conversations` — that user's conversation index.
    pub fn conversations(key: &UserKey) -> String {
        format!("users/{}/conversations", key)
    }

    /// `conversations/<id>/messages` — the shared message log.
    pub fn messages(conversation_id: &str) -> String {
        format!("conversations/{}/messages", conversation_id)
    }

    /// Flat user list for search/autocomplete.
    pub const DIRECTORY: &str = "directory/users";
}

/// Versioned storage envelope around every document.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u64,
    value: serde_json::Value,
}

/// Handle to the document tree. Cheap to clone; all clones share the
/// same underlying sled database.
#[derive(Clone)]
pub struct DocTree {
    db: Arc<sled::Db>,
    flush_writes: bool,
    #[cfg(feature = "test-helpers")]
    failing_paths: Arc<std::sync::RwLock<std::collections::HashSet<String>>>,
}

impl DocTree {
    /// Open (or create) the tree under the given data directory.
    pub fn open(data_dir: &Path, flush_writes: bool) -> Result<Self> {
        let db_path = data_dir.join("documents.db");
        let db = sled::open(&db_path)
            .map_err(|e| StoreError::Storage(format!("Failed to open document tree: {}", e)))?;

        info!("Document tree opened at {:?}", db_path);
        Ok(Self {
            db: Arc::new(db),
            flush_writes,
            #[cfg(feature = "test-helpers")]
            failing_paths: Arc::default(),
        })
    }

    /// Force every operation on `path` to fail with a storage error,
    /// across all clones of this handle. For exercising partial-failure
    /// paths in multi-document protocols.
    #[cfg(feature = "test-helpers")]
    pub fn fail_path(&self, path: &str) {
        self.failing_paths
            .write()
            .expect("fault lock poisoned")
            .insert(path.to_string());
    }

    /// Clear a fault installed by `fail_path`.
    #[cfg(feature = "test-helpers")]
    pub fn heal_path(&self, path: &str) {
        self.failing_paths
            .write()
            .expect("fault lock poisoned")
            .remove(path);
    }

    fn check_fault(&self, path: &str) -> Result<()> {
        #[cfg(feature = "test-helpers")]
        if self
            .failing_paths
            .read()
            .expect("fault lock poisoned")
            .contains(path)
        {
            return Err(StoreError::Storage(format!("forced failure on {}", path)));
        }
        let _ = path;
        Ok(())
    }

    /// Read a document, ignoring its version.
    pub fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        Ok(self.read_versioned(path)?.1)
    }

    /// Read a document together with its version. Absent documents read
    /// as version 0.
    pub fn read_versioned<T: DeserializeOwned>(&self, path: &str) -> Result<(u64, Option<T>)> {
        self.check_fault(path)?;
        let raw = self
            .db
            .get(path.as_bytes())
            .map_err(|e| StoreError::FetchFailed(format!("{}: {}", path, e)))?;

        match raw {
            None => Ok((0, None)),
            Some(bytes) => {
                let envelope: Envelope = serde_json::from_slice(&bytes)?;
                let value = serde_json::from_value(envelope.value)?;
                Ok((envelope.version, Some(value)))
            }
        }
    }

    /// Unconditional single-document replace (last write wins).
    pub fn write<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let (version, _) = self.read_versioned::<serde_json::Value>(path)?;
        self.insert(path, version + 1, value)
    }

    /// Compare-and-swap replace: succeeds only if the stored version
    /// still matches `expected` (0 for "document must be absent").
    pub fn write_versioned<T: Serialize>(&self, path: &str, expected: u64, value: &T) -> Result<()> {
        self.check_fault(path)?;
        let current = self
            .db
            .get(path.as_bytes())
            .map_err(|e| StoreError::FetchFailed(format!("{}: {}", path, e)))?;

        let current_version = match &current {
            None => 0,
            Some(bytes) => serde_json::from_slice::<Envelope>(bytes)?.version,
        };
        if current_version != expected {
            return Err(StoreError::Conflict {
                path: path.to_string(),
                expected,
            });
        }

        let envelope = Envelope {
            version: expected + 1,
            value: serde_json::to_value(value)?,
        };
        let new_bytes = serde_json::to_vec(&envelope)?;

        let swapped = self
            .db
            .compare_and_swap(path.as_bytes(), current, Some(new_bytes))
            .map_err(|e| StoreError::WriteFailed(format!("{}: {}", path, e)))?;

        if swapped.is_err() {
            // Lost the race between our read and the swap.
            return Err(StoreError::Conflict {
                path: path.to_string(),
                expected,
            });
        }

        self.maybe_flush(path)
    }

    /// Read-modify-write with bounded retries on version conflicts.
    /// The closure sees the current value (None when absent) and returns
    /// the replacement plus a result passed through to the caller.
    pub fn update<T, R, F>(&self, path: &str, retries: usize, mut f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> (T, R),
    {
        let mut attempts = 0;
        loop {
            let (version, current) = self.read_versioned(path)?;
            let (next, result) = f(current);
            match self.write_versioned(path, version, &next) {
                Ok(()) => return Ok(result),
                Err(StoreError::Conflict { .. }) if attempts < retries => {
                    attempts += 1;
                    debug!("Version conflict on {}, retry {}/{}", path, attempts, retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete a document. Absent documents delete as a no-op.
    pub fn remove(&self, path: &str) -> Result<bool> {
        let removed = self
            .db
            .remove(path.as_bytes())
            .map_err(|e| StoreError::WriteFailed(format!("{}: {}", path, e)))?;
        if removed.is_some() {
            self.maybe_flush(path)?;
        }
        Ok(removed.is_some())
    }

    /// Number of documents in the tree.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    fn insert(&self, path: &str, version: u64, value: &impl Serialize) -> Result<()> {
        let envelope = Envelope {
            version,
            value: serde_json::to_value(value)?,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.db
            .insert(path.as_bytes(), bytes)
            .map_err(|e| StoreError::WriteFailed(format!("{}: {}", path, e)))?;
        self.maybe_flush(path)
    }

    fn maybe_flush(&self, path: &str) -> Result<()> {
        if self.flush_writes {
            self.db
                .flush()
                .map_err(|e| StoreError::WriteFailed(format!("flush after {}: {}", path, e)))?;
        }
        Ok(())
    }
}
