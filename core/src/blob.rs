/// Object store seam for media blobs.
///
/// Media is uploaded *before* a message is encoded: the codec only ever
/// sees the resolved URL, never raw bytes.
use crate::error::{Result, StoreError};
use crate::identity::UserKey;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Path conventions for stored blobs.
pub fn message_image_path(file_name: &str) -> String {
    format!("message_images/{}", file_name)
}

pub fn message_video_path(file_name: &str) -> String {
    format!("message_videos/{}", file_name)
}

pub fn profile_picture_path(key: &UserKey) -> String {
    format!("images/{}_profile_picture.png", key)
}

pub trait ObjectStore: Send + Sync {
    /// Store bytes at a path and return the retrieval URL.
    fn upload(&self, bytes: &[u8], path: &str) -> Result<String>;
    /// Resolve an existing path to its retrieval URL.
    fn resolve(&self, path: &str) -> Result<String>;
}

/// Filesystem-backed object store for local deployments and tests;
/// returns `blob://` URLs.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(data_dir: &std::path::Path) -> Result<Self> {
        let root = data_dir.join("blobs");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn file_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl ObjectStore for LocalBlobStore {
    fn upload(&self, bytes: &[u8], path: &str) -> Result<String> {
        let file = self.file_path(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, bytes)?;
        debug!("Stored {} bytes at {}", bytes.len(), path);
        Ok(format!("blob://{}", path))
    }

    fn resolve(&self, path: &str) -> Result<String> {
        if !self.file_path(path).exists() {
            return Err(StoreError::FetchFailed(format!("no blob at {}", path)));
        }
        Ok(format!("blob://{}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        let path = message_image_path("pic.png");
        let url = store.upload(b"bytes", &path).unwrap();
        assert_eq!(url, "blob://message_images/pic.png");
        assert_eq!(store.resolve(&path).unwrap(), url);
    }

    #[test]
    fn resolving_missing_blob_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.resolve("message_videos/none.mov"),
            Err(StoreError::FetchFailed(_))
        ));
    }

    #[test]
    fn path_conventions() {
        let key = UserKey::normalize("a@gmail.com");
        assert_eq!(profile_picture_path(&key), "images/a-gmail-com_profile_picture.png");
        assert_eq!(message_video_path("v.mov"), "message_videos/v.mov");
    }
}
