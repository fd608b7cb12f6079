//! push-relay durable state.
//!
//! [`FileStateStore`] implements [`relay::StateStore`] on top of a single JSON
//! document mapping logical keys to records:
//!
//! ```json
//! { "last-update": { "cacheToken": "W/\"abc\"", "lastSeenId": 36925712345 } }
//! ```
//!
//! Other keys in the document are preserved on write, so several tools can
//! share one state file.
//!
//! # Durability
//!
//! Writes use write-to-temp-then-rename:
//! 1. Write the whole document to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename over `<path>`
//! 4. fsync the parent directory
//!
//! A crash at any point leaves either the old or the new document on disk.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Blocking file I/O runs on tokio's blocking pool.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use relay::{StateStore, StoreError, Watermark, WATERMARK_KEY};

type Document = BTreeMap<String, serde_json::Value>;

/// [`StateStore`] persisted as one key in a JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    key: String,
}

impl FileStateStore {
    /// Stores the watermark under [`WATERMARK_KEY`] in the file at `path`.
    ///
    /// The file and its parent directory are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_key(path, WATERMARK_KEY)
    }

    /// Stores the watermark under a custom key.
    pub fn with_key(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn read(&self) -> Result<Option<Watermark>, StoreError> {
        let path = self.path.clone();
        let document = run_blocking(move || load_document(&path)).await??;

        match document.and_then(|mut doc| doc.remove(&self.key)) {
            None => {
                tracing::debug!(path = %self.path.display(), "no stored watermark");
                Ok(None)
            }
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(StoreError::Corrupt),
        }
    }

    async fn write(&self, watermark: &Watermark) -> Result<(), StoreError> {
        let value = serde_json::to_value(watermark).map_err(StoreError::Corrupt)?;
        let path = self.path.clone();
        let key = self.key.clone();

        run_blocking(move || {
            let mut document = load_document(&path)?.unwrap_or_default();
            document.insert(key, value);
            save_document_atomic(&path, &document)
        })
        .await??;

        tracing::debug!(path = %self.path.display(), last_seen_id = %watermark.last_seen_id, "watermark saved");
        Ok(())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(format!("state I/O task failed: {e}")))
}

/// Loads the document, returning `None` if the file does not exist.
fn load_document(path: &Path) -> Result<Option<Document>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(StoreError::Corrupt)
}

fn save_document_atomic(path: &Path, document: &Document) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Some(p),
        _ => None,
    };
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(document).map_err(StoreError::Corrupt)?;
    let tmp_path = tmp_path_for(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = parent {
        fsync_dir(parent)?;
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Makes a rename inside `dir` durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::{CacheToken, EventId};
    use tempfile::tempdir;

    fn wm(id: u64, token: Option<&str>) -> Watermark {
        Watermark::new(EventId::new(id), token.and_then(CacheToken::new))
    }

    #[tokio::test]
    async fn missing_file_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_then_read_returns_the_watermark() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested/state.json"));

        store.write(&wm(42, Some("\"etag\""))).await.unwrap();

        assert_eq!(store.read().await.unwrap(), Some(wm(42, Some("\"etag\""))));
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn survives_a_new_store_instance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStateStore::new(&path).write(&wm(7, None)).await.unwrap();

        let reopened = FileStateStore::new(&path);
        assert_eq!(reopened.read().await.unwrap(), Some(wm(7, None)));
    }

    #[tokio::test]
    async fn file_layout_is_keyed_camel_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStateStore::new(&path)
            .write(&wm(9, Some("t")))
            .await
            .unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({ "last-update": { "cacheToken": "t", "lastSeenId": 9 } })
        );
    }

    #[tokio::test]
    async fn other_keys_are_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"unrelated": {"x": 1}}"#).unwrap();

        FileStateStore::new(&path).write(&wm(3, None)).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["unrelated"]["x"], 1);
        assert_eq!(raw["last-update"]["lastSeenId"], 3);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = FileStateStore::new(&path).read().await.unwrap_err();

        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(!err.retry_policy().is_retryable());
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"last-update": {"lastSeenId": "many"}}"#).unwrap();

        let err = FileStateStore::new(&path).read().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn custom_key_is_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStateStore::new(&path).write(&wm(1, None)).await.unwrap();

        let other = FileStateStore::with_key(&path, "other-repo");
        assert_eq!(other.read().await.unwrap(), None);
    }
}
