//! Durable keyed blob storage.
//!
//! Every pipeline stage communicates with its successor exclusively through
//! this store: the unpacker writes unit content under
//! `units/{user}/{project}/{path}`, each analyzer writes its verdict under
//! `results/{job}/{path}`, and the reducer lists and reads the result prefix.
//! A `put` to an existing key is a full overwrite, which is what makes
//! re-dispatching a unit idempotent.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::paths::AppPaths;

/// Errors emitted by blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        BlobError::Io(e.to_string())
    }
}

/// Trait abstracting over blob storage backends.
///
/// Keys are slash-separated segment paths. Writers only ever write their own
/// key, so single-key atomicity is the only consistency the pipeline relies
/// on; `list` on a local backend sees every completed `put`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing value.
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError>;

    /// Fetch the value stored under `key`, or `BlobError::NotFound`.
    async fn get(&self, key: &str) -> Result<Bytes, BlobError>;

    /// List every key under the given segment prefix, in unspecified order.
    /// A missing prefix yields an empty list, not an error.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
}

/// Validate a key: non-empty slash-separated segments, no traversal, no
/// NUL or backslash characters.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = |reason: &str| BlobError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("leading or trailing slash"));
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if segment == "." || segment == ".." {
            return Err(invalid("path traversal segment"));
        }
        if segment.contains('\0') || segment.contains('\\') {
            return Err(invalid("forbidden character in segment"));
        }
    }
    Ok(())
}

/// Filesystem blob store rooted at the `AppPaths` blobs directory.
///
/// Write strategy: stream to a temp file beside the blob root, then rename
/// over the final path so concurrent writers of the same key leave exactly one
/// complete value behind.
#[derive(Debug, Clone, bon::Builder)]
pub struct FsBlobStore {
    paths: AppPaths,
}

impl FsBlobStore {
    fn root(&self) -> Result<PathBuf, BlobError> {
        self.paths
            .blobs_base_dir()
            .map_err(|e| BlobError::Io(e.to_string()))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        let mut path = self.root()?;
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError> {
        let final_path = self.key_path(key)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Io(format!("create key dir: {e}")))?;
        }

        let temp = tempfile::NamedTempFile::new_in(self.root()?)
            .map_err(|e| BlobError::Io(format!("create temp file: {e}")))?;

        let mut file = fs::File::from_std(
            temp.reopen()
                .map_err(|e| BlobError::Io(format!("reopen temp file: {e}")))?,
        );
        file.write_all(&bytes)
            .await
            .map_err(|e| BlobError::Io(format!("write blob: {e}")))?;
        file.flush()
            .await
            .map_err(|e| BlobError::Io(format!("flush blob: {e}")))?;
        drop(file);

        // Rename replaces any existing value atomically on Unix, giving the
        // overwrite-not-append semantics verdict retries depend on.
        temp.persist(&final_path)
            .map_err(|e| BlobError::Io(format!("finalize blob: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        let path = self.key_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Io(format!("read blob: {e}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let normalized = prefix.trim_end_matches('/');
        let dir = self.key_path(normalized)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = fs::read_dir(&current)
                .await
                .map_err(|e| BlobError::Io(format!("list dir: {e}")))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BlobError::Io(format!("list entry: {e}")))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| BlobError::Io(format!("stat entry: {e}")))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else {
                    keys.push(key_for(&dir, normalized, &path)?);
                }
            }
        }
        Ok(keys)
    }
}

fn key_for(root: &Path, prefix: &str, path: &Path) -> Result<String, BlobError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| BlobError::Io(format!("list produced foreign path: {e}")))?;
    let mut key = String::from(prefix);
    for component in relative.components() {
        key.push('/');
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(key)
}

/// In-memory blob store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    map: tokio::sync::Mutex<std::collections::BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError> {
        validate_key(key)?;
        self.map.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        validate_key(key)?;
        self.map
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let normalized = format!("{}/", prefix.trim_end_matches('/'));
        validate_key(normalized.trim_end_matches('/'))?;
        Ok(self
            .map
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(&normalized))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fs_store(temp: &TempDir) -> FsBlobStore {
        let paths = AppPaths::new(temp.path()).expect("app paths");
        FsBlobStore::builder().paths(paths).build()
    }

    #[test]
    fn key_validation_rejects_traversal() {
        assert!(validate_key("units/u/p/src/main.rs").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a/./b").is_err());
        assert!(validate_key("a/b\\c").is_err());
        assert!(validate_key("trailing/").is_err());
    }

    #[tokio::test]
    async fn fs_put_get_roundtrip() {
        let temp = TempDir::new().expect("temp dir");
        let store = fs_store(&temp);

        store
            .put("units/u1/p1/src/main.rs", Bytes::from_static(b"fn main() {}"))
            .await
            .expect("put succeeds");

        let bytes = store.get("units/u1/p1/src/main.rs").await.expect("get succeeds");
        assert_eq!(&bytes[..], b"fn main() {}");
    }

    #[tokio::test]
    async fn fs_get_missing_key_is_not_found() {
        let temp = TempDir::new().expect("temp dir");
        let store = fs_store(&temp);

        let err = store.get("units/u1/p1/gone.rs").await.expect_err("missing");
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn fs_put_overwrites_existing_key() {
        let temp = TempDir::new().expect("temp dir");
        let store = fs_store(&temp);
        let key = "results/job-1/src/a.rs";

        store.put(key, Bytes::from_static(b"first")).await.expect("put 1");
        store.put(key, Bytes::from_static(b"second")).await.expect("put 2");

        let bytes = store.get(key).await.expect("get");
        assert_eq!(&bytes[..], b"second", "second write wins");

        let keys = store.list("results/job-1/").await.expect("list");
        assert_eq!(keys, vec![key.to_string()], "one entry after two writes");
    }

    #[tokio::test]
    async fn fs_list_returns_nested_keys_under_prefix() {
        let temp = TempDir::new().expect("temp dir");
        let store = fs_store(&temp);

        store
            .put("results/job-1/src/a.rs", Bytes::from_static(b"{}"))
            .await
            .expect("put");
        store
            .put("results/job-1/src/deep/b.rs", Bytes::from_static(b"{}"))
            .await
            .expect("put");
        store
            .put("results/job-2/c.rs", Bytes::from_static(b"{}"))
            .await
            .expect("put");

        let mut keys = store.list("results/job-1/").await.expect("list");
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "results/job-1/src/a.rs".to_string(),
                "results/job-1/src/deep/b.rs".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn fs_list_missing_prefix_is_empty() {
        let temp = TempDir::new().expect("temp dir");
        let store = fs_store(&temp);
        let keys = store.list("results/no-such-job/").await.expect("list");
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn memory_store_matches_contract() {
        let store = MemoryBlobStore::new();

        store
            .put("results/job-1/a.rs", Bytes::from_static(b"one"))
            .await
            .expect("put");
        store
            .put("results/job-1/a.rs", Bytes::from_static(b"two"))
            .await
            .expect("overwrite");

        let bytes = store.get("results/job-1/a.rs").await.expect("get");
        assert_eq!(&bytes[..], b"two");

        let keys = store.list("results/job-1").await.expect("list");
        assert_eq!(keys.len(), 1);

        assert!(matches!(
            store.get("results/job-1/missing").await,
            Err(BlobError::NotFound(_))
        ));
    }
}
