//! Archive unpacking: gzip+tar extraction, inclusion policy, durable writes.
//!
//! Entries are read in stream order, filtered through the pure inclusion
//! policy, then written to the blob store with bounded parallelism. The
//! returned path list preserves archive order even though writes complete in
//! any order. Malformed framing fails the whole unpack; an individual write
//! failure only drops that path from the output (best-effort upload).

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures_util::{stream, StreamExt};
use tar::Archive;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::MAX_CONCURRENT_UPLOADS;
use crate::pipeline::policy::should_include;
use crate::services::blob_store::BlobStore;

/// Fatal unpack failures. Anything here invalidates the whole unit list.
#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("malformed archive: {0}")]
    Malformed(#[from] std::io::Error),
    #[error("archive entry has an unusable path: {0}")]
    EntryPath(String),
}

/// Key under which a unit's content is stored.
pub fn unit_key(user_id: &str, project_id: &str, path: &str) -> String {
    format!("units/{user_id}/{project_id}/{path}")
}

/// Extract `archive` (a gzip-compressed tar stream), apply the inclusion
/// policy, and write each surviving entry to `store`.
///
/// Returns the relative paths written, in archive order.
pub async fn unpack_archive(
    store: &dyn BlobStore,
    user_id: &str,
    project_id: &str,
    archive: &[u8],
) -> Result<Vec<String>, UnpackError> {
    let entries = extract_entries(archive)?;
    debug!(
        surviving = entries.len(),
        "archive extracted, uploading surviving entries"
    );

    // Writes run with bounded parallelism and complete out of order; index
    // tracking restores archive order for the output list.
    let results: Vec<(usize, bool)> = stream::iter(entries.iter().enumerate())
        .map(|(idx, (path, bytes))| async move {
            let key = unit_key(user_id, project_id, path);
            match store.put(&key, bytes.clone()).await {
                Ok(()) => (idx, true),
                Err(err) => {
                    warn!(path = %path, error = %err, "unit upload failed, dropping from batch");
                    (idx, false)
                }
            }
        })
        .buffer_unordered(MAX_CONCURRENT_UPLOADS)
        .collect()
        .await;

    let mut written = vec![false; entries.len()];
    for (idx, ok) in results {
        written[idx] = ok;
    }

    Ok(entries
        .into_iter()
        .zip(written)
        .filter_map(|((path, _), ok)| ok.then_some(path))
        .collect())
}

/// Decode the archive and collect surviving `(path, bytes)` pairs in stream
/// order. Runs synchronously; archives are already fully in memory.
fn extract_entries(archive: &[u8]) -> Result<Vec<(String, Bytes)>, UnpackError> {
    let decoder = GzDecoder::new(archive);
    let mut tar = Archive::new(decoder);

    let mut out = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| UnpackError::EntryPath(e.to_string()))?;
        let Some(relative) = normalize_entry_path(&path.to_string_lossy()) else {
            continue;
        };

        if !should_include(&relative) {
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        out.push((relative, Bytes::from(bytes)));
    }
    Ok(out)
}

/// Strip the top-level directory GitHub-style tarballs wrap entries in, and
/// reject paths that could escape the unit keyspace.
fn normalize_entry_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let relative = match trimmed.split_once('/') {
        Some((_root, rest)) if !rest.is_empty() => rest,
        _ => trimmed,
    };
    let safe = relative
        .split('/')
        .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'));
    safe.then(|| relative.to_string())
}
