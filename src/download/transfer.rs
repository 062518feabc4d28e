// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::blob::BlobStore;
use crate::error::DownloadError;
use crate::http::{ByteStream, HttpClient};

/// Result of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Final location in the blob cache
    pub path: PathBuf,
    pub bytes: u64,
    /// SHA-256 of the content, formatted as "sha256:<hex>"
    pub content_hash: String,
}

/// Percentage of `bytes` out of `total`, when the total is known
pub fn percent(bytes: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => Some((bytes.saturating_mul(100) / total).min(100) as u8),
        _ => None,
    }
}

/// Stream the audio at `url` into the blob cache.
///
/// The body is written to a `.partial` file unique to this transfer, hashed
/// while streaming, and renamed into place once complete. `on_progress` receives the running byte
/// count and the content length, if the server sent one. A failed transfer
/// leaves nothing behind.
pub async fn transfer<C, F>(
    client: &C,
    url: &str,
    blobs: &BlobStore,
    mut on_progress: F,
) -> Result<Transfer, DownloadError>
where
    C: HttpClient + ?Sized,
    F: FnMut(u64, Option<u64>),
{
    if url.is_empty() {
        return Err(DownloadError::MissingAudioUrl);
    }

    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !(200..300).contains(&response.status) {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    if let Some(length) = response.content_length {
        blobs.check_capacity(length)?;
    }

    let partial = blobs
        .partial_file(url)
        .map_err(|e| DownloadError::FileCreateFailed {
            path: blobs.dir().to_path_buf(),
            source: e,
        })?;
    let (file, partial_path) = partial.into_parts();

    // Dropping `partial_path` on any early return, or when this future is
    // cancelled, deletes the partial file
    let (bytes, content_hash) = write_body(
        url,
        response.body,
        response.content_length,
        File::from_std(file),
        &partial_path,
        &mut on_progress,
    )
    .await?;

    let path = blobs.path_for(url);
    partial_path
        .persist(&path)
        .map_err(|e| DownloadError::FileWriteFailed {
            path: path.clone(),
            source: e.error,
        })?;

    debug!(url, bytes, hash = %content_hash, path = %path.display(), "Transfer finished");
    Ok(Transfer {
        path,
        bytes,
        content_hash,
    })
}

async fn write_body<F>(
    url: &str,
    mut body: ByteStream,
    content_length: Option<u64>,
    mut file: File,
    partial_path: &Path,
    on_progress: &mut F,
) -> Result<(u64, String), DownloadError>
where
    F: FnMut(u64, Option<u64>),
{
    let mut hasher = Sha256::new();
    let mut bytes_downloaded: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: partial_path.to_path_buf(),
                source: e,
            })?;
        hasher.update(&chunk);

        bytes_downloaded += chunk.len() as u64;
        on_progress(bytes_downloaded, content_length);
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: partial_path.to_path_buf(),
            source: e,
        })?;

    let hash: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok((bytes_downloaded, format!("sha256:{hash}")))
}
