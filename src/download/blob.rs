// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::QuotaError;

/// Suffix of files still being written
const PARTIAL_SUFFIX: &str = ".partial";

/// On-disk audio cache. Each file is named by the SHA-256 of the URL it was
/// fetched from, so the same URL always maps to the same file.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
    quota: Option<u64>,
}

impl BlobStore {
    /// Open the cache directory, creating it if needed and removing
    /// `.partial` files left behind by interrupted transfers
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let store = Self { dir, quota: None };
        let cleaned = store.remove_partials()?;
        if cleaned > 0 {
            info!(count = cleaned, dir = %store.dir.display(), "Removed interrupted downloads");
        }
        Ok(store)
    }

    /// Refuse transfers that would push usage past `quota` bytes
    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota
    }

    /// Final location of the audio for `url`
    pub fn path_for(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.{}", audio_extension(url)))
    }

    /// Create a uniquely named `.partial` file for one transfer of `url`.
    /// It is deleted on drop unless persisted, so concurrent or abandoned
    /// transfers of the same URL never share a file.
    pub fn partial_file(&self, url: &str) -> io::Result<NamedTempFile> {
        let final_path = self.path_for(url);
        let name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio");
        tempfile::Builder::new()
            .prefix(&format!("{name}."))
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&self.dir)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    /// Delete the cached audio for `url`. Returns whether a file was removed.
    pub async fn remove(&self, url: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.path_for(url)).await {
            Ok(()) => {
                debug!(url, "Removed cached audio");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Bytes currently occupied by cached audio
    pub fn usage(&self) -> io::Result<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Check that `requested` more bytes fit under the quota
    pub fn check_capacity(&self, requested: u64) -> Result<(), QuotaError> {
        let Some(quota) = self.quota else {
            return Ok(());
        };
        let usage = match self.usage() {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Could not measure audio cache, skipping quota check");
                return Ok(());
            }
        };

        if usage.saturating_add(requested) > quota {
            return Err(QuotaError {
                usage,
                quota,
                requested,
            });
        }
        Ok(())
    }

    fn remove_partials(&self) -> io::Result<usize> {
        let mut cleaned = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));

            if is_partial && std::fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }
}

/// Audio file extension for a URL, taken from its path when recognizable
///
/// Defaults to "mp3"
pub fn audio_extension(url: &str) -> &'static str {
    Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(|filename| filename.rsplit_once('.'))
                .and_then(|(_, ext)| known_audio_extension(ext))
        })
        .unwrap_or("mp3")
}

fn known_audio_extension(ext: &str) -> Option<&'static str> {
    Some(match ext.to_ascii_lowercase().as_str() {
        "mp3" => "mp3",
        "m4a" => "m4a",
        "mp4" => "mp4",
        "aac" => "aac",
        "ogg" | "oga" => "ogg",
        "opus" => "opus",
        "wav" => "wav",
        "flac" => "flac",
        _ => return None,
    })
}
