// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::download::DEFAULT_CACHE_TIMEOUT;
use crate::feed::{DEFAULT_FETCH_TIMEOUT, DEFAULT_RELAYS};
use crate::playback::{DEFAULT_SAVE_INTERVAL, DEFAULT_SKIP_STEP};
use crate::store::DATABASE_FILE;

/// Name of the optional settings file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the data directory holding cached audio
pub const AUDIO_DIR: &str = "audio";

const GIB: u64 = 1024 * 1024 * 1024;

/// Runtime settings. Every field has a default, so a partial or missing
/// `config.json` is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the database and audio cache live. Chosen on the command line
    /// or by platform convention, never read from the file itself.
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Relay prefixes tried after a direct request fails
    pub relays: Vec<String>,
    pub fetch_timeout_secs: u64,
    /// How long to wait for the cache worker before downloading directly
    pub cache_timeout_secs: u64,
    pub use_cache_worker: bool,
    /// `None` disables the quota check
    pub storage_quota_bytes: Option<u64>,
    /// Two-letter store country preferred by directory search
    pub search_country: Option<String>,
    /// How often the player saves the listening position
    pub progress_save_interval_secs: u64,
    /// Step of the player's skip forward and back
    pub skip_seconds: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().unwrap_or_else(|_| PathBuf::from(".ownpod")),
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            cache_timeout_secs: DEFAULT_CACHE_TIMEOUT.as_secs(),
            use_cache_worker: true,
            storage_quota_bytes: Some(2 * GIB),
            search_country: None,
            progress_save_interval_secs: DEFAULT_SAVE_INTERVAL.as_secs(),
            skip_seconds: DEFAULT_SKIP_STEP.as_secs(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load `config.json` from `data_dir` (or the platform data directory),
    /// falling back to defaults when the file does not exist
    pub fn load(data_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let data_dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_data_dir()?,
        };
        let path = data_dir.join(CONFIG_FILE);

        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "Loaded config file");
                serde_json::from_str::<Config>(&text).map_err(|e| ConfigError::ParseFailed {
                    path: path.clone(),
                    source: e,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::ReadFailed { path, source: e }),
        };

        config.data_dir = data_dir;
        Ok(config)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join(AUDIO_DIR)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn progress_save_interval(&self) -> Duration {
        Duration::from_secs(self.progress_save_interval_secs)
    }

    pub fn skip_step(&self) -> Duration {
        Duration::from_secs(self.skip_seconds)
    }
}

/// Platform data directory, e.g. `~/.local/share/ownpod` on Linux
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "ownpod", "ownpod")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.relays.len(), 3);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_timeout(), Duration::from_secs(300));
        assert!(config.use_cache_worker);
        assert_eq!(config.storage_quota_bytes, Some(2 * GIB));
        assert_eq!(config.search_country, None);
        assert_eq!(config.progress_save_interval(), Duration::from_secs(10));
        assert_eq!(config.skip_step(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_file_yields_defaults_in_given_dir() {
        let dir = tempdir().unwrap();
        let config = Config::load(Some(dir.path())).unwrap();

        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.database_path(), dir.path().join("ownpod.sqlite3"));
        assert_eq!(config.audio_dir(), dir.path().join("audio"));
        assert_eq!(config.fetch_timeout_secs, 30);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "search_country": "DE", "skip_seconds": 15, "relays": [] }"#,
        )
        .unwrap();

        let config = Config::load(Some(dir.path())).unwrap();

        assert_eq!(config.search_country.as_deref(), Some("DE"));
        assert_eq!(config.skip_seconds, 15);
        assert!(config.relays.is_empty());
        assert_eq!(config.cache_timeout_secs, 300);
        assert_eq!(config.data_dir, dir.path());
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();

        assert!(matches!(
            Config::load(Some(dir.path())),
            Err(ConfigError::ParseFailed { .. })
        ));
    }
}
