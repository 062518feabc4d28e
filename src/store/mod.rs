//! SQLite-backed persistence for podcasts, episodes, downloads and
//! playback progress.
//!
//! A single connection sits behind a mutex. Every operation takes the lock,
//! runs to completion and releases it, so callers never hold it across an
//! await point. Multi-row writes run inside one transaction.

mod downloads;
mod episodes;
mod models;
mod playback;
mod podcasts;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, ffi};
use tracing::debug;

use crate::error::StoreError;

pub use models::{
    Download, DownloadStatus, DownloadUpdate, Episode, EpisodeId, NewEpisode, NewPodcast,
    Podcast, PodcastId, PodcastUpdate, Progress,
};

/// File name of the database inside the data directory
pub const DATABASE_FILE: &str = "ownpod.sqlite3";

pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            // A missing parent surfaces as an open error below
            let _ = std::fs::create_dir_all(parent);
        }

        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(StoreError::Migration)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StoreError::Migration)?;

        debug!(path = %path.display(), "Opened database");
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// A private database that disappears when dropped
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::Migration)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, if the store is file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bytes used by the database file and its write-ahead log
    pub fn size_on_disk(&self) -> u64 {
        let Some(path) = &self.path else {
            return 0;
        };
        let mut wal = path.clone().into_os_string();
        wal.push("-wal");

        [path.clone(), PathBuf::from(wal)]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}

fn to_millis(date: DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    err.sqlite_error().map(|e| e.extended_code)
}

/// Unique or primary-key violation
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        extended_code(err),
        Some(ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    extended_code(err) == Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use super::*;

    pub fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    pub fn podcast(store: &Store, feed_url: &str) -> Podcast {
        store
            .add_podcast(&NewPodcast {
                title: format!("Podcast at {feed_url}"),
                description: String::new(),
                feed_url: feed_url.to_string(),
                image_url: None,
                author: "Unknown".to_string(),
                link: String::new(),
            })
            .unwrap()
    }

    /// Episode published on day `day` of January 2024
    pub fn new_episode(podcast_id: PodcastId, guid: &str, day: u32) -> NewEpisode {
        NewEpisode {
            podcast_id,
            guid: guid.to_string(),
            title: format!("Episode {guid}"),
            description: String::new(),
            audio_url: format!("https://example.com/{guid}.mp3"),
            duration: 0,
            pub_date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            image_url: None,
        }
    }

    pub fn episode(store: &Store, podcast_id: PodcastId, guid: &str, day: u32) -> Episode {
        store.add_episode(&new_episode(podcast_id, guid, day)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DATABASE_FILE);

        {
            let store = Store::open(&path).unwrap();
            fixtures::podcast(&store, "https://example.com/feed.xml");
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_all_podcasts().unwrap().len(), 1);
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(store.size_on_disk() > 0);
    }

    #[test]
    fn millis_conversion_keeps_precision() {
        let date = Utc.timestamp_millis_opt(1_704_110_400_123).unwrap();
        assert_eq!(from_millis(to_millis(date)), date);
    }
}
