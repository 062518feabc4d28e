// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

/// Bump when adding a migration step
const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS podcasts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    title         TEXT    NOT NULL,
    description   TEXT    NOT NULL DEFAULT '',
    feed_url      TEXT    NOT NULL UNIQUE,
    image_url     TEXT,
    author        TEXT    NOT NULL DEFAULT '',
    link          TEXT    NOT NULL DEFAULT '',
    added_date    INTEGER NOT NULL,
    last_updated  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_podcasts_title ON podcasts(title);

CREATE TABLE IF NOT EXISTS episodes (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    podcast_id    INTEGER NOT NULL REFERENCES podcasts(id),
    guid          TEXT    NOT NULL UNIQUE,
    title         TEXT    NOT NULL,
    description   TEXT    NOT NULL DEFAULT '',
    audio_url     TEXT    NOT NULL DEFAULT '',
    duration      INTEGER NOT NULL DEFAULT 0,
    pub_date      INTEGER NOT NULL,
    image_url     TEXT,
    added_date    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_episodes_podcast_id ON episodes(podcast_id);
CREATE INDEX IF NOT EXISTS idx_episodes_pub_date ON episodes(pub_date);

CREATE TABLE IF NOT EXISTS downloads (
    episode_id      INTEGER PRIMARY KEY REFERENCES episodes(id),
    audio_url       TEXT    NOT NULL,
    status          TEXT    NOT NULL,
    progress        INTEGER NOT NULL DEFAULT 0,
    downloaded_date INTEGER NOT NULL,
    error           TEXT,
    local_path      TEXT
);
CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);

CREATE TABLE IF NOT EXISTS progress (
    episode_id    INTEGER PRIMARY KEY REFERENCES episodes(id),
    position      REAL    NOT NULL,
    duration      REAL    NOT NULL,
    last_played   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_progress_last_played ON progress(last_played);
"#;

/// Bring the schema up to date
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(StoreError::Migration)?;

    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(SCHEMA_V1)
        .map_err(StoreError::Migration)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(StoreError::Migration)?;

    info!(from = version, to = SCHEMA_VERSION, "Database schema migrated");
    Ok(())
}
