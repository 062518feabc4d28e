// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{EpisodeId, Progress};
use super::{Store, from_millis, is_foreign_key_violation, to_millis};
use crate::error::StoreError;

const COLUMNS: &str = "episode_id, position, duration, last_played";

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<Progress> {
    Ok(Progress {
        episode_id: EpisodeId(row.get(0)?),
        current_time: row.get(1)?,
        duration: row.get(2)?,
        last_played: from_millis(row.get(3)?),
    })
}

/// Players report NaN before metadata loads
fn finite_or_zero(seconds: f64) -> f64 {
    if seconds.is_finite() { seconds.max(0.0) } else { 0.0 }
}

impl Store {
    /// Record the playback position of an episode, stamped now
    pub fn save_progress(
        &self,
        episode_id: EpisodeId,
        current_time: f64,
        duration: f64,
    ) -> Result<Progress, StoreError> {
        self.save_progress_at(episode_id, current_time, duration, Utc::now())
    }

    /// Upsert the progress record with an explicit `last_played`
    pub fn save_progress_at(
        &self,
        episode_id: EpisodeId,
        current_time: f64,
        duration: f64,
        last_played: DateTime<Utc>,
    ) -> Result<Progress, StoreError> {
        let progress = Progress {
            episode_id,
            current_time: finite_or_zero(current_time),
            duration: finite_or_zero(duration),
            last_played: from_millis(to_millis(last_played)),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO progress (episode_id, position, duration, last_played)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(episode_id) DO UPDATE SET
                    position = excluded.position,
                    duration = excluded.duration,
                    last_played = excluded.last_played",
                params![
                    episode_id.0,
                    progress.current_time,
                    progress.duration,
                    to_millis(progress.last_played),
                ],
            )
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    StoreError::NotFound {
                        entity: "episode",
                        id: episode_id.0,
                    }
                } else {
                    e.into()
                }
            })?;
            Ok(progress)
        })
    }

    pub fn get_progress(&self, episode_id: EpisodeId) -> Result<Option<Progress>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM progress WHERE episode_id = ?1");
            Ok(conn
                .query_row(&sql, [episode_id.0], progress_from_row)
                .optional()?)
        })
    }

    pub fn delete_progress(&self, episode_id: EpisodeId) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM progress WHERE episode_id = ?1", [episode_id.0])?;
            Ok(removed > 0)
        })
    }

    /// Up to `limit` progress records, most recently played first
    pub fn get_recently_played(&self, limit: usize) -> Result<Vec<Progress>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM progress ORDER BY last_played DESC, episode_id DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let records = stmt
                .query_map([limit], progress_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }
}
