// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, trace};

use super::{Episode, EpisodeId, NewEpisode, PodcastId};
use super::{Store, from_millis, is_foreign_key_violation, is_unique_violation, to_millis};
use crate::error::StoreError;

const COLUMNS: &str =
    "id, podcast_id, guid, title, description, audio_url, duration, pub_date, image_url, added_date";

const INSERT: &str = "INSERT INTO episodes
    (podcast_id, guid, title, description, audio_url, duration, pub_date, image_url, added_date)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let duration: i64 = row.get(6)?;
    Ok(Episode {
        id: EpisodeId(row.get(0)?),
        podcast_id: PodcastId(row.get(1)?),
        guid: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        audio_url: row.get(5)?,
        duration: duration.max(0) as u64,
        pub_date: from_millis(row.get(7)?),
        image_url: row.get(8)?,
        added_date: from_millis(row.get(9)?),
    })
}

fn insert(conn: &Connection, episode: &NewEpisode, added: i64) -> rusqlite::Result<i64> {
    let mut stmt = conn.prepare_cached(INSERT)?;
    stmt.execute(params![
        episode.podcast_id.0,
        episode.guid,
        episode.title,
        episode.description,
        episode.audio_url,
        i64::try_from(episode.duration).unwrap_or(i64::MAX),
        to_millis(episode.pub_date),
        episode.image_url,
        added,
    ])?;
    Ok(conn.last_insert_rowid())
}

fn insert_error(err: rusqlite::Error, episode: &NewEpisode) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Constraint {
            entity: "episode",
            field: "guid",
            value: episode.guid.clone(),
        }
    } else if is_foreign_key_violation(&err) {
        StoreError::NotFound {
            entity: "podcast",
            id: episode.podcast_id.0,
        }
    } else {
        err.into()
    }
}

pub(super) fn select_episode(
    conn: &Connection,
    id: EpisodeId,
) -> Result<Option<Episode>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM episodes WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.0], episode_from_row).optional()?)
}

/// Remove an episode's download and progress records, then the episode
pub(super) fn delete_episode_rows(conn: &Connection, id: EpisodeId) -> Result<usize, StoreError> {
    conn.execute("DELETE FROM downloads WHERE episode_id = ?1", [id.0])?;
    conn.execute("DELETE FROM progress WHERE episode_id = ?1", [id.0])?;
    Ok(conn.execute("DELETE FROM episodes WHERE id = ?1", [id.0])?)
}

impl Store {
    /// Insert one episode. A repeated guid is a constraint error; an unknown
    /// podcast is not found.
    pub fn add_episode(&self, episode: &NewEpisode) -> Result<Episode, StoreError> {
        let added = to_millis(Utc::now());
        self.with_conn(|conn| {
            let id = insert(conn, episode, added).map_err(|e| insert_error(e, episode))?;
            Ok(Episode {
                id: EpisodeId(id),
                podcast_id: episode.podcast_id,
                guid: episode.guid.clone(),
                title: episode.title.clone(),
                description: episode.description.clone(),
                audio_url: episode.audio_url.clone(),
                duration: episode.duration,
                pub_date: from_millis(to_millis(episode.pub_date)),
                image_url: episode.image_url.clone(),
                added_date: from_millis(added),
            })
        })
    }

    /// Insert a batch in one transaction. Episodes whose guid already exists
    /// are skipped; any other failure rolls the whole batch back. Returns the
    /// number actually inserted.
    pub fn add_episodes(&self, episodes: &[NewEpisode]) -> Result<usize, StoreError> {
        let added = to_millis(Utc::now());
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;

            for episode in episodes {
                match insert(&tx, episode, added) {
                    Ok(_) => inserted += 1,
                    Err(e) if is_unique_violation(&e) => {
                        trace!(guid = %episode.guid, "Episode already stored");
                    }
                    Err(e) => return Err(insert_error(e, episode)),
                }
            }

            tx.commit()?;
            debug!(inserted, skipped = episodes.len() - inserted, "Stored episode batch");
            Ok(inserted)
        })
    }

    pub fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StoreError> {
        self.with_conn(|conn| select_episode(conn, id))
    }

    pub fn get_episode_by_guid(&self, guid: &str) -> Result<Option<Episode>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM episodes WHERE guid = ?1");
            Ok(conn.query_row(&sql, [guid], episode_from_row).optional()?)
        })
    }

    /// Episodes of one podcast, newest first. Ties keep insertion order.
    pub fn get_episodes_by_podcast(
        &self,
        podcast_id: PodcastId,
    ) -> Result<Vec<Episode>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM episodes WHERE podcast_id = ?1 ORDER BY pub_date DESC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let episodes = stmt
                .query_map([podcast_id.0], episode_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(episodes)
        })
    }

    /// Delete an episode with its download and progress records
    pub fn delete_episode(&self, id: EpisodeId) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if delete_episode_rows(&tx, id)? == 0 {
                return Err(StoreError::NotFound {
                    entity: "episode",
                    id: id.0,
                });
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Total episodes across all podcasts
    pub fn count_episodes(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM episodes", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}
