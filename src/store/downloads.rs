// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::{Download, DownloadStatus, DownloadUpdate, EpisodeId};
use super::{Store, from_millis, is_foreign_key_violation, is_unique_violation, to_millis};
use crate::error::StoreError;

const COLUMNS: &str = "episode_id, audio_url, status, progress, downloaded_date, error, local_path";

fn download_from_row(row: &Row<'_>) -> rusqlite::Result<Download> {
    let status: String = row.get(2)?;
    let status = DownloadStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown download status '{status}'").into(),
        )
    })?;
    let progress: i64 = row.get(3)?;
    let local_path: Option<String> = row.get(6)?;

    Ok(Download {
        episode_id: EpisodeId(row.get(0)?),
        audio_url: row.get(1)?,
        status,
        progress: progress.clamp(0, 100) as u8,
        downloaded_date: from_millis(row.get(4)?),
        error: row.get(5)?,
        local_path: local_path.map(PathBuf::from),
    })
}

fn select_download(
    conn: &Connection,
    episode_id: EpisodeId,
) -> Result<Option<Download>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM downloads WHERE episode_id = ?1");
    Ok(conn
        .query_row(&sql, [episode_id.0], download_from_row)
        .optional()?)
}

fn path_to_sql(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

impl Store {
    /// Create a pending download record. At most one record exists per
    /// episode; the episode must exist.
    pub fn add_download(
        &self,
        episode_id: EpisodeId,
        audio_url: &str,
    ) -> Result<Download, StoreError> {
        let now = to_millis(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO downloads (episode_id, audio_url, status, progress, downloaded_date)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![episode_id.0, audio_url, DownloadStatus::Pending.as_str(), now],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Constraint {
                        entity: "download",
                        field: "episode",
                        value: episode_id.to_string(),
                    }
                } else if is_foreign_key_violation(&e) {
                    StoreError::NotFound {
                        entity: "episode",
                        id: episode_id.0,
                    }
                } else {
                    e.into()
                }
            })?;

            Ok(Download {
                episode_id,
                audio_url: audio_url.to_string(),
                status: DownloadStatus::Pending,
                progress: 0,
                downloaded_date: from_millis(now),
                error: None,
                local_path: None,
            })
        })
    }

    pub fn get_download(&self, episode_id: EpisodeId) -> Result<Option<Download>, StoreError> {
        self.with_conn(|conn| select_download(conn, episode_id))
    }

    /// Every download record, ordered by episode id
    pub fn get_all_downloads(&self) -> Result<Vec<Download>, StoreError> {
        self.get_downloads_by_status(&[
            DownloadStatus::Pending,
            DownloadStatus::Downloading,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
        ])
    }

    /// Download records in any of `statuses`, ordered by episode id
    pub fn get_downloads_by_status(
        &self,
        statuses: &[DownloadStatus],
    ) -> Result<Vec<Download>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            let placeholders = vec!["?"; statuses.len()].join(", ");
            let sql = format!(
                "SELECT {COLUMNS} FROM downloads WHERE status IN ({placeholders}) ORDER BY episode_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let downloads = stmt
                .query_map(
                    params_from_iter(statuses.iter().map(|s| s.as_str())),
                    download_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(downloads)
        })
    }

    /// Merge `update` into an existing record
    pub fn update_download(
        &self,
        episode_id: EpisodeId,
        update: &DownloadUpdate,
    ) -> Result<Download, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut download = select_download(&tx, episode_id)?.ok_or(StoreError::NotFound {
                entity: "download",
                id: episode_id.0,
            })?;

            update.apply(&mut download);

            tx.execute(
                "UPDATE downloads
                 SET audio_url = ?2, status = ?3, progress = ?4, downloaded_date = ?5, error = ?6, local_path = ?7
                 WHERE episode_id = ?1",
                params![
                    episode_id.0,
                    download.audio_url,
                    download.status.as_str(),
                    download.progress,
                    to_millis(download.downloaded_date),
                    download.error,
                    path_to_sql(&download.local_path),
                ],
            )?;
            tx.commit()?;
            Ok(download)
        })
    }

    /// Returns whether a record was removed
    pub fn delete_download(&self, episode_id: EpisodeId) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM downloads WHERE episode_id = ?1", [episode_id.0])?;
            Ok(removed > 0)
        })
    }
}
