// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::{Store, from_millis, is_unique_violation, to_millis};
use super::{NewPodcast, Podcast, PodcastId, PodcastUpdate};
use crate::error::StoreError;

const COLUMNS: &str =
    "id, title, description, feed_url, image_url, author, link, added_date, last_updated";

fn podcast_from_row(row: &Row<'_>) -> rusqlite::Result<Podcast> {
    Ok(Podcast {
        id: PodcastId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        feed_url: row.get(3)?,
        image_url: row.get(4)?,
        author: row.get(5)?,
        link: row.get(6)?,
        added_date: from_millis(row.get(7)?),
        last_updated: from_millis(row.get(8)?),
    })
}

pub(super) fn select_podcast(
    conn: &Connection,
    id: PodcastId,
) -> Result<Option<Podcast>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM podcasts WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.0], podcast_from_row).optional()?)
}

impl Store {
    /// Insert a podcast. Fails with a constraint error if its feed URL is
    /// already subscribed.
    pub fn add_podcast(&self, podcast: &NewPodcast) -> Result<Podcast, StoreError> {
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO podcasts (title, description, feed_url, image_url, author, link, added_date, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    podcast.title,
                    podcast.description,
                    podcast.feed_url,
                    podcast.image_url,
                    podcast.author,
                    podcast.link,
                    to_millis(now),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Constraint {
                        entity: "podcast",
                        field: "feed URL",
                        value: podcast.feed_url.clone(),
                    }
                } else {
                    e.into()
                }
            })?;

            let id = PodcastId(conn.last_insert_rowid());
            debug!(%id, feed_url = %podcast.feed_url, "Added podcast");

            Ok(Podcast {
                id,
                title: podcast.title.clone(),
                description: podcast.description.clone(),
                feed_url: podcast.feed_url.clone(),
                image_url: podcast.image_url.clone(),
                author: podcast.author.clone(),
                link: podcast.link.clone(),
                added_date: from_millis(to_millis(now)),
                last_updated: from_millis(to_millis(now)),
            })
        })
    }

    pub fn get_podcast(&self, id: PodcastId) -> Result<Option<Podcast>, StoreError> {
        self.with_conn(|conn| select_podcast(conn, id))
    }

    pub fn get_podcast_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM podcasts WHERE feed_url = ?1");
            Ok(conn
                .query_row(&sql, [feed_url], podcast_from_row)
                .optional()?)
        })
    }

    /// All podcasts, in subscription order
    pub fn get_all_podcasts(&self) -> Result<Vec<Podcast>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM podcasts ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let podcasts = stmt
                .query_map([], podcast_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(podcasts)
        })
    }

    /// Merge `update` into the stored podcast and bump its `last_updated`
    pub fn update_podcast(
        &self,
        id: PodcastId,
        update: &PodcastUpdate,
    ) -> Result<Podcast, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut podcast = select_podcast(&tx, id)?.ok_or(StoreError::NotFound {
                entity: "podcast",
                id: id.0,
            })?;

            update.apply(&mut podcast);
            podcast.last_updated = from_millis(to_millis(Utc::now()));

            tx.execute(
                "UPDATE podcasts
                 SET title = ?2, description = ?3, image_url = ?4, author = ?5, link = ?6, last_updated = ?7
                 WHERE id = ?1",
                params![
                    id.0,
                    podcast.title,
                    podcast.description,
                    podcast.image_url,
                    podcast.author,
                    podcast.link,
                    to_millis(podcast.last_updated),
                ],
            )?;
            tx.commit()?;
            Ok(podcast)
        })
    }

    /// Delete a podcast together with its episodes and their download and
    /// progress records. Returns the number of episodes removed.
    pub fn delete_podcast(&self, id: PodcastId) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if select_podcast(&tx, id)?.is_none() {
                return Err(StoreError::NotFound {
                    entity: "podcast",
                    id: id.0,
                });
            }

            let owned = "SELECT id FROM episodes WHERE podcast_id = ?1";
            tx.execute(
                &format!("DELETE FROM downloads WHERE episode_id IN ({owned})"),
                [id.0],
            )?;
            tx.execute(
                &format!("DELETE FROM progress WHERE episode_id IN ({owned})"),
                [id.0],
            )?;
            let episodes = tx.execute("DELETE FROM episodes WHERE podcast_id = ?1", [id.0])?;
            tx.execute("DELETE FROM podcasts WHERE id = ?1", [id.0])?;
            tx.commit()?;

            info!(%id, episodes, "Deleted podcast");
            Ok(episodes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;
    use crate::store::DownloadStatus;

    const FEED: &str = "https://example.com/feed.xml";

    #[test]
    fn add_and_get_podcast() {
        let store = fixtures::store();
        let added = fixtures::podcast(&store, FEED);

        let fetched = store.get_podcast(added.id).unwrap().unwrap();
        assert_eq!(fetched, added);
        assert_eq!(
            store.get_podcast_by_feed_url(FEED).unwrap().map(|p| p.id),
            Some(added.id)
        );
        assert!(store.get_podcast(PodcastId(999)).unwrap().is_none());
    }

    #[test]
    fn duplicate_feed_url_is_a_constraint_error() {
        let store = fixtures::store();
        fixtures::podcast(&store, FEED);

        let err = store
            .add_podcast(&NewPodcast {
                title: "Again".into(),
                description: String::new(),
                feed_url: FEED.into(),
                image_url: None,
                author: String::new(),
                link: String::new(),
            })
            .unwrap_err();

        assert!(err.is_constraint());
        assert_eq!(store.get_all_podcasts().unwrap().len(), 1);
    }

    #[test]
    fn update_merges_and_bumps_last_updated() {
        let store = fixtures::store();
        let added = fixtures::podcast(&store, FEED);

        let updated = store
            .update_podcast(
                added.id,
                &PodcastUpdate {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.author, added.author);
        assert!(updated.last_updated >= added.last_updated);
        assert_eq!(store.get_podcast(added.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn update_missing_podcast_is_not_found() {
        let store = fixtures::store();
        let err = store
            .update_podcast(PodcastId(42), &PodcastUpdate::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_cascades_to_episodes_downloads_and_progress() {
        let store = fixtures::store();
        let podcast = fixtures::podcast(&store, FEED);
        let other = fixtures::podcast(&store, "https://example.com/other.xml");

        let a = fixtures::episode(&store, podcast.id, "A", 1);
        let b = fixtures::episode(&store, podcast.id, "B", 2);
        let kept = fixtures::episode(&store, other.id, "K", 3);
        store.add_download(a.id, &a.audio_url).unwrap();
        store.save_progress(b.id, 12.0, 60.0).unwrap();
        store.add_download(kept.id, &kept.audio_url).unwrap();

        assert_eq!(store.delete_podcast(podcast.id).unwrap(), 2);

        assert!(store.get_podcast(podcast.id).unwrap().is_none());
        assert!(store.get_episode(a.id).unwrap().is_none());
        assert!(store.get_download(a.id).unwrap().is_none());
        assert!(store.get_progress(b.id).unwrap().is_none());

        assert_eq!(store.count_episodes().unwrap(), 1);
        assert_eq!(
            store.get_download(kept.id).unwrap().map(|d| d.status),
            Some(DownloadStatus::Pending)
        );
    }

    #[test]
    fn delete_missing_podcast_is_not_found() {
        let store = fixtures::store();
        assert!(store.delete_podcast(PodcastId(1)).unwrap_err().is_not_found());
    }
}
