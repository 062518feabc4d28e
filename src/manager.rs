// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::download::{AudioCache, BlobStore, DownloadQueue, EnqueueOutcome, spawn_cache_worker};
use crate::error::{FetchError, ManagerError, StoreError};
use crate::feed::{FeedFetcher, file_path_to_url, is_url, parse_feed, read_feed_file};
use crate::http::HttpClient;
use crate::playback::{AudioOutput, DEFAULT_SAVE_INTERVAL, DEFAULT_SKIP_STEP, PlaybackController};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::search::{DirectoryClient, SearchResult};
use crate::storage::{self, StorageEstimate};
use crate::store::{EpisodeId, NewEpisode, NewPodcast, Podcast, PodcastId, PodcastUpdate, Store};

/// Outcome of refreshing one podcast during [`PodcastManager::refresh_all`]
#[derive(Debug)]
pub struct RefreshOutcome {
    pub podcast: Podcast,
    /// Number of new episodes, or why the refresh failed
    pub result: Result<usize, ManagerError>,
}

/// The application object: owns the store, the download queue and the
/// network clients, and exposes the user-level operations.
///
/// Every operation acknowledges its outcome through the progress reporter.
pub struct PodcastManager<C> {
    store: Arc<Store>,
    fetcher: FeedFetcher<C>,
    directory: DirectoryClient<C>,
    queue: DownloadQueue,
    reporter: SharedProgressReporter,
    save_interval: Duration,
    skip_step: Duration,
}

impl<C> PodcastManager<C>
where
    C: HttpClient + Clone + 'static,
{
    /// Assemble a manager from already opened parts. Spawns the download
    /// queue, so it must run inside a Tokio runtime.
    pub fn new(
        store: Arc<Store>,
        fetcher: FeedFetcher<C>,
        directory: DirectoryClient<C>,
        blobs: Arc<BlobStore>,
        cache: Option<Arc<dyn AudioCache>>,
        reporter: SharedProgressReporter,
    ) -> Self {
        let queue = DownloadQueue::spawn(
            Arc::clone(&store),
            fetcher.client().clone(),
            blobs,
            cache,
            Arc::clone(&reporter),
        );

        Self {
            store,
            fetcher,
            directory,
            queue,
            reporter,
            save_interval: DEFAULT_SAVE_INTERVAL,
            skip_step: DEFAULT_SKIP_STEP,
        }
    }

    /// Settings handed to every [`PlaybackController`] built by [`Self::player`]
    pub fn with_playback(mut self, save_interval: Duration, skip_step: Duration) -> Self {
        self.save_interval = save_interval;
        self.skip_step = skip_step;
        self
    }

    /// Open the database and audio cache under `config.data_dir`, start the
    /// background workers and queue downloads an earlier run left unfinished
    pub async fn open(
        config: &Config,
        client: C,
        reporter: SharedProgressReporter,
    ) -> Result<Self, ManagerError> {
        let store = Arc::new(Store::open(&config.database_path())?);
        let blobs =
            Arc::new(BlobStore::open(config.audio_dir())?.with_quota(config.storage_quota_bytes));

        let fetcher =
            FeedFetcher::with_relays(client.clone(), config.relays.clone(), config.fetch_timeout());
        let directory =
            DirectoryClient::new(fetcher.clone()).with_country(config.search_country.clone());

        let cache = config.use_cache_worker.then(|| {
            let handle = spawn_cache_worker(client, Arc::clone(&blobs))
                .with_timeout(config.cache_timeout());
            Arc::new(handle) as Arc<dyn AudioCache>
        });

        info!(data_dir = %config.data_dir.display(), cache_worker = cache.is_some(), "Opened library");
        let manager = Self::new(store, fetcher, directory, blobs, cache, reporter)
            .with_playback(config.progress_save_interval(), config.skip_step());
        manager.resume_downloads().await?;
        Ok(manager)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// A playback controller over `output` sharing this library's store
    pub fn player(&self, output: Arc<dyn AudioOutput>) -> PlaybackController {
        PlaybackController::new(Arc::clone(&self.store), output, Arc::clone(&self.reporter))
            .with_save_interval(self.save_interval)
            .with_skip_step(self.skip_step)
    }

    /// Subscribe to a feed given as an http(s) URL or a local file path.
    ///
    /// Returns the stored podcast and the number of episodes ingested.
    pub async fn subscribe(&self, source: &str) -> Result<(Podcast, usize), ManagerError> {
        let result = self.subscribe_inner(source).await;
        self.acknowledge("subscribe", result)
    }

    async fn subscribe_inner(&self, source: &str) -> Result<(Podcast, usize), ManagerError> {
        let feed_url = if is_url(source) {
            source.to_string()
        } else {
            file_path_to_url(Path::new(source))
        };

        if self.store.get_podcast_by_feed_url(&feed_url)?.is_some() {
            return Err(StoreError::Constraint {
                entity: "podcast",
                field: "feed_url",
                value: feed_url,
            }
            .into());
        }

        let text = if is_url(source) {
            self.load_feed(&feed_url).await?
        } else {
            read_feed_file(Path::new(source))?
        };
        let parsed = parse_feed(&text, &feed_url)?;

        let podcast = self.store.add_podcast(&NewPodcast::from(&parsed.podcast))?;
        let episodes: Vec<NewEpisode> = parsed
            .episodes
            .iter()
            .map(|episode| NewEpisode::from_feed(podcast.id, episode, podcast.image_url.as_deref()))
            .collect();
        let count = self.store.add_episodes(&episodes)?;

        info!(podcast_id = %podcast.id, title = %podcast.title, episodes = count, "Subscribed");
        self.reporter.report(ProgressEvent::Subscribed {
            podcast_title: podcast.title.clone(),
            episode_count: count,
        });
        Ok((podcast, count))
    }

    /// Fetch the feed again, store unseen episodes and re-sync the podcast
    /// metadata. Returns the number of new episodes.
    pub async fn refresh(&self, podcast_id: PodcastId) -> Result<usize, ManagerError> {
        let result = self.refresh_inner(podcast_id).await;
        self.acknowledge("refresh", result)
    }

    async fn refresh_inner(&self, podcast_id: PodcastId) -> Result<usize, ManagerError> {
        let podcast = self.podcast(podcast_id)?;

        let text = self.load_feed(&podcast.feed_url).await?;
        let parsed = parse_feed(&text, &podcast.feed_url)?;

        let updated = self
            .store
            .update_podcast(podcast_id, &PodcastUpdate::from(&parsed.podcast))?;
        let episodes: Vec<NewEpisode> = parsed
            .episodes
            .iter()
            .map(|episode| NewEpisode::from_feed(podcast_id, episode, updated.image_url.as_deref()))
            .collect();
        let new_episodes = self.store.add_episodes(&episodes)?;

        info!(%podcast_id, new_episodes, "Refreshed");
        self.reporter.report(ProgressEvent::Refreshed {
            podcast_title: updated.title,
            new_episodes,
        });
        Ok(new_episodes)
    }

    /// Refresh every subscription in turn. One failing feed does not stop
    /// the others.
    pub async fn refresh_all(&self) -> Result<Vec<RefreshOutcome>, ManagerError> {
        let podcasts = self.store.get_all_podcasts()?;
        let mut outcomes = Vec::with_capacity(podcasts.len());

        for podcast in podcasts {
            let result = self.refresh(podcast.id).await;
            if let Err(e) = &result {
                warn!(podcast_id = %podcast.id, error = %e, "Refresh failed");
            }
            outcomes.push(RefreshOutcome { podcast, result });
        }
        Ok(outcomes)
    }

    /// Drop a subscription, its episodes, downloads, cached audio and
    /// progress. Returns the number of episodes removed.
    pub async fn unsubscribe(&self, podcast_id: PodcastId) -> Result<usize, ManagerError> {
        let result = self.unsubscribe_inner(podcast_id).await;
        self.acknowledge("unsubscribe", result)
    }

    async fn unsubscribe_inner(&self, podcast_id: PodcastId) -> Result<usize, ManagerError> {
        let podcast = self.podcast(podcast_id)?;

        for episode in self.store.get_episodes_by_podcast(podcast_id)? {
            self.queue.remove(episode.id).await?;
        }
        let removed = self.store.delete_podcast(podcast_id)?;

        self.reporter.report(ProgressEvent::Unsubscribed {
            podcast_title: podcast.title,
        });
        Ok(removed)
    }

    /// Ask the queue for a download of `episode_id`
    pub async fn download(&self, episode_id: EpisodeId) -> Result<EnqueueOutcome, ManagerError> {
        let result = self.download_inner(episode_id).await;
        self.acknowledge("download", result)
    }

    async fn download_inner(&self, episode_id: EpisodeId) -> Result<EnqueueOutcome, ManagerError> {
        let outcome = self.queue.enqueue(episode_id).await?;
        let episode_title = self.episode_title(episode_id);

        let event = match outcome.existing_status() {
            None => ProgressEvent::DownloadQueued { episode_title },
            Some(status) => ProgressEvent::DownloadNotQueued {
                episode_title,
                status,
            },
        };
        self.reporter.report(event);
        Ok(outcome)
    }

    /// Delete the download record and cached audio of `episode_id`.
    /// Returns whether there was anything to remove.
    pub async fn remove_download(&self, episode_id: EpisodeId) -> Result<bool, ManagerError> {
        let result = self.queue.remove(episode_id).await.map_err(ManagerError::from);
        let removed = self.acknowledge("remove download", result)?;

        if removed {
            self.reporter.report(ProgressEvent::DownloadRemoved {
                episode_title: self.episode_title(episode_id),
            });
        }
        Ok(removed)
    }

    /// Queue downloads left pending or in flight by an earlier run
    pub async fn resume_downloads(&self) -> Result<usize, ManagerError> {
        let result = self.queue.resume().await.map_err(ManagerError::from);
        self.acknowledge("resume downloads", result)
    }

    pub async fn search(&self, term: &str, limit: u32) -> Result<Vec<SearchResult>, ManagerError> {
        let result = self.directory.search(term, limit).await.map_err(ManagerError::from);
        self.acknowledge("search", result)
    }

    pub async fn lookup(&self, itunes_id: u64) -> Result<SearchResult, ManagerError> {
        let result = self.directory.lookup(itunes_id).await.map_err(ManagerError::from);
        self.acknowledge("lookup", result)
    }

    pub fn storage_estimate(&self) -> Result<StorageEstimate, ManagerError> {
        let result = storage::estimate(self.queue.blobs(), &self.store).map_err(ManagerError::from);
        self.acknowledge("storage estimate", result)
    }

    /// Fetch a stored feed URL. `file://` subscriptions are read from disk.
    async fn load_feed(&self, feed_url: &str) -> Result<String, FetchError> {
        if let Ok(url) = Url::parse(feed_url)
            && url.scheme() == "file"
            && let Ok(path) = url.to_file_path()
        {
            return read_feed_file(&path);
        }

        self.reporter.report(ProgressEvent::FetchingFeed {
            url: feed_url.to_string(),
        });
        self.fetcher.fetch(feed_url).await
    }

    fn podcast(&self, podcast_id: PodcastId) -> Result<Podcast, StoreError> {
        self.store
            .get_podcast(podcast_id)?
            .ok_or(StoreError::NotFound {
                entity: "podcast",
                id: podcast_id.0,
            })
    }

    fn episode_title(&self, episode_id: EpisodeId) -> String {
        match self.store.get_episode(episode_id) {
            Ok(Some(episode)) => episode.title,
            _ => format!("episode {episode_id}"),
        }
    }

    fn acknowledge<T>(
        &self,
        operation: &str,
        result: Result<T, ManagerError>,
    ) -> Result<T, ManagerError> {
        if let Err(e) = &result {
            self.reporter.report(ProgressEvent::OperationFailed {
                operation: operation.to_string(),
                error: e.to_string(),
            });
        }
        result
    }
}
