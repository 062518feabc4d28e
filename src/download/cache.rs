// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The caching collaborator: an isolated task that fetches audio into the
//! blob cache. It shares no state with its callers and is reached only by
//! message passing. Results are broadcast, so a caller waiting on one
//! download must pick its own event out by episode id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::blob::BlobStore;
use super::transfer::transfer;
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::store::EpisodeId;

/// How long a caller waits for the worker to answer a download request
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(300);

const EVENT_CAPACITY: usize = 64;

/// Messages accepted by the cache worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRequest {
    DownloadAudio { url: String, id: EpisodeId },
    /// Stop the transfer for `id`, if one is running
    CancelDownload { id: EpisodeId },
    DeleteAudio { url: String },
}

/// Messages emitted by the cache worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    DownloadComplete {
        episode_id: EpisodeId,
        url: String,
        path: PathBuf,
    },
    DownloadError {
        episode_id: EpisodeId,
        error: String,
    },
    /// Answer to `CancelDownload`. Sent once the transfer is gone and its
    /// partial file removed.
    DownloadCancelled { episode_id: EpisodeId },
}

impl CacheEvent {
    pub fn episode_id(&self) -> EpisodeId {
        match self {
            CacheEvent::DownloadComplete { episode_id, .. }
            | CacheEvent::DownloadError { episode_id, .. }
            | CacheEvent::DownloadCancelled { episode_id } => *episode_id,
        }
    }
}

/// Something that can fetch audio into the cache on the queue's behalf
#[async_trait]
pub trait AudioCache: Send + Sync {
    /// Fetch `url` for `episode_id` and return the cached file
    async fn download(&self, url: &str, episode_id: EpisodeId) -> Result<PathBuf, DownloadError>;

    /// Drop any cached copy of `url`. Does not wait for the result.
    fn delete(&self, url: &str);
}

/// Spawn a cache worker writing into `blobs`
pub fn spawn_cache_worker<C>(client: C, blobs: Arc<BlobStore>) -> CacheHandle
where
    C: HttpClient + 'static,
{
    let (requests, mut inbox) = mpsc::unbounded_channel::<CacheRequest>();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let client = Arc::new(client);

    let outbox = events.clone();
    tokio::spawn(async move {
        let mut in_flight: HashMap<EpisodeId, JoinHandle<()>> = HashMap::new();

        while let Some(request) = inbox.recv().await {
            in_flight.retain(|_, task| !task.is_finished());

            match request {
                CacheRequest::DownloadAudio { url, id } => {
                    let client = Arc::clone(&client);
                    let blobs = Arc::clone(&blobs);
                    let outbox = outbox.clone();
                    let task = tokio::spawn(async move {
                        let event = match transfer(client.as_ref(), &url, &blobs, |_, _| {}).await {
                            Ok(done) => CacheEvent::DownloadComplete {
                                episode_id: id,
                                url,
                                path: done.path,
                            },
                            Err(e) => {
                                warn!(%url, episode_id = %id, error = %e, "Cache worker download failed");
                                CacheEvent::DownloadError {
                                    episode_id: id,
                                    error: e.to_string(),
                                }
                            }
                        };
                        // Nobody listening is fine
                        let _ = outbox.send(event);
                    });

                    // One transfer per episode
                    if let Some(previous) = in_flight.insert(id, task) {
                        previous.abort();
                    }
                }
                CacheRequest::CancelDownload { id } => {
                    if let Some(task) = in_flight.remove(&id) {
                        task.abort();
                        // Resolves once the transfer future is dropped
                        if let Err(e) = task.await
                            && e.is_panic()
                        {
                            warn!(episode_id = %id, error = %e, "Cache transfer panicked");
                        }
                        debug!(episode_id = %id, "Cache download cancelled");
                    }
                    let _ = outbox.send(CacheEvent::DownloadCancelled { episode_id: id });
                }
                CacheRequest::DeleteAudio { url } => {
                    if let Err(e) = blobs.remove(&url).await {
                        warn!(%url, error = %e, "Cache worker could not delete audio");
                    }
                }
            }
        }
        debug!("Cache worker stopped");
    });

    CacheHandle {
        requests,
        events,
        timeout: DEFAULT_CACHE_TIMEOUT,
    }
}

/// Wait for the next event about `episode_id`. `None` once the worker is gone.
async fn next_answer(
    events: &mut broadcast::Receiver<CacheEvent>,
    episode_id: EpisodeId,
) -> Option<CacheEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.episode_id() == episode_id => return Some(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Cache events were dropped while waiting");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn settle(event: CacheEvent) -> Result<PathBuf, DownloadError> {
    match event {
        CacheEvent::DownloadComplete { path, .. } => Ok(path),
        CacheEvent::DownloadError { error, .. } => Err(DownloadError::Collaborator(error)),
        CacheEvent::DownloadCancelled { .. } => {
            Err(DownloadError::Collaborator("download was cancelled".to_string()))
        }
    }
}

/// Sending side of a cache worker
#[derive(Clone)]
pub struct CacheHandle {
    requests: mpsc::UnboundedSender<CacheRequest>,
    events: broadcast::Sender<CacheEvent>,
    timeout: Duration,
}

impl CacheHandle {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Observe every event the worker emits
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn send(&self, request: CacheRequest) -> Result<(), DownloadError> {
        self.requests
            .send(request)
            .map_err(|_| DownloadError::CollaboratorUnavailable)
    }
}

#[async_trait]
impl AudioCache for CacheHandle {
    async fn download(&self, url: &str, episode_id: EpisodeId) -> Result<PathBuf, DownloadError> {
        // Subscribe first so the answer cannot slip past
        let mut events = self.subscribe();
        self.send(CacheRequest::DownloadAudio {
            url: url.to_string(),
            id: episode_id,
        })?;

        match tokio::time::timeout(self.timeout, next_answer(&mut events, episode_id)).await {
            Ok(Some(event)) => settle(event),
            Ok(None) => Err(DownloadError::CollaboratorUnavailable),
            Err(_) => {
                // Stop the worker's transfer before reporting the timeout
                self.send(CacheRequest::CancelDownload { id: episode_id })?;
                match next_answer(&mut events, episode_id).await {
                    Some(CacheEvent::DownloadComplete { path, .. }) => Ok(path),
                    Some(_) | None => Err(DownloadError::Timeout {
                        url: url.to_string(),
                        seconds: self.timeout.as_secs(),
                    }),
                }
            }
        }
    }

    fn delete(&self, url: &str) {
        if self
            .send(CacheRequest::DeleteAudio {
                url: url.to_string(),
            })
            .is_err()
        {
            debug!(url, "Cache worker gone, delete request dropped");
        }
    }
}
