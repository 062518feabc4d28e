// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::blob::BlobStore;
use super::cache::AudioCache;
use super::transfer::{percent, transfer};
use crate::error::{DownloadError, QueueError, StoreError};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{Download, DownloadStatus, DownloadUpdate, EpisodeId, Store};

/// What `enqueue` did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyQueued,
    AlreadyDownloading,
    AlreadyCompleted,
}

impl EnqueueOutcome {
    pub fn is_queued(self) -> bool {
        self == EnqueueOutcome::Queued
    }

    /// Status of the existing record that prevented queueing
    pub fn existing_status(self) -> Option<DownloadStatus> {
        match self {
            EnqueueOutcome::Queued => None,
            EnqueueOutcome::AlreadyQueued => Some(DownloadStatus::Pending),
            EnqueueOutcome::AlreadyDownloading => Some(DownloadStatus::Downloading),
            EnqueueOutcome::AlreadyCompleted => Some(DownloadStatus::Completed),
        }
    }
}

/// Serial download queue.
///
/// Jobs are processed one at a time, in the order they were submitted, by a
/// single task that owns the receiving end of the job channel. Individual
/// failures are recorded on the download record and never stop the loop.
pub struct DownloadQueue {
    store: Arc<Store>,
    blobs: Arc<BlobStore>,
    cache: Option<Arc<dyn AudioCache>>,
    reporter: SharedProgressReporter,
    jobs: mpsc::UnboundedSender<EpisodeId>,
    outstanding: Arc<watch::Sender<usize>>,
    enqueue_lock: Mutex<()>,
}

impl DownloadQueue {
    /// Start the consumer task. When `cache` is set, transfers are delegated
    /// to it first and fall back to a direct download into `blobs`.
    pub fn spawn<C>(
        store: Arc<Store>,
        client: C,
        blobs: Arc<BlobStore>,
        cache: Option<Arc<dyn AudioCache>>,
        reporter: SharedProgressReporter,
    ) -> Self
    where
        C: HttpClient + 'static,
    {
        let (jobs, inbox) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);
        let outstanding = Arc::new(outstanding);

        let worker = Worker {
            store: Arc::clone(&store),
            client,
            blobs: Arc::clone(&blobs),
            cache: cache.clone(),
            reporter: Arc::clone(&reporter),
        };
        tokio::spawn(worker.run(inbox, Arc::clone(&outstanding)));

        Self {
            store,
            blobs,
            cache,
            reporter,
            jobs,
            outstanding,
            enqueue_lock: Mutex::new(()),
        }
    }

    /// Request a download of `episode_id`.
    ///
    /// A pending, downloading or completed record is left alone and reported
    /// through the outcome. A failed record is reset and queued again.
    pub async fn enqueue(&self, episode_id: EpisodeId) -> Result<EnqueueOutcome, QueueError> {
        let _serial = self.enqueue_lock.lock().await;

        let episode = self
            .store
            .get_episode(episode_id)?
            .ok_or(StoreError::NotFound {
                entity: "episode",
                id: episode_id.0,
            })?;

        match self.store.get_download(episode_id)? {
            Some(existing) => match existing.status {
                DownloadStatus::Pending => return Ok(EnqueueOutcome::AlreadyQueued),
                DownloadStatus::Downloading => return Ok(EnqueueOutcome::AlreadyDownloading),
                DownloadStatus::Completed => return Ok(EnqueueOutcome::AlreadyCompleted),
                DownloadStatus::Failed => {
                    debug!(%episode_id, "Retrying failed download");
                    self.store
                        .update_download(episode_id, &DownloadUpdate::requeue(&episode.audio_url))?;
                }
            },
            None => {
                self.store.add_download(episode_id, &episode.audio_url)?;
            }
        }

        self.submit(episode_id)?;
        info!(%episode_id, title = %episode.title, "Download queued");
        Ok(EnqueueOutcome::Queued)
    }

    /// Queue every pending or downloading record again, in store order.
    ///
    /// Meant to run once at startup, before new requests arrive.
    pub async fn resume(&self) -> Result<usize, QueueError> {
        let _serial = self.enqueue_lock.lock().await;

        let incomplete = self
            .store
            .get_downloads_by_status(&[DownloadStatus::Pending, DownloadStatus::Downloading])?;

        for download in &incomplete {
            self.submit(download.episode_id)?;
        }

        if !incomplete.is_empty() {
            info!(count = incomplete.len(), "Resuming incomplete downloads");
            self.reporter.report(ProgressEvent::DownloadsResumed {
                count: incomplete.len(),
            });
        }
        Ok(incomplete.len())
    }

    /// Drop the download of `episode_id`: ask the cache to forget the audio,
    /// delete the local file and the record. Returns whether a record existed.
    pub async fn remove(&self, episode_id: EpisodeId) -> Result<bool, QueueError> {
        let Some(download) = self.store.get_download(episode_id)? else {
            return Ok(false);
        };

        if let Some(cache) = &self.cache {
            cache.delete(&download.audio_url);
        }
        if let Err(e) = self.blobs.remove(&download.audio_url).await {
            warn!(%episode_id, error = %e, "Could not delete cached audio");
        }

        Ok(self.store.delete_download(episode_id)?)
    }

    /// Jobs submitted but not yet finished
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Resolve once every submitted job has been processed
    pub async fn wait_idle(&self) {
        let mut idle = self.outstanding.subscribe();
        let _ = idle.wait_for(|count| *count == 0).await;
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    fn submit(&self, episode_id: EpisodeId) -> Result<(), QueueError> {
        self.outstanding.send_modify(|count| *count += 1);
        self.jobs.send(episode_id).map_err(|_| {
            self.outstanding
                .send_modify(|count| *count = count.saturating_sub(1));
            QueueError::Closed
        })
    }
}

struct Worker<C> {
    store: Arc<Store>,
    client: C,
    blobs: Arc<BlobStore>,
    cache: Option<Arc<dyn AudioCache>>,
    reporter: SharedProgressReporter,
}

impl<C: HttpClient> Worker<C> {
    async fn run(
        self,
        mut inbox: mpsc::UnboundedReceiver<EpisodeId>,
        outstanding: Arc<watch::Sender<usize>>,
    ) {
        while let Some(episode_id) = inbox.recv().await {
            self.process(episode_id).await;
            outstanding.send_modify(|count| *count = count.saturating_sub(1));
        }
        debug!("Download queue stopped");
    }

    async fn process(&self, episode_id: EpisodeId) {
        let download = match self.store.get_download(episode_id) {
            Ok(Some(download)) if download.status.is_incomplete() => download,
            Ok(Some(download)) => {
                debug!(%episode_id, status = %download.status, "Skipping settled download");
                return;
            }
            Ok(None) => {
                debug!(%episode_id, "Skipping download removed while queued");
                return;
            }
            Err(e) => {
                error!(%episode_id, error = %e, "Could not load download record");
                return;
            }
        };

        if let Err(e) = self
            .store
            .update_download(episode_id, &DownloadUpdate::downloading())
        {
            warn!(%episode_id, error = %e, "Could not mark download as started");
            return;
        }

        let episode_title = self.episode_title(episode_id);
        self.reporter.report(ProgressEvent::DownloadStarting {
            episode_id,
            episode_title: episode_title.clone(),
        });

        let outcome = self.fetch_audio(&download).await;
        let update = match &outcome {
            Ok(path) => DownloadUpdate::completed(Some(path.clone())),
            Err(e) => DownloadUpdate::failed(e.to_string()),
        };

        match self.store.update_download(episode_id, &update) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(%episode_id, "Download removed while in flight");
                if outcome.is_ok()
                    && let Err(e) = self.blobs.remove(&download.audio_url).await
                {
                    warn!(%episode_id, error = %e, "Could not delete audio of removed download");
                }
                return;
            }
            Err(e) => {
                error!(%episode_id, error = %e, "Could not record download result");
            }
        }

        match outcome {
            Ok(path) => {
                info!(%episode_id, path = %path.display(), "Download completed");
                self.reporter.report(ProgressEvent::DownloadCompleted {
                    episode_id,
                    episode_title,
                });
            }
            Err(e) => {
                warn!(%episode_id, error = %e, "Download failed");
                self.reporter.report(ProgressEvent::DownloadFailed {
                    episode_id,
                    episode_title,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn fetch_audio(&self, download: &Download) -> Result<PathBuf, DownloadError> {
        let url = download.audio_url.as_str();
        let episode_id = download.episode_id;
        if url.is_empty() {
            return Err(DownloadError::MissingAudioUrl);
        }

        if let Some(cache) = &self.cache {
            match cache.download(url, episode_id).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    warn!(%episode_id, error = %e, "Cache worker failed, downloading directly");
                }
            }
        }

        let store = &self.store;
        let reporter = &self.reporter;
        let mut last_percent = 0;

        let done = transfer(&self.client, url, &self.blobs, |bytes, total| {
            reporter.report(ProgressEvent::DownloadProgress {
                episode_id,
                bytes_downloaded: bytes,
                total_bytes: total,
            });

            if let Some(pct) = percent(bytes, total)
                && pct != last_percent
            {
                last_percent = pct;
                if let Err(e) = store.update_download(episode_id, &DownloadUpdate::progress(pct)) {
                    debug!(%episode_id, error = %e, "Could not record progress");
                }
            }
        })
        .await?;

        Ok(done.path)
    }

    fn episode_title(&self, episode_id: EpisodeId) -> String {
        match self.store.get_episode(episode_id) {
            Ok(Some(episode)) => episode.title,
            _ => format!("episode {episode_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::spawn_cache_worker;
    use crate::progress::{NoopReporter, RecordingReporter};
    use crate::store::fixtures;
    use crate::test_support::MockHttpClient;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct Harness {
        dir: TempDir,
        store: Arc<Store>,
        client: MockHttpClient,
        ids: Vec<EpisodeId>,
    }

    /// Store with episodes "A", "B" and "C" whose audio lives at
    /// https://example.com/{guid}.mp3
    fn harness() -> Harness {
        let store = fixtures::store();
        let podcast = fixtures::podcast(&store, "https://example.com/feed.xml");
        let ids = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, guid)| fixtures::episode(&store, podcast.id, guid, i as u32 + 1).id)
            .collect();

        Harness {
            dir: tempdir().unwrap(),
            store: Arc::new(store),
            client: MockHttpClient::new(),
            ids,
        }
    }

    impl Harness {
        fn blobs(&self) -> Arc<BlobStore> {
            Arc::new(BlobStore::open(self.dir.path()).unwrap())
        }

        fn queue(&self, cache: Option<Arc<dyn AudioCache>>) -> DownloadQueue {
            DownloadQueue::spawn(
                Arc::clone(&self.store),
                self.client.clone(),
                self.blobs(),
                cache,
                NoopReporter::shared(),
            )
        }

        fn status(&self, id: EpisodeId) -> Option<DownloadStatus> {
            self.store.get_download(id).unwrap().map(|d| d.status)
        }
    }

    struct FakeCache {
        result: Result<PathBuf, String>,
        deleted: std::sync::Mutex<Vec<String>>,
    }

    impl FakeCache {
        fn new(result: Result<PathBuf, String>) -> Arc<Self> {
            Arc::new(Self {
                result,
                deleted: Default::default(),
            })
        }
    }

    #[async_trait]
    impl AudioCache for FakeCache {
        async fn download(&self, _url: &str, _id: EpisodeId) -> Result<PathBuf, DownloadError> {
            self.result.clone().map_err(DownloadError::Collaborator)
        }

        fn delete(&self, url: &str) {
            self.deleted.lock().unwrap().push(url.to_string());
        }
    }

    #[tokio::test]
    async fn queued_download_completes() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 200, "audio-a");
        let queue = h.queue(None);

        assert_eq!(queue.enqueue(h.ids[0]).await.unwrap(), EnqueueOutcome::Queued);
        queue.wait_idle().await;

        let download = h.store.get_download(h.ids[0]).unwrap().unwrap();
        assert_eq!(download.status, DownloadStatus::Completed);
        assert_eq!(download.progress, 100);
        let path = download.local_path.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"audio-a");
    }

    #[tokio::test]
    async fn same_episode_is_never_queued_twice() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 200, "audio-a");
        let queue = h.queue(None);

        assert_eq!(queue.enqueue(h.ids[0]).await.unwrap(), EnqueueOutcome::Queued);
        assert_eq!(
            queue.enqueue(h.ids[0]).await.unwrap(),
            EnqueueOutcome::AlreadyQueued
        );
        queue.wait_idle().await;
        assert_eq!(
            queue.enqueue(h.ids[0]).await.unwrap(),
            EnqueueOutcome::AlreadyCompleted
        );
        queue.wait_idle().await;

        let fetches = h
            .client
            .requests()
            .iter()
            .filter(|url| url.ends_with("/A.mp3"))
            .count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_do_not_stop_the_loop() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 404, "");
        h.client.set_body("https://example.com/B.mp3", 200, "audio-b");
        let queue = h.queue(None);

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.enqueue(h.ids[1]).await.unwrap();
        queue.wait_idle().await;

        let failed = h.store.get_download(h.ids[0]).unwrap().unwrap();
        assert_eq!(failed.status, DownloadStatus::Failed);
        assert!(failed.error.unwrap().contains("404"));
        assert_eq!(h.status(h.ids[1]), Some(DownloadStatus::Completed));
    }

    #[tokio::test]
    async fn failed_download_can_be_retried() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 500, "");
        let queue = h.queue(None);

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.wait_idle().await;
        assert_eq!(h.status(h.ids[0]), Some(DownloadStatus::Failed));

        h.client.set_body("https://example.com/A.mp3", 200, "audio-a");
        assert_eq!(queue.enqueue(h.ids[0]).await.unwrap(), EnqueueOutcome::Queued);
        queue.wait_idle().await;

        let download = h.store.get_download(h.ids[0]).unwrap().unwrap();
        assert_eq!(download.status, DownloadStatus::Completed);
        assert_eq!(download.error, None);
    }

    #[tokio::test]
    async fn unknown_episode_is_rejected() {
        let h = harness();
        let queue = h.queue(None);

        let err = queue.enqueue(EpisodeId(999)).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(e) if e.is_not_found()));
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn resume_requeues_incomplete_records_only() {
        let h = harness();
        for guid in ["A", "B", "C"] {
            h.client
                .set_body(&format!("https://example.com/{guid}.mp3"), 200, "audio");
        }
        h.store.add_download(h.ids[0], "https://example.com/A.mp3").unwrap();
        h.store.add_download(h.ids[1], "https://example.com/B.mp3").unwrap();
        h.store
            .update_download(h.ids[1], &DownloadUpdate::downloading())
            .unwrap();
        h.store.add_download(h.ids[2], "https://example.com/C.mp3").unwrap();
        h.store
            .update_download(h.ids[2], &DownloadUpdate::failed("earlier run"))
            .unwrap();

        let reporter = Arc::new(RecordingReporter::default());
        let queue = DownloadQueue::spawn(
            Arc::clone(&h.store),
            h.client.clone(),
            h.blobs(),
            None,
            reporter.clone(),
        );

        assert_eq!(queue.resume().await.unwrap(), 2);
        queue.wait_idle().await;

        assert_eq!(h.status(h.ids[0]), Some(DownloadStatus::Completed));
        assert_eq!(h.status(h.ids[1]), Some(DownloadStatus::Completed));
        assert_eq!(h.status(h.ids[2]), Some(DownloadStatus::Failed));
        assert!(
            reporter
                .events()
                .contains(&ProgressEvent::DownloadsResumed { count: 2 })
        );
    }

    #[tokio::test]
    async fn cache_timeout_leaves_a_single_writer() {
        let h = harness();
        let url = "https://example.com/A.mp3";
        // The cache worker gets a stalled stream, the direct retry a fast one
        h.client
            .set_slow_first(url, 200, "AAAAAAAA", Duration::from_millis(800));
        h.client.set_body(url, 200, "BBBBBBBB");

        let blobs = h.blobs();
        let cache = spawn_cache_worker(h.client.clone(), Arc::clone(&blobs))
            .with_timeout(Duration::from_millis(200));
        let queue = DownloadQueue::spawn(
            Arc::clone(&h.store),
            h.client.clone(),
            Arc::clone(&blobs),
            Some(Arc::new(cache)),
            NoopReporter::shared(),
        );

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.wait_idle().await;

        let download = h.store.get_download(h.ids[0]).unwrap().unwrap();
        assert_eq!(download.status, DownloadStatus::Completed);
        let path = download.local_path.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"BBBBBBBB");

        // Long after the stalled stream would have resumed
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(std::fs::read(&path).unwrap(), b"BBBBBBBB");
        let files: Vec<_> = std::fs::read_dir(h.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files, vec![path]);
        assert_eq!(h.client.requests().iter().filter(|u| *u == url).count(), 2);
    }

    #[tokio::test]
    async fn cache_result_is_used_when_available() {
        let h = harness();
        let cached = PathBuf::from("/cache/a.mp3");
        let queue = h.queue(Some(FakeCache::new(Ok(cached.clone()))));

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.wait_idle().await;

        let download = h.store.get_download(h.ids[0]).unwrap().unwrap();
        assert_eq!(download.status, DownloadStatus::Completed);
        assert_eq!(download.local_path, Some(cached));
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test]
    async fn cache_failure_falls_back_to_direct_transfer() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 200, "direct");
        let blobs = h.blobs();
        let queue = DownloadQueue::spawn(
            Arc::clone(&h.store),
            h.client.clone(),
            Arc::clone(&blobs),
            Some(FakeCache::new(Err("worker crashed".into()))),
            NoopReporter::shared(),
        );

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.wait_idle().await;

        let download = h.store.get_download(h.ids[0]).unwrap().unwrap();
        assert_eq!(download.status, DownloadStatus::Completed);
        assert_eq!(
            download.local_path,
            Some(blobs.path_for("https://example.com/A.mp3"))
        );
    }

    #[tokio::test]
    async fn remove_deletes_record_blob_and_cache_entry() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 200, "audio-a");
        let cache = FakeCache::new(Err("unavailable".into()));
        let queue = h.queue(Some(cache.clone()));

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.wait_idle().await;
        assert!(queue.blobs().contains("https://example.com/A.mp3"));

        assert!(queue.remove(h.ids[0]).await.unwrap());

        assert_eq!(h.status(h.ids[0]), None);
        assert!(!queue.blobs().contains("https://example.com/A.mp3"));
        assert_eq!(
            *cache.deleted.lock().unwrap(),
            vec!["https://example.com/A.mp3".to_string()]
        );
        assert!(!queue.remove(h.ids[0]).await.unwrap());
    }

    #[tokio::test]
    async fn record_removed_mid_transfer_drops_the_finished_audio() {
        let h = harness();
        let url = "https://example.com/A.mp3";
        h.client
            .set_slow_first(url, 200, "audio-a", Duration::from_millis(300));
        let queue = h.queue(None);

        queue.enqueue(h.ids[0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.status(h.ids[0]), Some(DownloadStatus::Downloading));
        assert!(h.store.delete_download(h.ids[0]).unwrap());
        queue.wait_idle().await;

        assert_eq!(h.status(h.ids[0]), None);
        assert!(!queue.blobs().contains(url));
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn job_without_record_is_skipped() {
        let h = harness();
        let worker = Worker {
            store: Arc::clone(&h.store),
            client: h.client.clone(),
            blobs: h.blobs(),
            cache: None,
            reporter: NoopReporter::shared(),
        };

        worker.process(h.ids[0]).await;

        assert_eq!(h.status(h.ids[0]), None);
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test]
    async fn progress_events_are_reported() {
        let h = harness();
        h.client.set_body("https://example.com/A.mp3", 200, "0123456789");
        let reporter = Arc::new(RecordingReporter::default());
        let queue = DownloadQueue::spawn(
            Arc::clone(&h.store),
            h.client.clone(),
            h.blobs(),
            None,
            reporter.clone(),
        );

        queue.enqueue(h.ids[0]).await.unwrap();
        queue.wait_idle().await;

        let events = reporter.events();
        assert!(matches!(events.first(), Some(ProgressEvent::DownloadStarting { .. })));
        assert!(events.contains(&ProgressEvent::DownloadProgress {
            episode_id: h.ids[0],
            bytes_downloaded: 5,
            total_bytes: Some(10),
        }));
        assert!(matches!(events.last(), Some(ProgressEvent::DownloadCompleted { .. })));
    }
}
