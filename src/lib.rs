pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod http;
pub mod logging;
pub mod manager;
pub mod playback;
pub mod progress;
pub mod search;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::Config;
pub use download::{BlobStore, DownloadQueue, EnqueueOutcome};
pub use error::{
    ConfigError, DownloadError, FetchError, HttpError, ManagerError, ParseError, PlaybackError,
    QueueError, QuotaError, SearchError, StoreError,
};
pub use feed::{FeedFetcher, ParsedFeed, parse_feed};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use logging::init_logging;
pub use manager::{PodcastManager, RefreshOutcome};
pub use playback::{AudioOutput, AudioSource, PlaybackController};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use search::{DEFAULT_SEARCH_LIMIT, DirectoryClient, SearchResult};
pub use storage::{StorageEstimate, format_bytes};
pub use store::{
    Download, DownloadStatus, Episode, EpisodeId, Podcast, PodcastId, Progress, Store,
};
