use std::sync::Arc;

use crate::store::{DownloadStatus, EpisodeId};

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// Whether a notification should stay visible until dismissed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Transient,
    Persistent,
}

/// Events emitted by the manager, the download queue and the player
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// A new podcast was stored
    Subscribed {
        podcast_title: String,
        episode_count: usize,
    },

    /// A feed was refreshed
    Refreshed {
        podcast_title: String,
        new_episodes: usize,
    },

    Unsubscribed { podcast_title: String },

    /// A download request was accepted
    DownloadQueued { episode_title: String },

    /// A download request was ignored because a record already exists
    DownloadNotQueued {
        episode_title: String,
        status: DownloadStatus,
    },

    /// The queue picked up a job
    DownloadStarting {
        episode_id: EpisodeId,
        episode_title: String,
    },

    /// Bytes arrived for the current job
    DownloadProgress {
        episode_id: EpisodeId,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    DownloadCompleted {
        episode_id: EpisodeId,
        episode_title: String,
    },

    DownloadFailed {
        episode_id: EpisodeId,
        episode_title: String,
        error: String,
    },

    DownloadRemoved { episode_title: String },

    /// Incomplete downloads from an earlier run were queued again
    DownloadsResumed { count: usize },

    /// The sleep timer paused playback
    SleepTimerExpired,

    /// A user-level operation failed
    OperationFailed { operation: String, error: String },
}

impl ProgressEvent {
    pub fn level(&self) -> Level {
        match self {
            ProgressEvent::DownloadFailed { .. } | ProgressEvent::OperationFailed { .. } => {
                Level::Error
            }
            _ => Level::Info,
        }
    }

    /// Progress ticks come and go; outcomes the user acts on stay
    pub fn persistence(&self) -> Persistence {
        match self {
            ProgressEvent::FetchingFeed { .. }
            | ProgressEvent::DownloadStarting { .. }
            | ProgressEvent::DownloadProgress { .. } => Persistence::Transient,
            _ => Persistence::Persistent,
        }
    }

    /// Human readable one-line summary
    pub fn message(&self) -> String {
        match self {
            ProgressEvent::FetchingFeed { url } => format!("Fetching {url}"),
            ProgressEvent::Subscribed {
                podcast_title,
                episode_count,
            } => format!("Subscribed to {podcast_title} ({episode_count} episodes)"),
            ProgressEvent::Refreshed {
                podcast_title,
                new_episodes,
            } => match new_episodes {
                0 => format!("{podcast_title} is up to date"),
                1 => format!("{podcast_title}: 1 new episode"),
                n => format!("{podcast_title}: {n} new episodes"),
            },
            ProgressEvent::Unsubscribed { podcast_title } => {
                format!("Unsubscribed from {podcast_title}")
            }
            ProgressEvent::DownloadQueued { episode_title } => {
                format!("Queued {episode_title}")
            }
            ProgressEvent::DownloadNotQueued {
                episode_title,
                status,
            } => match status {
                DownloadStatus::Completed => format!("{episode_title} is already downloaded"),
                DownloadStatus::Downloading => format!("{episode_title} is already downloading"),
                _ => format!("{episode_title} is already queued"),
            },
            ProgressEvent::DownloadStarting { episode_title, .. } => {
                format!("Downloading {episode_title}")
            }
            ProgressEvent::DownloadProgress {
                bytes_downloaded,
                total_bytes,
                ..
            } => match total_bytes {
                Some(total) => format!("{bytes_downloaded} of {total} bytes"),
                None => format!("{bytes_downloaded} bytes"),
            },
            ProgressEvent::DownloadCompleted { episode_title, .. } => {
                format!("Downloaded {episode_title}")
            }
            ProgressEvent::DownloadFailed {
                episode_title,
                error,
                ..
            } => format!("Download of {episode_title} failed: {error}"),
            ProgressEvent::DownloadRemoved { episode_title } => {
                format!("Removed download of {episode_title}")
            }
            ProgressEvent::DownloadsResumed { count } => {
                format!("Resumed {count} incomplete downloads")
            }
            ProgressEvent::SleepTimerExpired => "Sleep timer expired, playback paused".to_string(),
            ProgressEvent::OperationFailed { operation, error } => {
                format!("{operation} failed: {error}")
            }
        }
    }
}

/// Trait for receiving progress events and notifications.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Keeps every event, for assertions in tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
