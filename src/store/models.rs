// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::{FeedEpisode, FeedPodcast};

/// Store-assigned podcast identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodcastId(pub i64);

/// Store-assigned episode identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub i64);

impl fmt::Display for PodcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A subscribed podcast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Podcast {
    pub id: PodcastId,
    pub title: String,
    pub description: String,
    pub feed_url: String,
    pub image_url: Option<String>,
    pub author: String,
    pub link: String,
    pub added_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Fields for a podcast that does not exist yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewPodcast {
    pub title: String,
    pub description: String,
    pub feed_url: String,
    pub image_url: Option<String>,
    pub author: String,
    pub link: String,
}

impl From<&FeedPodcast> for NewPodcast {
    fn from(podcast: &FeedPodcast) -> Self {
        Self {
            title: podcast.title.clone(),
            description: podcast.description.clone(),
            feed_url: podcast.feed_url.clone(),
            image_url: podcast.image_url.clone(),
            author: podcast.author.clone(),
            link: podcast.link.clone(),
        }
    }
}

/// Partial podcast update. `None` leaves a field untouched; the
/// `last_updated` timestamp is always refreshed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodcastUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<Option<String>>,
    pub author: Option<String>,
    pub link: Option<String>,
}

impl From<&FeedPodcast> for PodcastUpdate {
    fn from(podcast: &FeedPodcast) -> Self {
        Self {
            title: Some(podcast.title.clone()),
            description: Some(podcast.description.clone()),
            image_url: Some(podcast.image_url.clone()),
            author: Some(podcast.author.clone()),
            link: Some(podcast.link.clone()),
        }
    }
}

impl PodcastUpdate {
    pub(crate) fn apply(&self, podcast: &mut Podcast) {
        if let Some(title) = &self.title {
            podcast.title = title.clone();
        }
        if let Some(description) = &self.description {
            podcast.description = description.clone();
        }
        if let Some(image_url) = &self.image_url {
            podcast.image_url = image_url.clone();
        }
        if let Some(author) = &self.author {
            podcast.author = author.clone();
        }
        if let Some(link) = &self.link {
            podcast.link = link.clone();
        }
    }
}

/// A stored episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub podcast_id: PodcastId,
    pub guid: String,
    pub title: String,
    pub description: String,
    pub audio_url: String,
    /// Seconds
    pub duration: u64,
    pub pub_date: DateTime<Utc>,
    pub image_url: Option<String>,
    pub added_date: DateTime<Utc>,
}

/// Fields for an episode that does not exist yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub podcast_id: PodcastId,
    pub guid: String,
    pub title: String,
    pub description: String,
    pub audio_url: String,
    pub duration: u64,
    pub pub_date: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl NewEpisode {
    /// Build an episode for `podcast_id`, using `podcast_image` when the item
    /// has no artwork of its own
    pub fn from_feed(
        podcast_id: PodcastId,
        episode: &FeedEpisode,
        podcast_image: Option<&str>,
    ) -> Self {
        Self {
            podcast_id,
            guid: episode.guid.clone(),
            title: episode.title.clone(),
            description: episode.description.clone(),
            audio_url: episode.audio_url.clone(),
            duration: episode.duration,
            pub_date: episode.pub_date,
            image_url: episode
                .image_url
                .clone()
                .or_else(|| podcast_image.map(String::from)),
        }
    }
}

/// Lifecycle of a download record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => DownloadStatus::Pending,
            "downloading" => DownloadStatus::Downloading,
            "completed" => DownloadStatus::Completed,
            "failed" => DownloadStatus::Failed,
            _ => return None,
        })
    }

    /// Pending or downloading: work that must survive a restart
    pub fn is_incomplete(self) -> bool {
        matches!(self, DownloadStatus::Pending | DownloadStatus::Downloading)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download state of one episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Download {
    pub episode_id: EpisodeId,
    pub audio_url: String,
    pub status: DownloadStatus,
    /// Percentage, 0-100
    pub progress: u8,
    pub downloaded_date: DateTime<Utc>,
    pub error: Option<String>,
    /// Cached audio file once completed
    pub local_path: Option<PathBuf>,
}

/// Partial download update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadUpdate {
    pub audio_url: Option<String>,
    pub status: Option<DownloadStatus>,
    pub progress: Option<u8>,
    pub downloaded_date: Option<DateTime<Utc>>,
    pub error: Option<Option<String>>,
    pub local_path: Option<Option<PathBuf>>,
}

impl DownloadUpdate {
    /// Back to a fresh pending request, as after a failed attempt
    pub fn requeue(audio_url: &str) -> Self {
        Self {
            audio_url: Some(audio_url.to_string()),
            status: Some(DownloadStatus::Pending),
            progress: Some(0),
            downloaded_date: Some(Utc::now()),
            error: Some(None),
            local_path: Some(None),
        }
    }

    pub fn downloading() -> Self {
        Self {
            status: Some(DownloadStatus::Downloading),
            progress: Some(0),
            ..Default::default()
        }
    }

    pub fn progress(percent: u8) -> Self {
        Self {
            progress: Some(percent.min(100)),
            ..Default::default()
        }
    }

    pub fn completed(local_path: Option<PathBuf>) -> Self {
        Self {
            status: Some(DownloadStatus::Completed),
            progress: Some(100),
            downloaded_date: Some(Utc::now()),
            error: Some(None),
            local_path: Some(local_path),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(DownloadStatus::Failed),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }

    pub(crate) fn apply(&self, download: &mut Download) {
        if let Some(audio_url) = &self.audio_url {
            download.audio_url = audio_url.clone();
        }
        if let Some(status) = self.status {
            download.status = status;
        }
        if let Some(progress) = self.progress {
            download.progress = progress.min(100);
        }
        if let Some(date) = self.downloaded_date {
            download.downloaded_date = date;
        }
        if let Some(error) = &self.error {
            download.error = error.clone();
        }
        if let Some(local_path) = &self.local_path {
            download.local_path = local_path.clone();
        }
    }
}

/// Saved playback position of one episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub episode_id: EpisodeId,
    /// Seconds
    pub current_time: f64,
    /// Seconds
    pub duration: f64,
    pub last_played: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Downloading,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
        ] {
            assert_eq!(DownloadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DownloadStatus::parse("paused"), None);
    }

    #[test]
    fn episode_image_falls_back_to_podcast_image() {
        let feed_episode = FeedEpisode {
            guid: "g".into(),
            title: "t".into(),
            description: String::new(),
            audio_url: "https://example.com/a.mp3".into(),
            duration: 0,
            pub_date: Utc::now(),
            image_url: None,
        };

        let episode = NewEpisode::from_feed(
            PodcastId(1),
            &feed_episode,
            Some("https://example.com/cover.jpg"),
        );
        assert_eq!(
            episode.image_url.as_deref(),
            Some("https://example.com/cover.jpg")
        );

        let own = FeedEpisode {
            image_url: Some("https://example.com/own.jpg".into()),
            ..feed_episode
        };
        let episode = NewEpisode::from_feed(PodcastId(1), &own, Some("https://example.com/cover.jpg"));
        assert_eq!(episode.image_url.as_deref(), Some("https://example.com/own.jpg"));
    }

    #[test]
    fn download_update_applies_only_set_fields() {
        let mut download = Download {
            episode_id: EpisodeId(7),
            audio_url: "https://example.com/a.mp3".into(),
            status: DownloadStatus::Downloading,
            progress: 40,
            downloaded_date: Utc::now(),
            error: None,
            local_path: None,
        };

        DownloadUpdate::progress(250).apply(&mut download);
        assert_eq!(download.progress, 100);
        assert_eq!(download.status, DownloadStatus::Downloading);

        DownloadUpdate::failed("boom").apply(&mut download);
        assert_eq!(download.status, DownloadStatus::Failed);
        assert_eq!(download.error.as_deref(), Some("boom"));
        assert_eq!(download.progress, 100);
    }
}
