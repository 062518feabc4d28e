// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Playback control on top of an abstract audio output.
//!
//! The controller decides what to play and remembers where the listener
//! stopped. Decoding and sound output belong to the [`AudioOutput`]
//! implementation.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{DownloadStatus, Episode, EpisodeId, Podcast, Progress, Store};

/// How often progress is saved while playing
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(10);

/// Distance covered by [`PlaybackController::skip_forward`] and
/// [`PlaybackController::skip_back`]
pub const DEFAULT_SKIP_STEP: Duration = Duration::from_secs(30);

/// Where the audio for an episode is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Completed download in the blob cache
    Local(PathBuf),
    Remote(String),
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Local(path) => write!(f, "{}", path.display()),
            AudioSource::Remote(url) => f.write_str(url),
        }
    }
}

/// An audio sink that can play one source at a time
pub trait AudioOutput: Send + Sync {
    fn load(&self, source: &AudioSource) -> Result<(), PlaybackError>;
    fn play(&self) -> Result<(), PlaybackError>;
    fn pause(&self);
    fn is_playing(&self) -> bool;
    fn seek(&self, seconds: f64);
    /// Current position in seconds
    fn position(&self) -> f64;
    /// Length of the loaded source in seconds, NaN while unknown
    fn duration(&self) -> f64;
    fn set_rate(&self, rate: f64);
}

/// The episode currently loaded into the output
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub episode: Episode,
    pub podcast: Option<Podcast>,
    pub source: AudioSource,
}

impl NowPlaying {
    /// Episode artwork, falling back to the podcast's
    pub fn artwork(&self) -> Option<&str> {
        self.episode
            .image_url
            .as_deref()
            .or_else(|| self.podcast.as_ref()?.image_url.as_deref())
    }
}

struct SleepTimer {
    handle: JoinHandle<()>,
    ends_at: DateTime<Utc>,
    generation: u64,
}

#[derive(Default)]
struct State {
    current: Option<NowPlaying>,
    last_saved: Option<Instant>,
    sleep_timer: Option<SleepTimer>,
    timer_generation: u64,
}

#[derive(Clone)]
pub struct PlaybackController {
    store: Arc<Store>,
    output: Arc<dyn AudioOutput>,
    reporter: SharedProgressReporter,
    save_interval: Duration,
    skip_step: Duration,
    state: Arc<Mutex<State>>,
}

impl PlaybackController {
    pub fn new(
        store: Arc<Store>,
        output: Arc<dyn AudioOutput>,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            store,
            output,
            reporter,
            save_interval: DEFAULT_SAVE_INTERVAL,
            skip_step: DEFAULT_SKIP_STEP,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_skip_step(mut self, step: Duration) -> Self {
        self.skip_step = step;
        self
    }

    pub fn save_interval(&self) -> Duration {
        self.save_interval
    }

    pub fn skip_step(&self) -> Duration {
        self.skip_step
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load an episode, restore its saved position and optionally start it.
    ///
    /// A completed download with its file still present plays from disk;
    /// anything else streams from the episode's audio URL.
    pub fn load_episode(
        &self,
        episode_id: EpisodeId,
        autoplay: bool,
    ) -> Result<NowPlaying, PlaybackError> {
        let episode = self
            .store
            .get_episode(episode_id)?
            .ok_or(PlaybackError::EpisodeNotFound(episode_id.0))?;
        let podcast = self.store.get_podcast(episode.podcast_id)?;

        let source = match self.store.get_download(episode_id)? {
            Some(download) if download.status == DownloadStatus::Completed => download
                .local_path
                .filter(|path| path.is_file())
                .map(AudioSource::Local)
                .unwrap_or_else(|| AudioSource::Remote(episode.audio_url.clone())),
            _ => AudioSource::Remote(episode.audio_url.clone()),
        };

        self.output.load(&source)?;
        if let Some(progress) = self.store.get_progress(episode_id)?
            && progress.current_time > 0.0
        {
            self.output.seek(progress.current_time);
        }

        let now_playing = NowPlaying {
            episode,
            podcast,
            source,
        };
        info!(%episode_id, source = %now_playing.source, "Loaded episode");
        self.state().current = Some(now_playing.clone());

        if autoplay && let Err(e) = self.play() {
            debug!(%episode_id, error = %e, "Autoplay was refused");
        }
        Ok(now_playing)
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.state().current.clone()
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        self.output.play()?;
        self.state().last_saved = Some(Instant::now());
        Ok(())
    }

    /// Pause and save the position
    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.output.pause();
        self.save_progress().map(|_| ())
    }

    pub fn toggle(&self) -> Result<(), PlaybackError> {
        if self.output.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// The output reached the end of the source
    pub fn ended(&self) -> Result<(), PlaybackError> {
        self.save_progress().map(|_| ())
    }

    /// Move by `seconds` (negative rewinds), staying within the source.
    /// Returns the new position.
    pub fn skip(&self, seconds: f64) -> f64 {
        let duration = self.output.duration();
        let mut target = (self.output.position() + seconds).max(0.0);
        if duration.is_finite() {
            target = target.min(duration);
        }
        self.output.seek(target);
        target
    }

    pub fn skip_forward(&self) -> f64 {
        self.skip(self.skip_step.as_secs_f64())
    }

    pub fn skip_back(&self) -> f64 {
        self.skip(-self.skip_step.as_secs_f64())
    }

    pub fn set_rate(&self, rate: f64) {
        self.output.set_rate(rate);
    }

    /// Persist the current position. Does nothing when no episode is loaded.
    pub fn save_progress(&self) -> Result<Option<Progress>, PlaybackError> {
        let Some(episode_id) = self.state().current.as_ref().map(|c| c.episode.id) else {
            return Ok(None);
        };

        let progress =
            self.store
                .save_progress(episode_id, self.output.position(), self.output.duration())?;
        self.state().last_saved = Some(Instant::now());
        Ok(Some(progress))
    }

    /// Save if playing and the save interval has passed since the last save.
    /// Returns whether a save happened.
    pub fn save_if_due(&self) -> Result<bool, PlaybackError> {
        if !self.output.is_playing() {
            return Ok(false);
        }
        let due = {
            let state = self.state();
            state.current.is_some()
                && state
                    .last_saved
                    .is_none_or(|at| at.elapsed() >= self.save_interval)
        };
        if !due {
            return Ok(false);
        }
        self.save_progress()?;
        Ok(true)
    }

    /// Check for a due save on every tick of the save interval
    pub fn spawn_autosave(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(controller.save_interval);
            loop {
                ticks.tick().await;
                if let Err(e) = controller.save_if_due() {
                    warn!(error = %e, "Could not save playback progress");
                }
            }
        })
    }

    /// Load the most recently played episode without starting it
    pub fn load_last_played(&self) -> Result<Option<NowPlaying>, PlaybackError> {
        let Some(recent) = self.store.get_recently_played(1)?.into_iter().next() else {
            return Ok(None);
        };
        let now_playing = self.load_episode(recent.episode_id, false)?;
        self.output.pause();
        Ok(Some(now_playing))
    }

    /// Pause after `after`, replacing any running timer. Returns when the
    /// timer will fire.
    pub fn set_sleep_timer(&self, after: Duration) -> DateTime<Utc> {
        let ends_at = chrono::Duration::from_std(after)
            .ok()
            .and_then(|after| Utc::now().checked_add_signed(after))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = self.state();
        if let Some(previous) = state.sleep_timer.take() {
            previous.handle.abort();
        }
        state.timer_generation += 1;
        let generation = state.timer_generation;

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;

            {
                let mut state = controller.state();
                if state.sleep_timer.as_ref().map(|t| t.generation) == Some(generation) {
                    state.sleep_timer = None;
                }
            }
            if let Err(e) = controller.pause() {
                warn!(error = %e, "Could not save progress when the sleep timer fired");
            }
            info!("Sleep timer expired");
            controller.reporter.report(ProgressEvent::SleepTimerExpired);
        });

        state.sleep_timer = Some(SleepTimer {
            handle,
            ends_at,
            generation,
        });
        debug!(seconds = after.as_secs(), "Sleep timer set");
        ends_at
    }

    /// Returns whether a timer was running
    pub fn cancel_sleep_timer(&self) -> bool {
        match self.state().sleep_timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn sleep_timer_ends_at(&self) -> Option<DateTime<Utc>> {
        self.state().sleep_timer.as_ref().map(|t| t.ends_at)
    }
}
