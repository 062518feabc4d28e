use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use ownpod::progress::{Level, Persistence};
use ownpod::{
    Config, DEFAULT_SEARCH_LIMIT, DownloadStatus, EpisodeId, NoopReporter, PodcastId,
    PodcastManager, ProgressEvent, ProgressReporter, ReqwestClient, SharedProgressReporter,
    init_logging,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscribe to podcasts and keep episodes available offline
#[derive(Parser, Debug)]
#[command(name = "ownpod")]
#[command(about = "Subscribe to podcasts and keep episodes available offline")]
#[command(version)]
struct Args {
    /// Directory holding the database, audio cache and config.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Download directly instead of through the cache worker
    #[arg(long, global = true)]
    no_cache_worker: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed URL or local feed file
    Add { source: String },

    /// Fetch new episodes for one podcast, or all of them
    Refresh { podcast_id: Option<i64> },

    /// List subscriptions
    List {
        #[arg(long)]
        json: bool,
    },

    /// List the episodes of a podcast, newest first
    Episodes {
        podcast_id: i64,
        #[arg(long)]
        json: bool,
    },

    /// Download episodes and wait until the queue is idle
    Download {
        #[arg(required = true)]
        episode_ids: Vec<i64>,
    },

    /// Show every download record
    Downloads {
        #[arg(long)]
        json: bool,
    },

    /// Delete a download and its cached audio
    Remove { episode_id: i64 },

    /// Remove a podcast with all its episodes and downloads
    Unsubscribe { podcast_id: i64 },

    /// Search the podcast directory
    Search {
        term: String,
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
        /// Two-letter store country, retried worldwide when empty
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Finish downloads interrupted by an earlier run
    Resume,

    /// Show disk usage against the storage quota
    Storage {
        #[arg(long)]
        json: bool,
    },

    /// Record a listening position for an episode
    Position { episode_id: i64, seconds: f64 },

    /// Show recently played episodes
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<EpisodeId, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_bar = multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} {wide_msg}") {
            main_bar.set_style(style);
        }
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn bar(&self, episode_id: EpisodeId) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bar) = bars.get(&episode_id) {
            return bar.clone();
        }

        let bar = self.multi.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::default_bar().template(&format!(
            "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
        )) {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bars.insert(episode_id, bar.clone());
        bar
    }

    fn finish_bar(&self, episode_id: EpisodeId) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(&episode_id) {
            bar.finish_and_clear();
        }
    }

    fn print(&self, line: String) {
        // Printing through the bar keeps the spinner below the output
        if self.main_bar.is_hidden() {
            println!("{line}");
        } else {
            self.main_bar.println(line);
        }
    }

    fn finish(&self) {
        self.main_bar.finish_and_clear();
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::DownloadStarting {
                episode_id,
                episode_title,
            } => {
                let bar = self.bar(*episode_id);
                bar.set_position(0);
                bar.set_message(truncate_title(episode_title, 40));
            }

            ProgressEvent::DownloadProgress {
                episode_id,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.bar(*episode_id);
                if let Some(total) = total_bytes {
                    bar.set_length(*total);
                }
                bar.set_position(*bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                episode_id,
                episode_title,
            } => {
                self.finish_bar(*episode_id);
                self.print(format!(
                    "{SUCCESS}{}",
                    truncate_title(episode_title, 60).green()
                ));
            }

            ProgressEvent::DownloadFailed {
                episode_id,
                episode_title,
                error,
            } => {
                self.finish_bar(*episode_id);
                self.print(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(episode_title, 40).red(),
                    error.red()
                ));
            }

            other => match (other.level(), other.persistence()) {
                (_, Persistence::Transient) => self.main_bar.set_message(other.message()),
                (Level::Error, _) => self.print(format!("{FAILURE}{}", other.message().red())),
                (Level::Info, _) => self.print(format!("{HEADPHONES}{}", other.message())),
            },
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let cut: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_label(status: DownloadStatus) -> colored::ColoredString {
    match status {
        DownloadStatus::Pending => status.as_str().yellow(),
        DownloadStatus::Downloading => status.as_str().cyan(),
        DownloadStatus::Completed => status.as_str().green(),
        DownloadStatus::Failed => status.as_str().red(),
    }
}

async fn run(
    command: Command,
    manager: &PodcastManager<ReqwestClient>,
    config: &Config,
) -> Result<()> {
    let store = manager.store();

    match command {
        Command::Add { source } => {
            let (podcast, count) = manager
                .subscribe(&source)
                .await
                .with_context(|| format!("Failed to subscribe to {source}"))?;
            println!(
                "{} {} ({} episodes, id {})",
                "Subscribed:".bold().green(),
                podcast.title.bold(),
                count.to_string().cyan(),
                podcast.id
            );
        }

        Command::Refresh {
            podcast_id: Some(id),
        } => {
            let new = manager
                .refresh(PodcastId(id))
                .await
                .context("Failed to refresh podcast")?;
            println!("{} new episodes", new.to_string().cyan());
        }

        Command::Refresh { podcast_id: None } => {
            let outcomes = manager
                .refresh_all()
                .await
                .context("Failed to refresh podcasts")?;
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(new) => println!("  {} {}", outcome.podcast.title.bold(), format!("+{new}").cyan()),
                    Err(e) => println!("  {} {}", outcome.podcast.title.bold(), e.to_string().red()),
                }
            }
            if failed > 0 {
                bail!("{failed} of {} podcasts failed to refresh", outcomes.len());
            }
        }

        Command::List { json } => {
            let podcasts = store.get_all_podcasts()?;
            if json {
                return print_json(&podcasts);
            }
            for podcast in podcasts {
                println!(
                    "{:>4}  {}  {}",
                    podcast.id.to_string().cyan(),
                    podcast.title.bold(),
                    podcast.feed_url.dimmed()
                );
            }
        }

        Command::Episodes { podcast_id, json } => {
            let episodes = store.get_episodes_by_podcast(PodcastId(podcast_id))?;
            if json {
                return print_json(&episodes);
            }
            for episode in episodes {
                let status = store.get_download(episode.id)?.map(|d| d.status);
                println!(
                    "{:>6}  {}  {}  {}",
                    episode.id.to_string().cyan(),
                    episode.pub_date.format("%Y-%m-%d").to_string().dimmed(),
                    truncate_title(&episode.title, 60),
                    status.map(|s| status_label(s).to_string()).unwrap_or_default()
                );
            }
        }

        Command::Download { episode_ids } => {
            for id in episode_ids {
                manager
                    .download(EpisodeId(id))
                    .await
                    .with_context(|| format!("Failed to queue episode {id}"))?;
            }
            manager.queue().wait_idle().await;
        }

        Command::Downloads { json } => {
            let downloads = store.get_all_downloads()?;
            if json {
                return print_json(&downloads);
            }
            for download in downloads {
                println!(
                    "{:>6}  {:<11}  {:>3}%  {}",
                    download.episode_id.to_string().cyan(),
                    status_label(download.status),
                    download.progress,
                    download
                        .error
                        .as_deref()
                        .map(|e| e.red().to_string())
                        .or_else(|| download.local_path.map(|p| p.display().to_string()))
                        .unwrap_or_default()
                );
            }
        }

        Command::Remove { episode_id } => {
            if !manager.remove_download(EpisodeId(episode_id)).await? {
                println!("No download for episode {episode_id}");
            }
        }

        Command::Unsubscribe { podcast_id } => {
            let removed = manager
                .unsubscribe(PodcastId(podcast_id))
                .await
                .context("Failed to unsubscribe")?;
            println!("Removed {} episodes", removed.to_string().cyan());
        }

        Command::Search {
            term, limit, json, ..
        } => {
            let results = manager.search(&term, limit).await?;
            if json {
                return print_json(&results);
            }
            for result in results {
                println!(
                    "{}  {}\n    {}",
                    result.title.bold(),
                    result.author.dimmed(),
                    result.feed_url.as_deref().unwrap_or("(no feed)").cyan()
                );
            }
        }

        Command::Resume => {
            // Opening the library already queued whatever was left over
            if manager.queue().outstanding() == 0 {
                println!("Nothing to resume");
            }
            manager.queue().wait_idle().await;
        }

        Command::Storage { json } => {
            let estimate = manager.storage_estimate()?;
            if json {
                return print_json(&estimate);
            }
            println!(
                "{FOLDER}{} used of {}{}",
                estimate.usage_readable().bold(),
                estimate
                    .quota_readable()
                    .unwrap_or_else(|| "unlimited".to_string()),
                estimate
                    .percent_used
                    .map(|p| format!(" ({p}%)"))
                    .unwrap_or_default()
            );
            println!("   {}", config.data_dir.display().to_string().cyan());
        }

        Command::Position {
            episode_id,
            seconds,
        } => {
            let id = EpisodeId(episode_id);
            let episode = store
                .get_episode(id)?
                .with_context(|| format!("Episode {episode_id} not found"))?;
            store.save_progress(id, seconds, episode.duration as f64)?;
        }

        Command::Recent { limit, json } => {
            let recent = store.get_recently_played(limit)?;
            if json {
                return print_json(&recent);
            }
            for progress in recent {
                let title = store
                    .get_episode(progress.episode_id)?
                    .map(|e| e.title)
                    .unwrap_or_default();
                println!(
                    "{:>6}  {}  {}/{}",
                    progress.episode_id.to_string().cyan(),
                    truncate_title(&title, 60),
                    format_position(progress.current_time),
                    format_position(progress.duration)
                );
            }
        }

        Command::Config => return print_json(config),
    }

    Ok(())
}

fn format_position(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.data_dir.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.no_cache_worker {
        config.use_cache_worker = false;
    }
    init_logging(&config.log_level);

    if let Command::Search {
        country: Some(country),
        ..
    } = &args.command
    {
        config.search_country = Some(country.clone());
    }
    if let Command::Config = args.command {
        return print_json(&config);
    }

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "ownpod".bold().magenta(),
            "- Offline Podcasts".dimmed()
        );
    }

    let client =
        ReqwestClient::with_connect_timeout(CONNECT_TIMEOUT).context("Failed to build HTTP client")?;

    let indicatif = (!args.quiet).then(|| Arc::new(IndicatifReporter::new()));
    let reporter: SharedProgressReporter = match &indicatif {
        Some(reporter) => reporter.clone(),
        None => NoopReporter::shared(),
    };

    let manager = PodcastManager::open(&config, client, reporter)
        .await
        .context("Failed to open library")?;

    let result = run(args.command, &manager, &config).await;

    if let Some(reporter) = indicatif {
        reporter.finish();
    }
    result
}
