use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failures reported by an [`HttpClient`](crate::http::HttpClient)
#[derive(Error, Debug)]
pub enum HttpError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// Failures that do not originate in reqwest (test doubles, custom clients)
    #[error("{0}")]
    Transport(String),
}

/// Errors that can occur when resolving a feed source to raw text
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("All feed sources failed for {url}. Last error: {last_error}")]
    AllSourcesFailed { url: String, last_error: String },

    #[error("Timed out fetching {url} (no response within {seconds}s)")]
    Timeout { url: String, seconds: u64 },

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when turning feed text into podcast records
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Feed is not well-formed XML: {0}")]
    Xml(#[from] xml::reader::Error),

    #[error("Unrecognized feed format, expected an RSS or Atom document")]
    UnrecognizedFormat,

    #[error("RSS document has no channel element")]
    MissingChannel,
}

/// Errors raised by the persistent store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database migration failed: {0}")]
    Migration(#[source] rusqlite::Error),

    #[error("A {entity} with {field} '{value}' already exists")]
    Constraint {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// True for uniqueness violations
    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Storage capacity exceeded. Detection only; nothing is evicted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Storage quota exceeded: {usage} of {quota} bytes in use, {requested} more requested")]
pub struct QuotaError {
    pub usage: u64,
    pub quota: u64,
    pub requested: u64,
}

/// Errors that can occur while transferring episode audio
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Episode has no audio URL")]
    MissingAudioUrl,

    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Download of {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("Cache worker reported an error: {0}")]
    Collaborator(String),

    #[error("Cache worker is not running")]
    CollaboratorUnavailable,

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

/// Errors returned by download queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Download queue has shut down")]
    Closed,
}

/// Errors raised by the playback controller
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Episode {0} not found")]
    EpisodeNotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Audio output rejected the request: {0}")]
    Output(String),
}

/// Errors that can occur when querying the podcast directory
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search term must not be empty")]
    EmptyTerm,

    #[error("Directory request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Unexpected directory response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No directory entry for id {0}")]
    NotFound(u64),
}

/// Errors that can occur when loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine a data directory for this platform")]
    NoDataDir,

    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level errors for user-initiated operations
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Download queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}
