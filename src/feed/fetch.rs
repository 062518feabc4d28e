// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::http::HttpClient;

/// Relays tried, in order, when the origin cannot be reached directly
pub const DEFAULT_RELAYS: [&str; 3] = [
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
    "https://api.codetabs.com/v1/proxy?quest=",
];

/// Overall deadline for resolving one feed
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a single fetch attempt is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Direct,
    Relay(String),
}

impl FeedSource {
    /// The URL actually requested for `target` through this source
    pub fn request_url(&self, target: &str) -> String {
        match self {
            FeedSource::Direct => target.to_string(),
            FeedSource::Relay(prefix) => {
                let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                format!("{prefix}{encoded}")
            }
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Direct => write!(f, "direct"),
            FeedSource::Relay(prefix) => write!(f, "relay {prefix}"),
        }
    }
}

/// Resolves URLs to response text, trying the origin first and then each relay
#[derive(Clone)]
pub struct FeedFetcher<C> {
    client: C,
    sources: Vec<FeedSource>,
    timeout: Duration,
}

impl<C: HttpClient> FeedFetcher<C> {
    /// Create a fetcher with the default relays and deadline
    pub fn new(client: C) -> Self {
        Self::with_relays(
            client,
            DEFAULT_RELAYS.iter().map(|relay| relay.to_string()),
            DEFAULT_FETCH_TIMEOUT,
        )
    }

    pub fn with_relays(
        client: C,
        relays: impl IntoIterator<Item = String>,
        timeout: Duration,
    ) -> Self {
        let sources = std::iter::once(FeedSource::Direct)
            .chain(relays.into_iter().map(FeedSource::Relay))
            .collect();
        Self {
            client,
            sources,
            timeout,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Fetch a feed document.
    ///
    /// The deadline covers the direct attempt and every fallback together.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        Url::parse(url)?;

        tokio::time::timeout(self.timeout, self.fetch_text(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }

    /// Try each source once, in order, returning the first 2xx body.
    ///
    /// Not bounded by the fetcher's deadline; callers that need one wrap it.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let mut last_error = String::from("no sources configured");

        for (index, source) in self.sources.iter().enumerate() {
            let request_url = source.request_url(url);
            debug!(%source, attempt = index + 1, total = self.sources.len(), "Trying feed source");

            match self.client.get_bytes(&request_url).await {
                Ok(response) if response.is_success() => {
                    if index > 0 {
                        info!(url, %source, "Fetched through fallback source");
                    }
                    return Ok(String::from_utf8_lossy(&response.body).into_owned());
                }
                Ok(response) => {
                    warn!(url, %source, status = response.status, "Feed source returned an error status");
                    last_error = format!("HTTP {}", response.status);
                }
                Err(e) => {
                    warn!(url, %source, error = %e, "Feed source failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(FetchError::AllSourcesFailed {
            url: url.to_string(),
            last_error,
        })
    }
}

/// Read raw feed text from a local file
pub fn read_feed_file(path: &Path) -> Result<String, FetchError> {
    let bytes = std::fs::read(path).map_err(|e| FetchError::FileReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Construct a file:// URL for a local file path
pub fn file_path_to_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(&absolute)
        .map(String::from)
        .unwrap_or_else(|_| format!("file://{}", absolute.display()))
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
