// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Podcast directory lookups against the iTunes Search API.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::SearchError;
use crate::feed::FeedFetcher;
use crate::http::HttpClient;

pub const SEARCH_ENDPOINT: &str = "https://itunes.apple.com/search";
pub const LOOKUP_ENDPOINT: &str = "https://itunes.apple.com/lookup";
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    results: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    #[serde(rename = "collectionId")]
    collection_id: Option<u64>,
    #[serde(rename = "collectionName")]
    collection_name: Option<String>,
    #[serde(rename = "trackName")]
    track_name: Option<String>,
    #[serde(rename = "artistName")]
    artist_name: Option<String>,
    #[serde(rename = "feedUrl")]
    feed_url: Option<String>,
    #[serde(rename = "artworkUrl600")]
    artwork_url_600: Option<String>,
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(rename = "trackCount")]
    track_count: Option<u32>,
    country: Option<String>,
}

/// A directory hit, shaped like a podcast record. `feed_url` is missing for
/// entries that cannot be subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub author: String,
    pub feed_url: Option<String>,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
    pub track_count: Option<u32>,
    pub country: Option<String>,
    pub itunes_id: Option<u64>,
}

impl From<DirectoryEntry> for SearchResult {
    fn from(entry: DirectoryEntry) -> Self {
        Self {
            title: entry.collection_name.or(entry.track_name).unwrap_or_default(),
            author: entry.artist_name.unwrap_or_default(),
            feed_url: entry.feed_url,
            image_url: entry.artwork_url_600.or(entry.artwork_url_100),
            genres: entry.genres,
            track_count: entry.track_count,
            country: entry.country,
            itunes_id: entry.collection_id,
        }
    }
}

/// Build the search request URL
pub fn search_url(term: &str, limit: u32, country: Option<&str>) -> String {
    let limit = limit.to_string();
    let mut params = vec![
        ("term", term),
        ("media", "podcast"),
        ("entity", "podcast"),
        ("limit", limit.as_str()),
    ];
    if let Some(country) = country {
        params.push(("country", country));
    }
    // The endpoint constant always parses
    Url::parse_with_params(SEARCH_ENDPOINT, &params)
        .map(String::from)
        .unwrap_or_default()
}

/// Build the lookup request URL for a single directory id
pub fn lookup_url(itunes_id: u64) -> String {
    format!("{LOOKUP_ENDPOINT}?id={itunes_id}&entity=podcast")
}

pub struct DirectoryClient<C> {
    fetcher: FeedFetcher<C>,
    country: Option<String>,
}

impl<C: HttpClient> DirectoryClient<C> {
    /// Requests go through `fetcher`, so they get the same relay fallback
    /// and deadline as feeds.
    pub fn new(fetcher: FeedFetcher<C>) -> Self {
        Self {
            fetcher,
            country: None,
        }
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// Search the directory. With a country configured, an empty regional
    /// result set is retried worldwide.
    pub async fn search(&self, term: &str, limit: u32) -> Result<Vec<SearchResult>, SearchError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(SearchError::EmptyTerm);
        }

        if let Some(country) = self.country.as_deref() {
            let results = self.query(&search_url(term, limit, Some(country))).await?;
            if !results.is_empty() {
                return Ok(results);
            }
            info!(term, country, "No regional results, searching worldwide");
        }

        self.query(&search_url(term, limit, None)).await
    }

    /// Fetch a single directory entry
    pub async fn lookup(&self, itunes_id: u64) -> Result<SearchResult, SearchError> {
        self.query(&lookup_url(itunes_id))
            .await?
            .into_iter()
            .next()
            .ok_or(SearchError::NotFound(itunes_id))
    }

    async fn query(&self, url: &str) -> Result<Vec<SearchResult>, SearchError> {
        let body = self.fetcher.fetch(url).await?;
        let response: DirectoryResponse = serde_json::from_str(&body)?;
        debug!(url, count = response.results.len(), "Directory response");
        Ok(response.results.into_iter().map(SearchResult::from).collect())
    }
}
