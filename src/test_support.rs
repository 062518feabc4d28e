// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared doubles for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::HttpError;
use crate::http::{ByteStream, HttpBytes, HttpClient, HttpResponse};

#[derive(Clone)]
enum Route {
    Body { status: u16, body: Bytes },
    /// Body whose second half arrives after `pause`
    Slow {
        status: u16,
        body: Bytes,
        pause: Duration,
    },
    Fail(String),
    Hang,
}

/// HTTP client answering from a fixed URL table. Unknown URLs fail like a
/// refused connection.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    /// Answers used once, ahead of `routes`
    first: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, status: u16, body: impl Into<Bytes>) -> Self {
        self.set_body(url, status, body);
        self
    }

    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Fail(message.to_string()));
        self
    }

    pub fn with_hang(self, url: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Hang);
        self
    }

    pub fn with_slow_body(
        self,
        url: &str,
        status: u16,
        body: impl Into<Bytes>,
        pause: Duration,
    ) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), slow(status, body, pause));
        self
    }

    /// Answer only the next request for `url` with a slow body. Later
    /// requests get the regular route.
    pub fn set_slow_first(&self, url: &str, status: u16, body: impl Into<Bytes>, pause: Duration) {
        self.first
            .lock()
            .unwrap()
            .insert(url.to_string(), slow(status, body, pause));
    }

    pub fn set_body(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route::Body {
                status,
                body: body.into(),
            },
        );
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn route(&self, url: &str) -> Option<Route> {
        self.requests.lock().unwrap().push(url.to_string());
        let first = self.first.lock().unwrap().remove(url);
        first.or_else(|| self.routes.lock().unwrap().get(url).cloned())
    }
}

fn slow(status: u16, body: impl Into<Bytes>, pause: Duration) -> Route {
    Route::Slow {
        status,
        body: body.into(),
        pause,
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_bytes(&self, url: &str) -> Result<HttpBytes, HttpError> {
        match self.route(url) {
            Some(Route::Body { status, body }) => Ok(HttpBytes { status, body }),
            Some(Route::Slow {
                status,
                body,
                pause,
            }) => {
                tokio::time::sleep(pause).await;
                Ok(HttpBytes { status, body })
            }
            Some(Route::Fail(message)) => Err(HttpError::Transport(message)),
            Some(Route::Hang) => futures::future::pending().await,
            None => Err(HttpError::Transport(format!("connection refused: {url}"))),
        }
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let (status, body, pause) = match self.route(url) {
            Some(Route::Body { status, body }) => (status, body, None),
            Some(Route::Slow {
                status,
                body,
                pause,
            }) => (status, body, Some(pause)),
            Some(Route::Fail(message)) => return Err(HttpError::Transport(message)),
            Some(Route::Hang) => futures::future::pending().await,
            None => return Err(HttpError::Transport(format!("connection refused: {url}"))),
        };
        let len = body.len() as u64;

        // Two chunks so progress is reported mid-transfer
        let mid = body.len() / 2;
        let head = futures::stream::iter([Ok::<_, HttpError>(body.slice(..mid))]);
        let rest = body.slice(mid..);
        let stream: ByteStream = match pause {
            None => Box::pin(head.chain(futures::stream::iter([Ok(rest)]))),
            Some(pause) => Box::pin(head.chain(futures::stream::once(async move {
                tokio::time::sleep(pause).await;
                Ok(rest)
            }))),
        };

        Ok(HttpResponse {
            status,
            content_length: Some(len),
            body: stream,
        })
    }
}

pub const THREE_ITEM_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast</description>
    <link>https://example.com</link>
    <itunes:author>Test Author</itunes:author>
    <itunes:image href="https://example.com/cover.jpg"/>
    <item>
      <title>Episode A</title>
      <guid>A</guid>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/a.mp3" type="audio/mpeg"/>
      <itunes:duration>30:00</itunes:duration>
    </item>
    <item>
      <title>Episode B</title>
      <guid>B</guid>
      <pubDate>Tue, 02 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/b.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode C</title>
      <guid>C</guid>
      <pubDate>Wed, 03 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/c.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

pub const FOUR_ITEM_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast (renamed)</title>
    <description>A test podcast</description>
    <link>https://example.com</link>
    <itunes:author>Test Author</itunes:author>
    <itunes:image href="https://example.com/cover.jpg"/>
    <item>
      <title>Episode D</title>
      <guid>D</guid>
      <pubDate>Thu, 04 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/d.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode A</title>
      <guid>A</guid>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/a.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode B</title>
      <guid>B</guid>
      <pubDate>Tue, 02 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/b.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode C</title>
      <guid>C</guid>
      <pubDate>Wed, 03 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/c.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;
