// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::ParseError;

use super::document::{Element, parse_document};

const UNTITLED_EPISODE: &str = "Untitled Episode";
const UNKNOWN_AUTHOR: &str = "Unknown";

/// The two document formats understood by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

/// Podcast-level fields extracted from a feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPodcast {
    pub title: String,
    pub description: String,
    pub link: String,
    pub author: String,
    pub image_url: Option<String>,
    pub feed_url: String,
}

/// A single episode as it appears in a feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEpisode {
    /// De-duplication key; never empty
    pub guid: String,
    pub title: String,
    pub description: String,
    /// Empty when the item carries no audio enclosure
    pub audio_url: String,
    /// Seconds
    pub duration: u64,
    pub pub_date: DateTime<Utc>,
    /// Item-level artwork only; the podcast image is applied at ingestion
    pub image_url: Option<String>,
}

/// A parsed feed document
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub kind: FeedKind,
    pub podcast: FeedPodcast,
    /// Episodes in document order
    pub episodes: Vec<FeedEpisode>,
}

/// Parse RSS 2.0 or Atom text into a podcast and its episodes
pub fn parse_feed(text: &str, feed_url: &str) -> Result<ParsedFeed, ParseError> {
    let root = parse_document(text)?;

    match classify(&root) {
        Some(FeedKind::Atom) => {
            debug!(feed_url, "Detected Atom feed");
            Ok(parse_atom(&root, feed_url))
        }
        Some(FeedKind::Rss) => {
            debug!(feed_url, "Detected RSS feed");
            parse_rss(&root, feed_url)
        }
        None => Err(ParseError::UnrecognizedFormat),
    }
}

fn classify(root: &Element) -> Option<FeedKind> {
    if root.name() == "feed" {
        Some(FeedKind::Atom)
    } else if root.name() == "rss" || root.name() == "channel" || root.descendant("channel").is_some()
    {
        Some(FeedKind::Rss)
    } else {
        None
    }
}

fn parse_rss(root: &Element, feed_url: &str) -> Result<ParsedFeed, ParseError> {
    let channel = if root.name() == "channel" {
        root
    } else {
        root.descendant("channel").ok_or(ParseError::MissingChannel)?
    };

    let podcast = FeedPodcast {
        title: channel.child_text("title").unwrap_or_default(),
        description: channel.child_text("description").unwrap_or_default(),
        link: channel.child_text("link").unwrap_or_default(),
        author: channel
            .child_text("itunes:author")
            .or_else(|| channel.child_text("managingEditor"))
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        image_url: channel_image_url(channel),
        feed_url: feed_url.to_string(),
    };

    // RSS 1.0 documents keep items beside the channel rather than inside it
    let episodes = root
        .descendants_named("item")
        .into_iter()
        .map(parse_rss_item)
        .collect();

    Ok(ParsedFeed {
        kind: FeedKind::Rss,
        podcast,
        episodes,
    })
}

fn parse_rss_item(item: &Element) -> FeedEpisode {
    let audio_url = item
        .child("enclosure")
        .and_then(|enclosure| enclosure.attr_value("url"))
        .unwrap_or_default();

    let description = item
        .child_text("description")
        .or_else(|| item.child_text("itunes:summary"))
        .or_else(|| item.child_text("content:encoded"))
        .unwrap_or_default();

    FeedEpisode {
        guid: episode_guid(item.child_text("guid"), &audio_url),
        title: item
            .child_text("title")
            .unwrap_or_else(|| UNTITLED_EPISODE.to_string()),
        description,
        duration: item
            .child_text("itunes:duration")
            .map(|raw| parse_duration(&raw))
            .unwrap_or(0),
        pub_date: publication_date(item.child_text("pubDate")),
        image_url: item_image_url(item),
        audio_url,
    }
}

fn parse_atom(feed: &Element, feed_url: &str) -> ParsedFeed {
    let podcast = FeedPodcast {
        title: feed.child_text("title").unwrap_or_default(),
        description: feed.child_text("subtitle").unwrap_or_default(),
        link: feed
            .child("link")
            .and_then(|link| link.attr_value("href"))
            .unwrap_or_default(),
        author: feed
            .child("author")
            .and_then(|author| author.child_text("name"))
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        image_url: feed.child_text("logo").or_else(|| feed.child_text("icon")),
        feed_url: feed_url.to_string(),
    };

    let episodes = feed.children_named("entry").map(parse_atom_entry).collect();

    ParsedFeed {
        kind: FeedKind::Atom,
        podcast,
        episodes,
    }
}

fn parse_atom_entry(entry: &Element) -> FeedEpisode {
    let audio_url = entry
        .children_named("link")
        .find(|link| link.attr("type").is_some_and(|ty| ty.contains("audio")))
        .and_then(|link| link.attr_value("href"))
        .unwrap_or_default();

    FeedEpisode {
        guid: episode_guid(entry.child_text("id"), &audio_url),
        title: entry
            .child_text("title")
            .unwrap_or_else(|| UNTITLED_EPISODE.to_string()),
        description: entry
            .child_text("summary")
            .or_else(|| entry.child_text("content"))
            .unwrap_or_default(),
        duration: entry
            .child_text("itunes:duration")
            .map(|raw| parse_duration(&raw))
            .unwrap_or(0),
        pub_date: publication_date(
            entry
                .child_text("published")
                .or_else(|| entry.child_text("updated")),
        ),
        image_url: item_image_url(entry),
        audio_url,
    }
}

/// Every episode needs a de-duplication key: feed guid, else audio URL,
/// else the current time.
fn episode_guid(guid: Option<String>, audio_url: &str) -> String {
    guid.or_else(|| Some(audio_url.to_string()).filter(|url| !url.is_empty()))
        .unwrap_or_else(|| Utc::now().timestamp_millis().to_string())
}

fn channel_image_url(channel: &Element) -> Option<String> {
    // Vendor attribute form: <itunes:image href="..."/>
    if let Some(href) = channel
        .children_named("image")
        .find_map(|image| image.attr_value("href"))
    {
        return Some(href);
    }

    let image = channel.child("image");

    // Standard RSS form: <image><url>...</url></image>
    if let Some(url) = image.and_then(|image| image.child_text("url")) {
        return Some(url);
    }

    // Bare form: <image>https://...</image>
    if let Some(text) = image
        .map(Element::own_text)
        .filter(|text| !text.is_empty())
    {
        return Some(text);
    }

    channel
        .child("media:thumbnail")
        .and_then(|thumbnail| thumbnail.attr_value("url"))
}

fn item_image_url(item: &Element) -> Option<String> {
    item.children_named("image")
        .find_map(|image| image.attr_value("href"))
        .or_else(|| {
            item.child("media:thumbnail")
                .and_then(|thumbnail| thumbnail.attr_value("url"))
        })
}

/// Parse an episode duration in seconds.
///
/// Accepts plain seconds (`"42"`), `MM:SS` and `H:MM:SS`. Anything else is 0.
pub fn parse_duration(raw: &str) -> u64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }

    let parts: Option<Vec<u64>> = raw
        .split(':')
        .map(|part| {
            let part = part.trim();
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok()
            } else {
                None
            }
        })
        .collect();

    match parts.as_deref() {
        Some([seconds]) => *seconds,
        Some([minutes, seconds]) => minutes.saturating_mul(60).saturating_add(*seconds),
        Some([hours, minutes, seconds]) => hours
            .saturating_mul(3600)
            .saturating_add(minutes.saturating_mul(60))
            .saturating_add(*seconds),
        _ => 0,
    }
}

fn publication_date(raw: Option<String>) -> DateTime<Utc> {
    raw.as_deref()
        .and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                debug!(date = raw, "Unparseable publication date, using ingestion time");
            }
            parsed
        })
        .unwrap_or_else(Utc::now)
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .or_else(|_| DateTime::parse_from_rfc3339(date_str))
        .ok()
        .or_else(|| parse_relaxed_date(date_str))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Try to parse dates that don't strictly conform to RFC 2822 or RFC 3339
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    for format in formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, format) {
            return Some(dt);
        }
    }

    // Zone-less timestamps are taken as UTC
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(date_str, format).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast for unit testing</description>
    <link>https://example.com</link>
    <itunes:author>Test Author</itunes:author>
    <itunes:image href="https://example.com/image.jpg"/>
    <image>
      <url>https://example.com/standard.jpg</url>
      <title>Test Podcast</title>
    </image>
    <item>
      <title>Episode 1</title>
      <description>First episode</description>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <guid>ep1-guid</guid>
      <enclosure url="https://example.com/ep1.mp3" length="1234567" type="audio/mpeg"/>
      <itunes:duration>01:02:03</itunes:duration>
      <itunes:image href="https://example.com/ep1.jpg"/>
    </item>
    <item>
      <enclosure url="https://example.com/ep2.mp3" type="audio/mpeg"/>
      <content:encoded><![CDATA[<b>Second</b>]]></content:encoded>
    </item>
  </channel>
</rss>"#;

    fn parse(text: &str) -> ParsedFeed {
        parse_feed(text, "https://example.com/feed.xml").unwrap()
    }

    #[test]
    fn parse_feed_extracts_podcast_metadata() {
        let feed = parse(SAMPLE_FEED);

        assert_eq!(feed.kind, FeedKind::Rss);
        assert_eq!(feed.podcast.title, "Test Podcast");
        assert_eq!(feed.podcast.description, "A test podcast for unit testing");
        assert_eq!(feed.podcast.author, "Test Author");
        assert_eq!(feed.podcast.link, "https://example.com");
        assert_eq!(feed.podcast.feed_url, "https://example.com/feed.xml");
        assert_eq!(
            feed.podcast.image_url.as_deref(),
            Some("https://example.com/image.jpg")
        );
    }

    #[test]
    fn parse_feed_extracts_episodes_in_document_order() {
        let feed = parse(SAMPLE_FEED);
        assert_eq!(feed.episodes.len(), 2);

        let ep1 = &feed.episodes[0];
        assert_eq!(ep1.title, "Episode 1");
        assert_eq!(ep1.guid, "ep1-guid");
        assert_eq!(ep1.audio_url, "https://example.com/ep1.mp3");
        assert_eq!(ep1.duration, 3723);
        assert_eq!(
            ep1.pub_date,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(ep1.image_url.as_deref(), Some("https://example.com/ep1.jpg"));
    }

    #[test]
    fn missing_fields_get_fallbacks() {
        let feed = parse(SAMPLE_FEED);
        let ep2 = &feed.episodes[1];

        assert_eq!(ep2.title, "Untitled Episode");
        assert_eq!(ep2.guid, "https://example.com/ep2.mp3");
        assert_eq!(ep2.description, "<b>Second</b>");
        assert_eq!(ep2.duration, 0);
        assert!(ep2.image_url.is_none());
    }

    #[test]
    fn guid_falls_back_to_timestamp_without_audio() {
        let doc = r#"<rss><channel><title>T</title><item><title>No audio</title></item></channel></rss>"#;
        let feed = parse(doc);
        let guid = &feed.episodes[0].guid;

        assert!(!guid.is_empty());
        assert!(guid.parse::<i64>().is_ok());
        assert_eq!(feed.episodes[0].audio_url, "");
    }

    #[test]
    fn author_falls_back_to_managing_editor_then_unknown() {
        let with_editor = r#"<rss><channel><title>T</title><managingEditor>ed@example.com</managingEditor></channel></rss>"#;
        assert_eq!(parse(with_editor).podcast.author, "ed@example.com");

        let without = r#"<rss><channel><title>T</title></channel></rss>"#;
        assert_eq!(parse(without).podcast.author, "Unknown");
    }

    #[test]
    fn image_resolution_order() {
        let standard = r#"<rss><channel><image><url>https://example.com/std.jpg</url></image><media:thumbnail xmlns:media="http://search.yahoo.com/mrss/" url="https://example.com/thumb.jpg"/></channel></rss>"#;
        assert_eq!(
            parse(standard).podcast.image_url.as_deref(),
            Some("https://example.com/std.jpg")
        );

        let bare = r#"<rss><channel><image>https://example.com/bare.jpg</image></channel></rss>"#;
        assert_eq!(
            parse(bare).podcast.image_url.as_deref(),
            Some("https://example.com/bare.jpg")
        );

        let thumbnail = r#"<rss><channel><media:thumbnail xmlns:media="http://search.yahoo.com/mrss/" url="https://example.com/thumb.jpg"/></channel></rss>"#;
        assert_eq!(
            parse(thumbnail).podcast.image_url.as_deref(),
            Some("https://example.com/thumb.jpg")
        );

        let none = r#"<rss><channel><title>T</title></channel></rss>"#;
        assert!(parse(none).podcast.image_url.is_none());
    }

    #[test]
    fn namespace_prefix_may_be_missing() {
        let doc = r#"<rss><channel><title>T</title><author>Plain</author>
            <item><guid>x</guid><duration>05:30</duration></item></channel></rss>"#;
        let feed = parse(doc);

        assert_eq!(feed.podcast.author, "Plain");
        assert_eq!(feed.episodes[0].duration, 330);
    }

    #[test]
    fn channel_fields_do_not_leak_from_items() {
        let doc = r#"<rss><channel><title>T</title>
            <item><guid>x</guid><description>Item text</description></item></channel></rss>"#;
        assert_eq!(parse(doc).podcast.description, "");
    }

    #[test]
    fn parses_atom_feed() {
        let doc = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Cast</title>
  <subtitle>Episodes in Atom</subtitle>
  <link href="https://atom.example.com/"/>
  <author><name>Jane</name></author>
  <logo>https://atom.example.com/logo.png</logo>
  <entry>
    <id>urn:uuid:1</id>
    <title>First</title>
    <summary>One</summary>
    <published>2024-03-01T10:00:00Z</published>
    <link rel="alternate" href="https://atom.example.com/1"/>
    <link rel="enclosure" type="audio/mpeg" href="https://atom.example.com/1.mp3"/>
  </entry>
  <entry>
    <title>Second</title>
    <updated>2024-03-02T10:00:00+01:00</updated>
    <link rel="enclosure" type="audio/ogg" href="https://atom.example.com/2.ogg"/>
  </entry>
</feed>"#;
        let feed = parse(doc);

        assert_eq!(feed.kind, FeedKind::Atom);
        assert_eq!(feed.podcast.title, "Atom Cast");
        assert_eq!(feed.podcast.description, "Episodes in Atom");
        assert_eq!(feed.podcast.link, "https://atom.example.com/");
        assert_eq!(feed.podcast.author, "Jane");
        assert_eq!(
            feed.podcast.image_url.as_deref(),
            Some("https://atom.example.com/logo.png")
        );

        assert_eq!(feed.episodes.len(), 2);
        assert_eq!(feed.episodes[0].guid, "urn:uuid:1");
        assert_eq!(feed.episodes[0].audio_url, "https://atom.example.com/1.mp3");
        assert_eq!(feed.episodes[0].description, "One");
        assert_eq!(
            feed.episodes[0].pub_date,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(feed.episodes[1].guid, "https://atom.example.com/2.ogg");
        assert_eq!(
            feed.episodes[1].pub_date,
            Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_unrecognized_documents() {
        let result = parse_feed("<html><body/></html>", "https://example.com");
        assert!(matches!(result, Err(ParseError::UnrecognizedFormat)));
    }

    #[test]
    fn rejects_malformed_xml() {
        let result = parse_feed("this is not xml", "https://example.com");
        assert!(matches!(result, Err(ParseError::Xml(_))));
    }

    #[test]
    fn undeclared_namespace_prefix_is_a_structural_error() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>No Declarations</title>
    <item>
      <guid>1</guid>
      <itunes:duration>01:00</itunes:duration>
    </item>
  </channel>
</rss>"#;

        let result = parse_feed(feed, "https://example.com/feed.xml");
        assert!(matches!(result, Err(ParseError::Xml(_))));
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("01:02:03"), 3723);
        assert_eq!(parse_duration("05:30"), 330);
        assert_eq!(parse_duration("42"), 42);
        assert_eq!(parse_duration("garbage"), 0);
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("1:2:3:4"), 0);
        assert_eq!(parse_duration("12:xx"), 0);
    }

    #[test]
    fn relaxed_dates_are_accepted() {
        assert_eq!(
            parse_date("2024-01-15 08:30:00"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap())
        );
        assert_eq!(
            parse_date("Mon, 15 Jan 2024 08:30 +0100"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap())
        );
        assert!(parse_date("last tuesday").is_none());
    }
}
