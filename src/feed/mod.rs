mod document;
mod fetch;
mod parse;

pub use fetch::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_RELAYS, FeedFetcher, FeedSource, file_path_to_url, is_url,
    read_feed_file,
};
pub use parse::{FeedEpisode, FeedKind, FeedPodcast, ParsedFeed, parse_duration, parse_feed};
