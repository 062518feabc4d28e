mod blob;
mod cache;
mod queue;
mod transfer;

pub use blob::{BlobStore, audio_extension};
pub use cache::{
    AudioCache, CacheEvent, CacheHandle, CacheRequest, DEFAULT_CACHE_TIMEOUT, spawn_cache_worker,
};
pub use queue::{DownloadQueue, EnqueueOutcome};
pub use transfer::{Transfer, percent, transfer};
