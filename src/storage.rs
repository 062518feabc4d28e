// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use serde::Serialize;

use crate::download::BlobStore;
use crate::store::Store;

/// Disk usage of the data directory against the configured quota
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageEstimate {
    pub usage: u64,
    /// `None` when no quota is configured
    pub quota: Option<u64>,
    pub percent_used: Option<f64>,
}

impl StorageEstimate {
    pub fn new(usage: u64, quota: Option<u64>) -> Self {
        let percent_used = quota
            .filter(|&q| q > 0)
            .map(|q| (usage as f64 / q as f64 * 10_000.0).round() / 100.0);
        Self {
            usage,
            quota,
            percent_used,
        }
    }

    pub fn usage_readable(&self) -> String {
        format_bytes(self.usage)
    }

    pub fn quota_readable(&self) -> Option<String> {
        self.quota.map(format_bytes)
    }
}

/// Measure cached audio plus the database
pub fn estimate(blobs: &BlobStore, store: &Store) -> io::Result<StorageEstimate> {
    let usage = blobs.usage()? + store.size_on_disk();
    Ok(StorageEstimate::new(usage, blobs.quota()))
}

/// Human readable size in binary units, at most two decimals
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}
