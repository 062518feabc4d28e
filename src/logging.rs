// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is not set
pub fn default_directives(level: &str) -> String {
    format!("warn,ownpod={level},rusqlite=warn,reqwest=warn")
}

/// Install the global subscriber. Logs go to stderr so they never collide
/// with progress bars or command output on stdout.
///
/// Base level from config, still overridable via `RUST_LOG`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}
