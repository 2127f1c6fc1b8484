/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

fn filter_layer() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install a global subscriber logging to `stdout` that respects `RUST_LOG`.
///
/// Defaults to the "info" level when the environment variable is not set.
pub fn init_subscriber() {
    tracing_subscriber::registry()
        .with(filter_layer())
        .with(fmt::layer().with_target(true))
        .init();
}

/// Install a subscriber for the duration of a single test.
///
/// The returned guard scopes the subscriber to the current thread, so tests running in
/// parallel do not fight over the global default.
pub fn init_test_subscriber() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::registry()
        .with(filter_layer())
        .with(fmt::layer().with_target(true).with_test_writer())
        .set_default()
}
