// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide tracing setup: structured logs to stderr plus a rolling
//! file appender under the instance's log directory, filtered by
//! `RUST_LOG` (defaulting to `info`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global subscriber. The returned guard must be held for
/// the life of the process — dropping it stops the background flush
/// thread and can truncate the last batch of log lines.
pub fn init_logging(log_dir: &Path, instance_id: &str) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{instance_id}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(fmt::format().compact())
        .init();

    Ok(guard)
}
