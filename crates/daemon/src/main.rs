// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vigild: edge gateway supervisor daemon.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
//! startup failure.

use std::process::ExitCode;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use vigil_daemon::{env, Supervisor};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match env::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vigild: configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let state_dir = env::state_dir();
    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        eprintln!("vigild: cannot create state dir {}: {}", state_dir.display(), e);
        return ExitCode::from(2);
    }

    // Non-blocking file logging next to the queue, mirrored to stdout.
    // The guard must outlive the runtime so buffered lines are flushed.
    let appender = tracing_appender::rolling::never(&state_dir, "vigild.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    let supervisor = match Supervisor::build(config, &state_dir).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::from(2);
        }
    };

    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "supervisor failed");
            ExitCode::from(2)
        }
    }
}
