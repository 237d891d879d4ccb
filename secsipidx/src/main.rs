// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::process::ExitCode;

use secsipidx::{cli::Cli, dispatch};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{
    filter::{Directive, LevelFilter},
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    EnvFilter,
};

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Cli::parse_normalized();

    let default_directive: Directive = opts
        .config
        .log_directive()
        .parse()
        .unwrap_or_else(|_| LevelFilter::WARN.into());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(stderr_layer).with(
        EnvFilter::builder()
            .with_default_directive(default_directive)
            .with_env_var("SECSIPIDX_LOG")
            .from_env_lossy(),
    );
    tracing::subscriber::set_global_default(registry)
        .expect("Programming error: set_global_default should only be called once.");
    tracing::debug!(config = %opts.config, "Parsed command line");

    let halt_token = CancellationToken::new();
    if opts.config.serves() {
        tokio::spawn(signal_handler(halt_token.clone()));
    }

    ExitCode::from(dispatch::run(opts.config, halt_token).await)
}

/// Install and manage signal handlers for the process.
///
/// # SIGTERM and SIGINT
///
/// Sending SIGTERM or SIGINT to the process while it serves the HTTP API stops the
/// listeners immediately. Requests in progress are not completed.
async fn signal_handler(halt_token: CancellationToken) -> Result<(), anyhow::Error> {
    let mut sigterm_stream = signal(SignalKind::terminate()).inspect_err(|error| {
        tracing::error!(?error, "Failed to register a SIGTERM signal handler")
    })?;
    let mut sigint_stream = signal(SignalKind::interrupt()).inspect_err(|error| {
        tracing::error!(?error, "Failed to register a SIGINT signal handler")
    })?;

    loop {
        tokio::select! {
            _ = sigterm_stream.recv() => {
                tracing::info!("SIGTERM received, stopping the service");
                halt_token.cancel();
            }
            _ = sigint_stream.recv() => {
                tracing::info!("SIGINT received, stopping the service");
                halt_token.cancel();
            }
        }
    }
}
