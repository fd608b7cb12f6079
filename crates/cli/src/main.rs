//! push-relay entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Load configuration** from the environment and validate it. Any error
//!    is fatal before state is touched.
//! 2. **Wire observability**: `tracing-subscriber` with a JSON layer and an
//!    optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the file state store (behind a read
//!    cache), the GitHub feed client and the webhook dispatcher, injected into
//!    [`relay::PollCycle`].
//! 4. **Select trigger mode** from `RUN_IMMEDIATELY`:
//!    - one-shot: run a single cycle with retries and exit non-zero on failure.
//!    - recurring: run a cycle every `POLL_INTERVAL_SECS` until SIGINT/SIGTERM.

mod config;
mod scheduler;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use relay::{CachedStateStore, PollCycle};

use crate::config::{Config, RunMode};
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("push-relay: configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let telemetry = match telemetry::init(&config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("push-relay: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(config).await;
    let code = match &result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "push-relay exiting with failure");
            ExitCode::FAILURE
        }
    };
    telemetry.shutdown();
    code
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        repository = %config.repository,
        branch = %config.target_branch,
        state_path = %config.state_path.display(),
        authenticated = config.github_token.is_some(),
        "push-relay starting"
    );

    let user_agent = format!("{}/{}", telemetry::SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    let store = CachedStateStore::new(store::FileStateStore::new(&config.state_path));
    let feed = github::GitHubFeedClient::new(github::FeedClientConfig {
        api_url: config.github_api_url.clone(),
        token: config.github_token.clone(),
        timeout: config.http_timeout,
        user_agent: user_agent.clone(),
    })
    .context("failed to build GitHub feed client")?;
    let dispatcher = webhook::WebhookDispatcher::new(webhook::WebhookConfig {
        url: config.webhook_url.clone(),
        timeout: config.http_timeout,
        user_agent,
    })
    .context("failed to build webhook dispatcher")?;

    let cycle = PollCycle::new(
        config.repository.clone(),
        config.target_branch.clone(),
        Arc::new(store),
        Arc::new(feed),
        Arc::new(dispatcher),
    );
    let scheduler = Scheduler::new(cycle);

    match config.mode {
        RunMode::Once => {
            scheduler.run_once().await.context("poll cycle failed")?;
        }
        RunMode::Recurring { interval } => {
            scheduler.run_recurring(interval, shutdown_signal()).await;
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
