//! petgate - look up a user's pets by phone number.
//!
//! Startup opens the SSH tunnel and then the connection pool; shutdown on
//! Ctrl+C or SIGTERM stops the HTTP server, then closes the pool and the
//! tunnel in that order.

mod args;
mod http;

use anyhow::Context;
use args::Args;
use clap::Parser;
use petgate_core::logging::{init_logging, LogConfig};
use petgate_core::{Lifecycle, SshConnector};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    let mut log_config = LogConfig::new(args.log_dir.clone());
    if let Some(filter) = &args.log_filter {
        log_config = log_config.with_filter(filter);
    }
    let _logging = init_logging(log_config);

    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }

    let config = args.app_config();
    tracing::info!(
        ssh_host = %config.tunnel.host,
        database = %config.database.display_url(),
        local_port = config.options.local_port,
        pool_size = config.options.pool_size,
        "Starting petgate"
    );

    let state = match Lifecycle::start(&SshConnector, &config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(stage = %e.stage, error = %e.source.chain(), "Startup failed");
            if let Some(hint) = e.source.hint() {
                tracing::error!("Hint: {hint}");
            }
            return Err(e).context("petgate could not start");
        }
    };

    let listener = match TcpListener::bind(args.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            state.stop().await;
            return Err(e).with_context(|| format!("Failed to bind HTTP address {}", args.http_addr));
        }
    };

    let served = http::serve(listener, state.store(), shutdown_signal()).await;
    state.stop().await;
    served.context("HTTP server failed")
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}
