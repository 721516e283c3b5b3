// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::{Parser, ValueEnum};
use faucet_dispatch::server::{AppState, create_router};
use faucet_dispatch::{Dispatcher, FaucetConfig, MemoryLedger};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Faucet Dispatch - Multi-identity disbursement service
///
/// Accepts payout requests over HTTP and spreads them across a pool of
/// funding identities, one ordered queue per identity.
#[derive(Parser, Debug)]
#[command(name = "faucet-dispatch")]
#[command(about = "A faucet that fans payouts out over funding identities", long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, value_name = "FILE", default_value = "config/faucet.toml")]
    config: PathBuf,

    /// Listen address, overriding `server.listen`
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log level, unless RUST_LOG is set
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level, args.log_format) {
        eprintln!("Error initialising logging: {}", e);
        process::exit(1);
    }

    let mut config = match FaucetConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "failed to load config");
            process::exit(1);
        }
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    let ledger = Arc::new(MemoryLedger::from_demo(&config.demo));
    let dispatcher = match Dispatcher::new(&config, ledger) {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(e) => {
            error!(error = %e, "invalid config");
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(listen = %config.server.listen, error = %e, "failed to bind");
            process::exit(1);
        }
    };

    dispatcher.start();
    info!(listen = %config.server.listen, "faucet listening");

    let app = create_router(AppState {
        dispatcher: Arc::clone(&dispatcher),
    });
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await;

    dispatcher.shutdown().await;

    if let Err(e) = served {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
