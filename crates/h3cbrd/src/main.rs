//! h3cbrd - h3cbr bridge network plugin daemon.
//!
//! Serves the libnetwork remote driver protocol on a unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use h3cbr_driver::{Driver, DriverConfig};
use h3cbr_network::{LinkGateway, MockGateway, RtNetlinkGateway};
use tokio::net::UnixListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod api;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket the plugin listens on
    #[arg(
        long,
        env = "H3CBR_SOCKET",
        default_value = "/run/docker/plugins/h3c-bridge-network.sock"
    )]
    socket: PathBuf,

    /// Timeout of each netlink request, in milliseconds
    #[arg(long, env = "H3CBR_NETLINK_TIMEOUT_MS", default_value_t = 3000)]
    netlink_timeout_ms: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "H3CBR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "H3CBR_LOG_JSON")]
    log_json: bool,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,

    /// Keep links in memory instead of touching the kernel
    #[arg(long, env = "H3CBR_MOCK")]
    mock: bool,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    let filter = if args.debug {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
    Ok(())
}

fn bind(socket: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(socket) {
        Ok(()) => tracing::debug!(socket = %socket.display(), "Removed stale socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to remove {}", socket.display()));
        }
    }
    UnixListener::bind(socket).with_context(|| format!("failed to bind {}", socket.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for ctrl-c");
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let gateway: Arc<dyn LinkGateway> = if args.mock {
        Arc::new(MockGateway::new())
    } else {
        let timeout = Duration::from_millis(args.netlink_timeout_ms);
        Arc::new(RtNetlinkGateway::new(timeout).context("failed to open netlink connection")?)
    };
    let driver = Arc::new(Driver::new(gateway, DriverConfig::default()));

    let listener = bind(&args.socket)?;
    tracing::info!(socket = %args.socket.display(), mock = args.mock, "h3cbrd listening");

    axum::serve(listener, api::server::app(driver))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited")?;

    if let Err(err) = std::fs::remove_file(&args.socket) {
        tracing::warn!(socket = %args.socket.display(), error = %err, "Failed to remove socket");
    }
    Ok(())
}
