//! termbridge-server: PTY-backed shells over WebSocket.
//!
//! Accepts WebSocket connections on a fixed endpoint path and gives each
//! client its own shell, relaying terminal output as binary frames and
//! applying JSON `input`/`resize` control messages to the PTY. Other paths
//! serve the terminal page from a static directory.

mod config;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, EnvOverrides, ServerConfig};
use server::BridgeServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// termbridge-server: browser terminal bridge
#[derive(Parser, Debug)]
#[command(name = "termbridge-server", version, about = "PTY to WebSocket terminal bridge")]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Shell command (overrides SHELL)
    #[arg(long)]
    shell: Option<String>,

    /// Allowed WebSocket origin; repeat for several. Any origin when unset.
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Directory served for plain HTTP requests ("" disables it)
    #[arg(long)]
    static_dir: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.termbridge/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting termbridge-server");

    let overrides = CliOverrides {
        bind: cli.bind,
        port: cli.port,
        shell: cli.shell,
        allowed_origins: cli.allowed_origins,
        static_dir: cli.static_dir,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config =
        match ServerConfig::load(Some(&config_path), &EnvOverrides::from_process(), &overrides) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        };

    let server = BridgeServer::new(server_config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("termbridge-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
