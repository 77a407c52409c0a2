//! Core server: accepts connections and runs one session per client.
//!
//! Every connection gets its own shell and its own tasks. Nothing is shared
//! between sessions, so a fault in one connection never reaches another.

use crate::config::ServerConfig;
use crate::session::pty::find_in_path;
use crate::session::{Session, SessionSummary};
use crate::transport::websocket::{self, UpgradeSettings, WebSocketConnection};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use termbridge_core::BridgeResult;
use tracing::{info, info_span, warn, Instrument};

/// Cluster CLI that shells started by the bridge commonly expect.
const KUBECTL: &str = "kubectl";

/// The termbridge server instance.
pub struct BridgeServer {
    config: ServerConfig,
    /// Last assigned session id.
    next_id: AtomicU64,
}

impl BridgeServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn upgrade_settings(&self) -> UpgradeSettings {
        UpgradeSettings {
            ws_path: self.config.ws_path.clone(),
            origin_policy: self.config.origin_policy.clone(),
            max_message_size: self.config.max_message_size,
            static_dir: self.config.static_dir.clone(),
        }
    }

    /// Bind and serve until the listener stops.
    ///
    /// Only configuration and bind failures are returned; everything after
    /// that is confined to the connection it happened on.
    pub async fn run(self) -> BridgeResult<()> {
        let server = Arc::new(self);
        let addr = server.config.listen_addr()?;
        let settings = Arc::new(server.upgrade_settings());

        check_kubectl(std::env::var_os("PATH").as_deref());
        let mut ws_rx = websocket::start_listener(addr, settings).await?;

        info!(
            addr = %addr,
            path = %server.config.ws_path,
            static_dir = ?server.config.static_dir,
            "termbridge-server ready"
        );

        while let Some(conn) = ws_rx.recv().await {
            let id = server.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let span = info_span!("session", id, remote = %conn.remote_addr);
            let srv = server.clone();
            tokio::spawn(
                async move {
                    srv.serve(id, conn).await;
                }
                .instrument(span),
            );
        }

        info!("listener closed, shutting down");
        Ok(())
    }

    /// Run one upgraded connection to completion.
    pub async fn serve(&self, id: u64, conn: WebSocketConnection) -> Option<SessionSummary> {
        info!("client connected");
        let (source, sink) = conn.split(self.config.write_timeout);
        match Session::start(id, Box::new(source), Box::new(sink), &self.config.terminal).await {
            Ok(session) => {
                info!(
                    id = session.id(),
                    shell = session.shell(),
                    pid = session.pid(),
                    "session started"
                );
                Some(session.run().await)
            }
            Err(e) => {
                warn!(error = %e, "session not started");
                None
            }
        }
    }
}

/// Log whether `kubectl` is reachable through `path`.
fn check_kubectl(path: Option<&OsStr>) -> Option<PathBuf> {
    match find_in_path(KUBECTL, path) {
        Some(found) => {
            info!(path = %found.display(), "kubectl found");
            Some(found)
        }
        None => {
            warn!("kubectl not found on PATH");
            None
        }
    }
}
