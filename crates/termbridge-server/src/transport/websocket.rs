//! HTTP listener using axum: WebSocket upgrades plus static assets.
//!
//! Requests for the endpoint path are upgraded (after the origin check) and
//! every other request falls through to the static asset directory. Each
//! upgraded socket is split into a single-reader [`WsFrameSource`] and a
//! single-writer [`WsFrameSink`].

use super::OriginPolicy;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use termbridge_core::{BoxFuture, BridgeError, BridgeResult, Frame, FrameSink, FrameSource};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

/// Request-time policy for the HTTP surface.
#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    /// Only requests for this path are upgraded.
    pub ws_path: String,
    pub origin_policy: OriginPolicy,
    /// Ceiling for inbound messages and frames.
    pub max_message_size: usize,
    /// Served for every other path when set.
    pub static_dir: Option<PathBuf>,
}

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub socket: WebSocket,
    pub remote_addr: SocketAddr,
}

impl WebSocketConnection {
    /// Split into the read half (control loop) and the write half (output relay).
    pub fn split(self, write_timeout: Option<Duration>) -> (WsFrameSource, WsFrameSink) {
        let (sink, stream) = self.socket.split();
        (
            WsFrameSource { stream },
            WsFrameSink {
                sink,
                write_timeout,
            },
        )
    }
}

#[derive(Clone)]
struct UpgradeState {
    settings: Arc<UpgradeSettings>,
    conn_tx: mpsc::Sender<WebSocketConnection>,
}

/// Bind and start serving.
///
/// Binding is the only fatal step; it is reported to the caller. Returns a
/// receiver that yields upgraded connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    settings: Arc<UpgradeSettings>,
) -> BridgeResult<mpsc::Receiver<WebSocketConnection>> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| BridgeError::Transport(format!("bind failed on {bind_addr}: {e}")))?;

    info!(addr = %bind_addr, path = %settings.ws_path, "HTTP listener started");
    Ok(serve_listener(listener, settings))
}

/// Serve an already bound listener in the background.
pub fn serve_listener(
    listener: TcpListener,
    settings: Arc<UpgradeSettings>,
) -> mpsc::Receiver<WebSocketConnection> {
    let (conn_tx, conn_rx) = mpsc::channel::<WebSocketConnection>(64);
    let app = router(settings, conn_tx);

    tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            error!(error = %e, "HTTP server stopped");
        }
    });

    conn_rx
}

fn router(settings: Arc<UpgradeSettings>, conn_tx: mpsc::Sender<WebSocketConnection>) -> Router {
    let mut router = Router::new().route(&settings.ws_path, get(upgrade));
    match &settings.static_dir {
        Some(dir) => {
            if !dir.is_dir() {
                warn!(path = %dir.display(), "static directory not found, assets will 404");
            }
            router = router.fallback_service(ServeDir::new(dir));
        }
        None => debug!("static assets disabled"),
    }
    router.with_state(UpgradeState { settings, conn_tx })
}

async fn upgrade(
    State(state): State<UpgradeState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
    if !state.settings.origin_policy.allows(origin) {
        warn!(
            remote = %remote_addr,
            origin = origin.unwrap_or("<none>"),
            "rejecting upgrade: origin not allowed"
        );
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let limit = state.settings.max_message_size;
    let conn_tx = state.conn_tx.clone();
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(move |e| {
            warn!(remote = %remote_addr, error = %e, "WebSocket handshake failed");
        })
        .on_upgrade(move |socket| async move {
            debug!(remote = %remote_addr, "WebSocket connection accepted");
            let conn = WebSocketConnection {
                socket,
                remote_addr,
            };
            if conn_tx.send(conn).await.is_err() {
                warn!("WebSocket connection channel closed");
            }
        })
}

/// Read half of an upgraded connection.
pub struct WsFrameSource {
    stream: SplitStream<WebSocket>,
}

impl FrameSource for WsFrameSource {
    fn recv(&mut self) -> BoxFuture<'_, BridgeResult<Option<Frame>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(Some(Frame::Text(text))),
                    Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::Binary(data))),
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    // Pings are answered by the library.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(BridgeError::Transport(format!("WS recv failed: {e}")));
                    }
                    None => return Ok(None),
                }
            }
        })
    }
}

/// Write half of an upgraded connection.
pub struct WsFrameSink {
    sink: SplitSink<WebSocket, Message>,
    write_timeout: Option<Duration>,
}

/// Run one sink operation under the optional write bound.
async fn bounded<F>(limit: Option<Duration>, fut: F) -> BridgeResult<()>
where
    F: Future<Output = Result<(), axum::Error>>,
{
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BridgeError::Timeout)?,
        None => fut.await,
    };
    result.map_err(|e| BridgeError::Transport(format!("WS send failed: {e}")))
}

impl FrameSink for WsFrameSink {
    fn send_binary<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let limit = self.write_timeout;
            bounded(limit, self.sink.send(Message::Binary(data.to_vec()))).await
        })
    }

    fn send_text<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let limit = self.write_timeout;
            bounded(limit, self.sink.send(Message::Text(text.to_string()))).await
        })
    }

    fn close<'a>(&'a mut self, reason: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let limit = self.write_timeout;
            let frame = CloseFrame {
                code: close_code::NORMAL,
                reason: reason.to_string().into(),
            };
            let sent = bounded(limit, self.sink.send(Message::Close(Some(frame)))).await;
            // The close frame may already be queued by the library; errors here are moot.
            let _ = bounded(limit, self.sink.close()).await;
            sent
        })
    }
}
