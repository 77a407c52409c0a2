//! Abstract frame transport for the session bridge.
//!
//! The bridge never sees the concrete connection type. The accept loop splits
//! each connection into a [`FrameSource`] (read half, owned by the control
//! loop) and a [`FrameSink`] (write half, owned by the output relay).

use crate::error::BridgeResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One discrete message on the duplex transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text-encoded structured message (JSON control message).
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Frame {
    /// Frame kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(t) => t.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read half of a transport endpoint.
pub trait FrameSource: Send {
    /// Receive the next frame. `Ok(None)` means the peer closed the connection.
    fn recv(&mut self) -> BoxFuture<'_, BridgeResult<Option<Frame>>>;
}

/// Write half of a transport endpoint.
pub trait FrameSink: Send {
    /// Send one binary frame containing exactly `data`.
    fn send_binary<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, BridgeResult<()>>;

    /// Send one text frame.
    fn send_text<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, BridgeResult<()>>;

    /// Notify the peer of a normal closure and release the write half.
    fn close<'a>(&'a mut self, reason: &'a str) -> BoxFuture<'a, BridgeResult<()>>;
}
