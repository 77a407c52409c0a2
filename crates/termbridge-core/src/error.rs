use thiserror::Error;

/// Errors produced by the termbridge protocol and session layers.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handle closed: {0}")]
    Closed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Whether the error means the underlying handle is gone for good.
    ///
    /// A write that fails this way cannot succeed on retry; anything else is
    /// treated as transient by callers that tolerate write failures.
    pub fn is_closed(&self) -> bool {
        match self {
            BridgeError::Closed(_) => true,
            BridgeError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
            ) || e.raw_os_error() == Some(EIO) || e.raw_os_error() == Some(EBADF),
            _ => false,
        }
    }
}

// errno values shared by Linux and the BSDs.
const EIO: i32 = 5;
const EBADF: i32 = 9;

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Codec(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
