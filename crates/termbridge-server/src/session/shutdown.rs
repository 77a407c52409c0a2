//! Session shutdown coordination.
//!
//! `Running → Closing → Closed`, linear and terminal. The first trigger wins
//! and releases the PTY master and the shell process exactly once; every later
//! trigger is a no-op. Tasks blocked on the transport wait on [`Shutdown::closed`].

use super::pty::{PtyControl, ShellProcess};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use termbridge_core::{BridgeError, BridgeResult};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RUNNING: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Closing,
    Closed,
}

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// PTY end-of-file: the shell exited.
    ShellExited,
    /// PTY read failed with something other than end-of-file.
    PtyRead,
    /// The PTY input handle is gone.
    PtyWriteClosed,
    /// An outbound frame could not be written.
    TransportWrite,
    /// The client closed the connection.
    ClientClosed,
    /// An inbound frame could not be read.
    TransportRead,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cause::ShellExited => "shell exited",
            Cause::PtyRead => "PTY read error",
            Cause::PtyWriteClosed => "PTY input closed",
            Cause::TransportWrite => "transport write error",
            Cause::ClientClosed => "client closed",
            Cause::TransportRead => "transport read error",
        };
        f.write_str(s)
    }
}

/// The single shared shutdown signal of a session.
pub struct Shutdown {
    state: AtomicU8,
    cause: OnceLock<Cause>,
    pty: Mutex<Option<Box<dyn PtyControl>>>,
    process: Mutex<Option<Box<dyn ShellProcess>>>,
    closed_tx: watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shutdown {
    pub fn new(pty: Box<dyn PtyControl>, process: Box<dyn ShellProcess>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(RUNNING),
            cause: OnceLock::new(),
            pty: Mutex::new(Some(pty)),
            process: Mutex::new(Some(process)),
            closed_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => SessionState::Running,
            CLOSING => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// The cause recorded by the winning trigger.
    pub fn cause(&self) -> Option<Cause> {
        self.cause.get().copied()
    }

    /// Begin teardown. Returns `true` only for the call that performed it.
    pub fn trigger(&self, cause: Cause) -> bool {
        if self
            .state
            .compare_exchange(RUNNING, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%cause, "shutdown already in progress");
            return false;
        }
        let _ = self.cause.set(cause);
        info!(%cause, "session closing");

        if let Some(pty) = lock(&self.pty).take() {
            drop(pty);
            debug!("PTY master released");
        }
        if let Some(process) = lock(&self.process).take() {
            match process.terminate() {
                Ok(()) => debug!("shell process terminated"),
                Err(e) => warn!(error = %e, "failed to terminate shell process"),
            }
        }

        self.state.store(CLOSED, Ordering::Release);
        self.closed_tx.send_replace(true);
        info!("session closed");
        true
    }

    /// Apply new window dimensions to the PTY, if it is still held.
    pub fn resize(&self, rows: u16, cols: u16) -> BridgeResult<()> {
        match lock(&self.pty).as_ref() {
            Some(pty) => pty.set_size(rows, cols),
            None => Err(BridgeError::Closed("PTY master released".into())),
        }
    }

    /// Resolves once teardown has finished.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
