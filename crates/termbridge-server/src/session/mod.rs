//! Terminal sessions: PTY spawning, the session bridge and its shutdown signal.

pub mod bridge;
pub mod pty;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod fakes;

pub use bridge::{Session, SessionSummary, STARTUP_ERROR_PREFIX};
pub use shutdown::Cause;
