//! termbridge-core: shared protocol library for the terminal bridge.
//!
//! Provides the client control-message codec, the frame type, and the
//! transport traits the session bridge is written against.

pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{BridgeError, BridgeResult};
pub use messages::ControlMessage;
pub use transport::{BoxFuture, Frame, FrameSink, FrameSource};
