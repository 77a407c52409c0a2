//! Control messages sent from the client to the bridge.
//!
//! Wire format: one JSON object per text frame, discriminated by `type`:
//!
//! ```text
//! {"type": "input", "data": "ls\n"}
//! {"type": "resize", "rows": 40, "cols": 120}
//! ```
//!
//! Unrecognized `type` values decode to [`ControlMessage::Unknown`] so the
//! caller can log and skip them.

use crate::error::BridgeResult;
use serde::Deserialize;
use serde_json::json;

/// Wire name of the input message type.
pub const TYPE_INPUT: &str = "input";
/// Wire name of the resize message type.
pub const TYPE_RESIZE: &str = "resize";

/// A decoded unit of client intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Raw bytes for the shell's stdin.
    Input { data: Vec<u8> },
    /// New terminal geometry.
    Resize { rows: u16, cols: u16 },
    /// Any other declared type.
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    rows: Option<u16>,
    #[serde(default)]
    cols: Option<u16>,
}

impl ControlMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> BridgeResult<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            TYPE_INPUT => Ok(ControlMessage::Input {
                data: raw.data.unwrap_or_default().into_bytes(),
            }),
            // Missing dimensions are zero; the PTY decides what it accepts.
            TYPE_RESIZE => Ok(ControlMessage::Resize {
                rows: raw.rows.unwrap_or(0),
                cols: raw.cols.unwrap_or(0),
            }),
            _ => Ok(ControlMessage::Unknown { kind: raw.kind }),
        }
    }

    /// Encode into the JSON text the client would send.
    pub fn encode(&self) -> String {
        let value = match self {
            ControlMessage::Input { data } => json!({
                "type": TYPE_INPUT,
                "data": String::from_utf8_lossy(data),
            }),
            ControlMessage::Resize { rows, cols } => json!({
                "type": TYPE_RESIZE,
                "rows": rows,
                "cols": cols,
            }),
            ControlMessage::Unknown { kind } => json!({ "type": kind }),
        };
        value.to_string()
    }

    /// Short label for logging.
    pub fn kind(&self) -> &str {
        match self {
            ControlMessage::Input { .. } => TYPE_INPUT,
            ControlMessage::Resize { .. } => TYPE_RESIZE,
            ControlMessage::Unknown { kind } => kind,
        }
    }
}
