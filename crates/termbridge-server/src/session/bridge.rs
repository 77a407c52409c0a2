//! The session bridge: one shell on one PTY, relayed over one frame transport.
//!
//! Two logical tasks run for the whole session:
//!
//! - the **output relay** moves PTY output into binary frames, in order, one
//!   frame per PTY read;
//! - the **control loop** decodes inbound text frames and applies input and
//!   resize commands to the PTY.
//!
//! Neither task passes data to the other. Each handle has exactly one reader
//! or writer; the only shared state is the [`Shutdown`] signal, which either
//! task triggers when its side fails.

use super::pty::{spawn_shell, PtyParts};
use super::shutdown::{Cause, SessionState, Shutdown};
use crate::config::TerminalConfig;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use termbridge_core::{BridgeError, BridgeResult, ControlMessage, Frame, FrameSink, FrameSource};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// PTY reads buffered between the reader thread and the transport writer.
const RELAY_QUEUE_DEPTH: usize = 4;

/// Prefix of the text frame sent when the shell cannot be started.
pub const STARTUP_ERROR_PREFIX: &str = "Error starting terminal: ";

/// Counters reported when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: u64,
    /// Process id of the shell, when the platform reports one.
    pub pid: Option<u32>,
    /// What triggered teardown.
    pub cause: Option<Cause>,
    /// Binary frames sent to the client.
    pub frames_out: u64,
    pub bytes_out: u64,
    /// Input messages written to the PTY.
    pub inputs: u64,
    pub bytes_in: u64,
    pub resizes: u64,
    /// Non-text frames, malformed messages and unknown types.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct RelayStats {
    frames: u64,
    bytes: u64,
}

#[derive(Debug, Default)]
struct ControlStats {
    inputs: u64,
    bytes: u64,
    resizes: u64,
    skipped: u64,
}

/// One PTY read as seen by the transport side of the relay.
enum PtyRead {
    Data(Vec<u8>),
    Eof,
    Failed(std::io::Error),
}

/// A running shell bound to one client connection.
pub struct Session {
    id: u64,
    shell: String,
    pid: Option<u32>,
    shutdown: Arc<Shutdown>,
    output: Box<dyn Read + Send>,
    input: Box<dyn Write + Send>,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    read_buffer_size: usize,
}

impl Session {
    /// Spawn a shell for a freshly accepted endpoint.
    ///
    /// On failure the client gets one best-effort text frame describing the
    /// error, the endpoint is closed, and no session exists. Never retried.
    pub async fn start(
        id: u64,
        source: Box<dyn FrameSource>,
        mut sink: Box<dyn FrameSink>,
        config: &TerminalConfig,
    ) -> BridgeResult<Self> {
        match spawn_shell(config) {
            Ok(parts) => Ok(Self::attach(
                id,
                parts,
                source,
                sink,
                config.read_buffer_size,
            )),
            Err(e) => {
                warn!(error = %e, "failed to start terminal");
                let notice = format!("{STARTUP_ERROR_PREFIX}{e}");
                if let Err(send_err) = sink.send_text(&notice).await {
                    debug!(error = %send_err, "startup error not delivered");
                }
                let _ = sink.close("terminal unavailable").await;
                drop(source);
                Err(e)
            }
        }
    }

    /// Bind already-spawned PTY parts to an endpoint.
    pub fn attach(
        id: u64,
        parts: PtyParts,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        read_buffer_size: usize,
    ) -> Self {
        let PtyParts {
            output,
            input,
            control,
            process,
            shell,
        } = parts;
        let pid = process.pid();
        Self {
            id,
            shell,
            pid,
            shutdown: Arc::new(Shutdown::new(control, process)),
            output,
            input,
            source,
            sink,
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.shutdown.state()
    }

    pub fn is_alive(&self) -> bool {
        self.shutdown.is_running()
    }

    /// The session's shutdown signal, for observing or forcing teardown.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Relay until either side ends, then return once teardown is complete.
    pub async fn run(self) -> SessionSummary {
        let Session {
            id,
            shell,
            pid,
            shutdown,
            output,
            input,
            source,
            sink,
            read_buffer_size,
        } = self;
        info!(shell = %shell, pid, "session running");

        let (chunk_tx, chunk_rx) = mpsc::channel(RELAY_QUEUE_DEPTH);
        // Not joined: a PTY kept open by an orphaned grandchild must not pin the session.
        tokio::task::spawn_blocking(move || read_pty(output, chunk_tx, read_buffer_size));

        let (relay, control) = tokio::join!(
            output_relay(chunk_rx, sink, shutdown.clone()),
            control_loop(source, input, shutdown.clone()),
        );

        let summary = SessionSummary {
            id,
            pid,
            cause: shutdown.cause(),
            frames_out: relay.frames,
            bytes_out: relay.bytes,
            inputs: control.inputs,
            bytes_in: control.bytes,
            resizes: control.resizes,
            skipped: control.skipped,
        };
        info!(
            cause = ?summary.cause,
            bytes_out = summary.bytes_out,
            bytes_in = summary.bytes_in,
            "session finished"
        );
        summary
    }
}

/// PTY half of the output relay: blocking reads handed over in order.
fn read_pty(mut output: Box<dyn Read + Send>, tx: mpsc::Sender<PtyRead>, buf_size: usize) {
    let mut buf = vec![0u8; buf_size];
    loop {
        match output.read(&mut buf) {
            Ok(0) => {
                let _ = tx.blocking_send(PtyRead::Eof);
                break;
            }
            Ok(n) => {
                if tx.blocking_send(PtyRead::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(PtyRead::Failed(e));
                break;
            }
        }
    }
    debug!("PTY reader stopped");
}

/// Transport half of the output relay.
async fn output_relay(
    mut chunks: mpsc::Receiver<PtyRead>,
    mut sink: Box<dyn FrameSink>,
    shutdown: Arc<Shutdown>,
) -> RelayStats {
    let mut stats = RelayStats::default();

    let cause = loop {
        let event = tokio::select! {
            biased;
            event = chunks.recv() => event,
            _ = shutdown.closed() => break None,
        };
        match event {
            Some(PtyRead::Data(data)) => {
                if let Err(e) = sink.send_binary(&data).await {
                    warn!(error = %e, "failed to write to transport");
                    break Some(Cause::TransportWrite);
                }
                stats.frames += 1;
                stats.bytes += data.len() as u64;
            }
            Some(PtyRead::Eof) | None => {
                debug!("PTY reached end-of-file");
                break Some(Cause::ShellExited);
            }
            Some(PtyRead::Failed(e)) => {
                let err = BridgeError::from(e);
                // EIO on the master is how Linux reports that the shell went away.
                if err.is_closed() {
                    debug!(error = %err, "PTY closed");
                    break Some(Cause::ShellExited);
                }
                warn!(error = %err, "failed to read from PTY");
                break Some(Cause::PtyRead);
            }
        }
    };
    drop(chunks);

    let reason = cause.map_or_else(|| "session closed".to_string(), |c| c.to_string());
    if let Err(e) = sink.close(&reason).await {
        debug!(error = %e, "close notification not delivered");
    }
    if let Some(cause) = cause {
        shutdown.trigger(cause);
    }
    stats
}

/// Decode inbound frames and apply them to the PTY.
async fn control_loop(
    mut source: Box<dyn FrameSource>,
    input: Box<dyn Write + Send>,
    shutdown: Arc<Shutdown>,
) -> ControlStats {
    let mut stats = ControlStats::default();
    let mut input = Some(input);

    let cause = loop {
        let frame = tokio::select! {
            frame = source.recv() => frame,
            _ = shutdown.closed() => break None,
        };
        let text = match frame {
            Ok(Some(Frame::Text(text))) => text,
            Ok(Some(other)) => {
                debug!(kind = other.kind(), len = other.len(), "ignoring non-text frame");
                stats.skipped += 1;
                continue;
            }
            Ok(None) => {
                info!("client disconnected");
                break Some(Cause::ClientClosed);
            }
            Err(e) => {
                warn!(error = %e, "transport read failed");
                break Some(Cause::TransportRead);
            }
        };

        let message = match ControlMessage::decode(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = text.len(), "discarding malformed control message");
                stats.skipped += 1;
                continue;
            }
        };
        debug!(kind = message.kind(), "control message");

        match message {
            ControlMessage::Input { data } => {
                let Some(writer) = input.take() else {
                    break Some(Cause::PtyWriteClosed);
                };
                let len = data.len() as u64;
                let (writer, result) = write_input(writer, data).await;
                input = writer;
                match result {
                    Ok(()) => {
                        stats.inputs += 1;
                        stats.bytes += len;
                    }
                    Err(e) if e.is_closed() => {
                        warn!(error = %e, "PTY input closed");
                        break Some(Cause::PtyWriteClosed);
                    }
                    Err(e) => warn!(error = %e, "failed to write to PTY"),
                }
            }
            ControlMessage::Resize { rows, cols } => {
                info!(rows, cols, "resizing PTY");
                match shutdown.resize(rows, cols) {
                    Ok(()) => stats.resizes += 1,
                    Err(e) => warn!(error = %e, rows, cols, "failed to resize PTY"),
                }
            }
            ControlMessage::Unknown { kind } => {
                warn!(kind = %kind, "unknown control message type");
                stats.skipped += 1;
            }
        }
    };
    drop(source);
    drop(input);

    if let Some(cause) = cause {
        shutdown.trigger(cause);
    }
    stats
}

/// Write one input message on the blocking pool and hand the writer back.
async fn write_input(
    mut writer: Box<dyn Write + Send>,
    data: Vec<u8>,
) -> (Option<Box<dyn Write + Send>>, BridgeResult<()>) {
    let joined = tokio::task::spawn_blocking(move || {
        let result = writer.write_all(&data).and_then(|()| writer.flush());
        (writer, result)
    })
    .await;
    match joined {
        Ok((writer, result)) => (Some(writer), result.map_err(BridgeError::from)),
        Err(e) => (
            None,
            Err(BridgeError::Closed(format!("PTY writer task failed: {e}"))),
        ),
    }
}
