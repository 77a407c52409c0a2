//! In-memory PTY and transport doubles for session tests.

use super::pty::{PtyControl, PtyParts, ShellProcess};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use termbridge_core::{BoxFuture, BridgeError, BridgeResult, Frame, FrameSink, FrameSource};
use tokio::sync::mpsc;

/// Observation side of a [`FakePty`].
#[derive(Clone)]
pub struct PtyRecorder {
    shell_tx: Arc<Mutex<Option<std_mpsc::Sender<Vec<u8>>>>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    sizes: Arc<Mutex<Vec<(u16, u16)>>>,
    kills: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl PtyRecorder {
    /// Emit bytes as if the shell printed them. No-op once the shell is gone.
    pub fn emit(&self, data: &[u8]) {
        if let Some(tx) = self.shell_tx.lock().unwrap().as_ref() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// Simulate the shell exiting on its own: the output reaches end-of-file
    /// after everything emitted so far has been read.
    pub fn exit_shell(&self) {
        self.shell_tx.lock().unwrap().take();
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn sizes(&self) -> Vec<(u16, u16)> {
        self.sizes.lock().unwrap().clone()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn pty_releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Builder for fake PTY parts.
pub struct FakePty {
    resize_fails: bool,
    write_error: Option<io::ErrorKind>,
}

impl FakePty {
    pub fn open() -> (PtyParts, PtyRecorder) {
        FakePty {
            resize_fails: false,
            write_error: None,
        }
        .build()
    }

    pub fn failing_resize() -> (PtyParts, PtyRecorder) {
        FakePty {
            resize_fails: true,
            write_error: None,
        }
        .build()
    }

    pub fn failing_writes(kind: io::ErrorKind) -> (PtyParts, PtyRecorder) {
        FakePty {
            resize_fails: false,
            write_error: Some(kind),
        }
        .build()
    }

    fn build(self) -> (PtyParts, PtyRecorder) {
        let (output_tx, output_rx) = std_mpsc::channel();
        let shell_tx = Arc::new(Mutex::new(Some(output_tx)));
        let recorder = PtyRecorder {
            shell_tx: shell_tx.clone(),
            writes: Arc::default(),
            sizes: Arc::default(),
            kills: Arc::default(),
            releases: Arc::default(),
        };
        let parts = PtyParts {
            output: Box::new(FakeOutput {
                rx: output_rx,
                pending: Vec::new(),
            }),
            input: Box::new(FakeInput {
                writes: recorder.writes.clone(),
                error: self.write_error,
            }),
            control: Box::new(FakeControl {
                sizes: recorder.sizes.clone(),
                releases: recorder.releases.clone(),
                fails: self.resize_fails,
            }),
            process: Box::new(FakeProcess {
                kills: recorder.kills.clone(),
                shell_tx,
            }),
            shell: "fake-sh".into(),
        };
        (parts, recorder)
    }
}

struct FakeOutput {
    rx: std_mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for FakeOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct FakeInput {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    error: Option<io::ErrorKind>,
}

impl Write for FakeInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.error {
            return Err(io::Error::from(kind));
        }
        self.writes.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct FakeControl {
    sizes: Arc<Mutex<Vec<(u16, u16)>>>,
    releases: Arc<AtomicUsize>,
    fails: bool,
}

impl PtyControl for FakeControl {
    fn set_size(&self, rows: u16, cols: u16) -> BridgeResult<()> {
        if self.fails {
            return Err(BridgeError::Pty("resize rejected".into()));
        }
        self.sizes.lock().unwrap().push((rows, cols));
        Ok(())
    }
}

impl Drop for FakeControl {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeProcess {
    kills: Arc<AtomicUsize>,
    shell_tx: Arc<Mutex<Option<std_mpsc::Sender<Vec<u8>>>>>,
}

impl ShellProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn terminate(self: Box<Self>) -> BridgeResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.shell_tx.lock().unwrap().take();
        Ok(())
    }
}

/// Client side of a [`FakeSource`].
pub type ClientTx = mpsc::UnboundedSender<BridgeResult<Option<Frame>>>;

/// Inbound frames scripted by the test. Stays pending while the sender lives.
pub struct FakeSource {
    rx: mpsc::UnboundedReceiver<BridgeResult<Option<Frame>>>,
}

impl FakeSource {
    pub fn new() -> (Self, ClientTx) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }
}

impl FrameSource for FakeSource {
    fn recv(&mut self) -> BoxFuture<'_, BridgeResult<Option<Frame>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        })
    }
}

/// Observation side of a [`FakeSink`].
#[derive(Clone, Default)]
pub struct SinkRecorder {
    frames: Arc<Mutex<Vec<Frame>>>,
    closes: Arc<AtomicUsize>,
}

impl SinkRecorder {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Concatenation of every binary frame.
    pub fn binary_bytes(&self) -> Vec<u8> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Binary(b) => Some(b),
                Frame::Text(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Outbound frames recorded for inspection.
pub struct FakeSink {
    recorder: SinkRecorder,
    fail_writes: bool,
}

impl FakeSink {
    pub fn new() -> (Self, SinkRecorder) {
        let recorder = SinkRecorder::default();
        (
            Self {
                recorder: recorder.clone(),
                fail_writes: false,
            },
            recorder,
        )
    }

    pub fn failing() -> (Self, SinkRecorder) {
        let (mut sink, recorder) = Self::new();
        sink.fail_writes = true;
        (sink, recorder)
    }

    fn record(&self, frame: Frame) -> BridgeResult<()> {
        if self.fail_writes {
            return Err(BridgeError::Transport("peer gone".into()));
        }
        self.recorder.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

impl FrameSink for FakeSink {
    fn send_binary<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move { self.record(Frame::Binary(data.to_vec())) })
    }

    fn send_text<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move { self.record(Frame::Text(text.to_string())) })
    }

    fn close<'a>(&'a mut self, _reason: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
