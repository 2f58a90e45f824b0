//! I/O bridge between a running command and the presentation layer.
//!
//! A [`Bridge`] is created per execution. The command gets the single
//! [`Console`] for the duration of the call (acquire/release), the
//! presentation layer gets the ordered [`EventStream`] and a [`ReplyHandle`]
//! for answering prompts and cancelling.

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

mod lines;

use lines::LineBuffer;

pub type PromptId = u64;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Stdout { line: String },
    Stderr { line: String },
    Prompt {
        id: PromptId,
        caption: String,
        expects_reply: bool,
    },
}

impl OutputEvent {
    /// The text of a stdout/stderr line, `None` for prompts.
    pub fn line(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Stdout { line } | EventKind::Stderr { line } => Some(line),
            EventKind::Prompt { .. } => None,
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self.kind, EventKind::Stdout { .. })
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self.kind, EventKind::Stderr { .. })
    }

    pub fn prompt(&self) -> Option<(PromptId, &str)> {
        match &self.kind {
            EventKind::Prompt { id, caption, .. } => Some((*id, caption)),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("console is already held by a running execution")]
    Busy,
    #[error("no prompt is waiting for a reply")]
    NoPendingPrompt,
    #[error("prompt {given} is not waiting for a reply (pending: {pending})")]
    PromptMismatch { given: PromptId, pending: PromptId },
}

/// Raised inside a command when its execution was cancelled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("execution was interrupted")]
pub struct Interrupted;

struct PendingPrompt {
    id: PromptId,
    reply: oneshot::Sender<String>,
}

struct Shared {
    seq: AtomicU64,
    next_prompt: AtomicU64,
    held: AtomicBool,
    cancelled: AtomicBool,
    desk: Mutex<Option<PendingPrompt>>,
}

impl Shared {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Dropping the sender wakes a worker blocked in `Console::input`.
        if let Some(pending) = self.desk.lock().take() {
            debug!(prompt = pending.id, "prompt abandoned by cancellation");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owner of one execution's console channel.
pub struct Bridge {
    tx: mpsc::UnboundedSender<OutputEvent>,
    shared: Arc<Shared>,
}

impl Bridge {
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            seq: AtomicU64::new(0),
            next_prompt: AtomicU64::new(1),
            held: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            desk: Mutex::new(None),
        });
        (Self { tx, shared }, EventStream { rx })
    }

    /// Hands out the console. Fails while another console from this bridge
    /// is still held.
    pub fn acquire(&self) -> Result<Console, BridgeError> {
        if self.shared.held.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Busy);
        }
        Ok(Console {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            released: false,
        })
    }

    pub fn reply_handle(&self) -> ReplyHandle {
        ReplyHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.shared.held.load(Ordering::SeqCst)
    }
}

/// The console capability handed to a running command.
///
/// Writes become ordered stdout/stderr line events; `input` turns into a
/// prompt event and blocks until the matching reply arrives. Releasing (or
/// dropping) the console flushes partial lines and abandons any pending
/// prompt, on every exit path.
pub struct Console {
    tx: mpsc::UnboundedSender<OutputEvent>,
    shared: Arc<Shared>,
    stdout: LineBuffer,
    stderr: LineBuffer,
    released: bool,
}

impl Console {
    /// Writes `text` followed by a newline to stdout.
    pub fn print(&mut self, text: impl AsRef<str>) {
        let mut line = text.as_ref().to_owned();
        line.push('\n');
        self.write_stdout(&line);
    }

    pub fn eprint(&mut self, text: impl AsRef<str>) {
        let mut line = text.as_ref().to_owned();
        line.push('\n');
        self.write_stderr(&line);
    }

    pub fn write_stdout(&mut self, text: &str) {
        self.write_bytes(Channel::Stdout, text.as_bytes());
    }

    pub fn write_stderr(&mut self, text: &str) {
        self.write_bytes(Channel::Stderr, text.as_bytes());
    }

    /// `io::Write` view of stdout, for `write!`/`writeln!`.
    pub fn stdout(&mut self) -> ConsoleWriter<'_> {
        ConsoleWriter {
            console: self,
            channel: Channel::Stdout,
        }
    }

    pub fn stderr(&mut self) -> ConsoleWriter<'_> {
        ConsoleWriter {
            console: self,
            channel: Channel::Stderr,
        }
    }

    /// Emits unterminated output as lines.
    pub fn flush(&mut self) {
        if let Some(line) = self.stdout.take_partial() {
            self.emit(EventKind::Stdout { line });
        }
        if let Some(line) = self.stderr.take_partial() {
            self.emit(EventKind::Stderr { line });
        }
    }

    /// Asks the operator for a line of text and blocks until it arrives.
    ///
    /// Must be called from a plain worker thread, never from inside an async
    /// task. There is no timeout: only a reply or cancellation unblocks it.
    pub fn input(&mut self, caption: &str) -> Result<String, Interrupted> {
        self.flush();
        self.checkpoint()?;

        let id = self.shared.next_prompt.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        *self.shared.desk.lock() = Some(PendingPrompt {
            id,
            reply: reply_tx,
        });
        // A cancel racing with the desk update must still win.
        if self.shared.is_cancelled() {
            self.shared.desk.lock().take();
            return Err(Interrupted);
        }

        self.emit(EventKind::Prompt {
            id,
            caption: caption.to_string(),
            expects_reply: true,
        });

        match reply_rx.blocking_recv() {
            Ok(text) => Ok(text.trim_end_matches(['\r', '\n']).to_string()),
            Err(_) => Err(Interrupted),
        }
    }

    /// Sleeps, waking early with `Interrupted` if the execution is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.shared.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Gives the console back to its bridge.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.flush();
        self.shared.desk.lock().take();
        self.shared.held.store(false, Ordering::SeqCst);
    }

    fn write_bytes(&mut self, channel: Channel, bytes: &[u8]) {
        let lines = match channel {
            Channel::Stdout => self.stdout.push(bytes),
            Channel::Stderr => self.stderr.push(bytes),
        };
        for line in lines {
            let kind = match channel {
                Channel::Stdout => EventKind::Stdout { line },
                Channel::Stderr => EventKind::Stderr { line },
            };
            self.emit(kind);
        }
    }

    fn emit(&self, kind: EventKind) {
        let event = OutputEvent {
            seq: self.shared.seq.fetch_add(1, Ordering::SeqCst),
            at: Utc::now(),
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!("event stream closed, dropping console output");
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

pub struct ConsoleWriter<'a> {
    console: &'a mut Console,
    channel: Channel,
}

impl io::Write for ConsoleWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_bytes(self.channel, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Line events go out as soon as a newline is seen; partial lines stay
        // buffered until release so a prompt on the same line keeps its text.
        Ok(())
    }
}

/// Presentation-side handle: answer prompts, cancel the execution.
#[derive(Clone)]
pub struct ReplyHandle {
    shared: Arc<Shared>,
}

impl ReplyHandle {
    /// Delivers `text` to the worker waiting on prompt `id`.
    pub fn reply(&self, id: PromptId, text: impl Into<String>) -> Result<(), BridgeError> {
        let pending = {
            let mut desk = self.shared.desk.lock();
            let pending_id = desk
                .as_ref()
                .map(|p| p.id)
                .ok_or(BridgeError::NoPendingPrompt)?;
            if pending_id != id {
                return Err(BridgeError::PromptMismatch {
                    given: id,
                    pending: pending_id,
                });
            }
            desk.take().ok_or(BridgeError::NoPendingPrompt)?
        };
        pending
            .reply
            .send(text.into())
            .map_err(|_| BridgeError::NoPendingPrompt)
    }

    pub fn pending_prompt(&self) -> Option<PromptId> {
        self.shared.desk.lock().as_ref().map(|p| p.id)
    }

    /// Sets the cancellation flag and abandons any pending prompt.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

/// Ordered events of one execution. Ends when the console and bridge are gone.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<OutputEvent>,
}

impl EventStream {
    /// Non-blocking: the next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<OutputEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn next_event(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }

    /// Everything currently queued.
    pub fn drain(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = OutputEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
