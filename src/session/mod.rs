//! Interpreter sessions: a long-lived interpreter process driven over an
//! NDJSON request/reply channel.
//!
//! One reader task routes incoming messages by id to the call that owns it;
//! the call's console turns stream messages into ordered line events and the
//! terminal reply completes the call's oneshot.

use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::Child,
    sync::{mpsc, oneshot},
};
use tracing::{debug, warn};

use crate::{bridge::Console, execution::Failure};

pub mod process;
pub mod protocol;

pub use protocol::{MessageId, Reply, Request, Status, StreamName};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed session message: {0}")]
    Malformed(String),
    #[error("interpreter session closed")]
    Closed,
    #[error("failed to encode session message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("interpreter session I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to start interpreter `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// What a call resolves to: the `response` value, or a failure.
pub type CallResult = Result<Value, Failure>;

struct PendingCall {
    console: Console,
    done: oneshot::Sender<CallResult>,
}

type PendingMap = Arc<Mutex<HashMap<MessageId, PendingCall>>>;

pub struct InterpreterSession {
    name: String,
    outbound: mpsc::UnboundedSender<Request>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
}

impl InterpreterSession {
    /// Drives a session over any byte stream pair. Must be called from
    /// inside a tokio runtime.
    pub fn connect<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let (outbound, rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(
            name.clone(),
            writer,
            rx,
            pending.clone(),
            closed.clone(),
        ));
        tokio::spawn(read_loop(name.clone(), reader, pending.clone(), closed.clone()));

        Self {
            name,
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            child: Mutex::new(None),
        }
    }

    pub(crate) fn attach_child(&self, child: Child) {
        *self.child.lock() = Some(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends `code` for execution. Output is written to `console`; the
    /// returned receiver completes when the terminal reply arrives or the
    /// channel fails.
    pub fn execute(
        &self,
        code: String,
        console: Console,
    ) -> Result<(MessageId, oneshot::Receiver<CallResult>), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingCall { console, done });

        if self
            .outbound
            .send(Request::ExecuteRequest { id, code })
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(ProtocolError::Closed);
        }
        debug!(session = %self.name, id, "execute request queued");
        Ok((id, rx))
    }

    /// Asks the interpreter to raise an interruption inside call `id`.
    pub fn interrupt(&self, id: MessageId) -> Result<(), ProtocolError> {
        debug!(session = %self.name, id, "interrupt requested");
        self.outbound
            .send(Request::InterruptRequest { id })
            .map_err(|_| ProtocolError::Closed)
    }

    /// Kills the interpreter process, if this session started one.
    pub fn shutdown(&self) {
        if let Some(child) = self.child.lock().as_mut() {
            if let Err(err) = child.start_kill() {
                warn!(session = %self.name, error = %err, "failed to kill interpreter");
            }
        }
    }
}

impl Drop for InterpreterSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn write_loop<W>(
    name: String,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Request>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = rx.recv().await {
        let line = match protocol::encode(&request) {
            Ok(line) => line,
            Err(err) => {
                warn!(session = %name, error = %err, "dropping unencodable request");
                continue;
            }
        };
        let sent: Result<(), ProtocolError> = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            Ok(())
        }
        .await;
        if let Err(err) = sent {
            warn!(session = %name, error = %err, "session channel write failed");
            closed.store(true, Ordering::SeqCst);
            fail_all(&pending, &err.to_string());
            return;
        }
    }
}

async fn read_loop<R>(name: String, reader: R, pending: PendingMap, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    route(&name, &line, &pending);
                }
            }
            Ok(None) => {
                debug!(session = %name, "session channel reached end of stream");
                break ProtocolError::Closed;
            }
            Err(err) => {
                warn!(session = %name, error = %err, "session channel read failed");
                break ProtocolError::Io(err);
            }
        }
    };
    closed.store(true, Ordering::SeqCst);
    fail_all(&pending, &format!("{} before the terminal reply", reason));
}

fn route(name: &str, line: &str, pending: &PendingMap) {
    match protocol::decode(line) {
        Ok(Reply::Stream { id, name: stream, text }) => {
            let mut calls = pending.lock();
            match calls.get_mut(&id) {
                Some(call) => match stream {
                    StreamName::Stdout => call.console.write_stdout(&text),
                    StreamName::Stderr => call.console.write_stderr(&text),
                },
                None => warn!(session = %name, id, "stream message for unknown request"),
            }
        }
        Ok(Reply::ExecuteReply {
            id,
            status,
            value,
            ename,
            evalue,
            traceback,
        }) => {
            let result = match status {
                Status::Ok => Ok(value),
                Status::Error => Err(Failure::execution(
                    ename.unwrap_or_else(|| "Error".into()),
                    evalue.unwrap_or_default(),
                    traceback.concat(),
                )),
            };
            complete(name, pending, id, result);
        }
        Err((err, Some(id))) => {
            complete(name, pending, id, Err(Failure::protocol(err.to_string())));
        }
        Err((err, None)) => {
            warn!(session = %name, error = %err, "ignoring unroutable session message");
        }
    }
}

fn complete(name: &str, pending: &PendingMap, id: MessageId, result: CallResult) {
    let Some(call) = pending.lock().remove(&id) else {
        warn!(session = %name, id, "terminal reply for unknown request");
        return;
    };
    debug!(session = %name, id, ok = result.is_ok(), "terminal reply");
    // Release flushes partial lines before the result is observable.
    call.console.release();
    let _ = call.done.send(result);
}

fn fail_all(pending: &PendingMap, reason: &str) {
    let calls: Vec<PendingCall> = pending.lock().drain().map(|(_, call)| call).collect();
    for call in calls {
        call.console.release();
        let _ = call.done.send(Err(Failure::protocol(reason)));
    }
}
