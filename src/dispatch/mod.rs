//! Execution dispatcher: per-slot state machine and backend selection.
//!
//! A [`Slot`] runs one execution at a time. `submit` validates the request,
//! picks the backend for the command's mode and returns an [`Execution`]
//! handle carrying the event stream, the reply handle and the final result.

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, info, warn};

use crate::{
    bridge::{Bridge, BridgeError, EventStream, OutputEvent, PromptId, ReplyHandle},
    command::{ExecMode, SharedDescriptor},
    execution::{
        BoundArgs, ExecutionId, ExecutionRequest, ExecutionResult, Failure, Outcome,
    },
    session::InterpreterSession,
};

pub mod kernel;
pub mod worker;

pub use kernel::{render_call, KernelBackend};
pub use worker::ThreadBackend;

/// Process-wide state of the graphical toolkit. Calls in graphical-subapp
/// mode hold this lock for their whole duration.
pub type SharedToolkit = Arc<Mutex<Box<dyn Any + Send>>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("slot `{0}` is already running a command")]
    SlotBusy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Idle,
    Validating,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Idle => "idle",
            SlotState::Validating => "validating",
            SlotState::Running => "running",
            SlotState::Completed => "completed",
            SlotState::Failed => "failed",
            SlotState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One execution handed to a backend. The backend must eventually call
/// [`Finisher::finish`]; a dropped finisher reports a protocol failure.
pub struct Job {
    pub id: ExecutionId,
    pub descriptor: SharedDescriptor,
    pub args: BoundArgs,
    pub bridge: Bridge,
    pub finisher: Finisher,
}

pub trait Backend: Send + Sync {
    fn mode(&self) -> ExecMode;

    /// Starts the job and returns without waiting for it.
    fn launch(&self, job: Job);
}

/// Completes an execution: records the terminal state, returns the slot to
/// idle and only then delivers the result.
pub struct Finisher {
    id: ExecutionId,
    slot: String,
    command: String,
    started: Instant,
    state: Arc<Mutex<SlotState>>,
    tx: Option<oneshot::Sender<ExecutionResult>>,
}

impl Finisher {
    pub fn finish(mut self, outcome: Outcome) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: Outcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let terminal = match &outcome {
            Outcome::Completed(_) => SlotState::Completed,
            Outcome::Failed(_) => SlotState::Failed,
            Outcome::Cancelled => SlotState::Cancelled,
        };
        {
            let mut state = self.state.lock();
            *state = terminal;
            debug!(slot = %self.slot, id = self.id, state = %terminal, "slot transition");
            *state = SlotState::Idle;
        }

        let result = ExecutionResult {
            id: self.id,
            command: std::mem::take(&mut self.command),
            outcome,
            elapsed: self.started.elapsed(),
        };
        match &result.outcome {
            Outcome::Failed(failure) => warn!(
                slot = %self.slot,
                id = self.id,
                command = %result.command,
                class = %failure.class,
                "{}",
                failure.message
            ),
            _ => info!(
                slot = %self.slot,
                id = self.id,
                command = %result.command,
                state = %terminal,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "execution finished"
            ),
        }
        if tx.send(result).is_err() {
            debug!(slot = %self.slot, id = self.id, "result receiver dropped");
        }
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.complete(Outcome::Failed(Failure::protocol(
                "execution was abandoned by its backend",
            )));
        }
    }
}

struct Backends {
    in_process: Arc<dyn Backend>,
    graphical: Arc<dyn Backend>,
    kernel: Arc<dyn Backend>,
}

impl Backends {
    fn for_mode(&self, mode: ExecMode) -> Arc<dyn Backend> {
        match mode {
            ExecMode::InProcess => self.in_process.clone(),
            ExecMode::GraphicalSubapp => self.graphical.clone(),
            ExecMode::InterpreterSession => self.kernel.clone(),
        }
    }
}

/// Creates slots sharing one toolkit context and one interpreter session.
pub struct Dispatcher {
    toolkit: SharedToolkit,
    session: Option<Arc<InterpreterSession>>,
    backends: Arc<Backends>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_toolkit(())
    }

    pub fn with_toolkit<T: Any + Send>(toolkit: T) -> Self {
        let boxed: Box<dyn Any + Send> = Box::new(toolkit);
        Self::build(Arc::new(Mutex::new(boxed)), None)
    }

    /// Routes interpreter-session commands to `session`. Must be called
    /// from inside a tokio runtime.
    pub fn with_session(self, session: Arc<InterpreterSession>) -> Self {
        Self::build(self.toolkit, Some(session))
    }

    fn build(toolkit: SharedToolkit, session: Option<Arc<InterpreterSession>>) -> Self {
        let backends = Backends {
            in_process: Arc::new(ThreadBackend::in_process()),
            graphical: Arc::new(ThreadBackend::graphical(toolkit.clone())),
            kernel: Arc::new(KernelBackend::new(session.clone(), Handle::try_current().ok())),
        };
        Self {
            toolkit,
            session,
            backends: Arc::new(backends),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn toolkit(&self) -> SharedToolkit {
        self.toolkit.clone()
    }

    pub fn session(&self) -> Option<&Arc<InterpreterSession>> {
        self.session.as_ref()
    }

    pub fn slot(&self, name: impl Into<String>) -> Slot {
        Slot {
            name: name.into(),
            state: Arc::new(Mutex::new(SlotState::Idle)),
            backends: self.backends.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs at most one execution at a time.
pub struct Slot {
    name: String,
    state: Arc<Mutex<SlotState>>,
    backends: Arc<Backends>,
    next_id: Arc<AtomicU64>,
}

impl Slot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SlotState {
        *self.state.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SlotState::Idle
    }

    /// Accepts `request` if the slot is idle. A request that fails
    /// validation is accepted and completes at once as a validation failure,
    /// without the command ever being invoked.
    pub fn submit(&self, request: ExecutionRequest) -> Result<Execution, DispatchError> {
        {
            let mut state = self.state.lock();
            if *state != SlotState::Idle {
                debug!(slot = %self.name, state = %*state, "submit rejected");
                return Err(DispatchError::SlotBusy(self.name.clone()));
            }
            *state = SlotState::Validating;
        }

        let descriptor = request.descriptor().clone();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (bridge, events) = Bridge::new();
        let reply = bridge.reply_handle();
        let (tx, rx) = oneshot::channel();
        let finisher = Finisher {
            id,
            slot: self.name.clone(),
            command: descriptor.qualified_name().to_string(),
            started: Instant::now(),
            state: self.state.clone(),
            tx: Some(tx),
        };
        debug!(slot = %self.name, id, command = %descriptor.qualified_name(), "validating");

        let execution = Execution {
            id,
            command: descriptor.qualified_name().to_string(),
            events,
            reply,
            result: rx,
        };

        let args = match request.validate() {
            Ok(args) => args,
            Err(err) => {
                finisher.finish(Outcome::Failed(Failure::validation(&err)));
                return Ok(execution);
            }
        };

        *self.state.lock() = SlotState::Running;
        let backend = self.backends.for_mode(descriptor.mode());
        debug!(slot = %self.name, id, mode = %backend.mode(), "running");
        backend.launch(Job {
            id,
            descriptor,
            args,
            bridge,
            finisher,
        });
        Ok(execution)
    }
}

/// Handle to one submitted execution.
pub struct Execution {
    id: ExecutionId,
    command: String,
    events: EventStream,
    reply: ReplyHandle,
    result: oneshot::Receiver<ExecutionResult>,
}

impl Execution {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    pub fn reply_handle(&self) -> ReplyHandle {
        self.reply.clone()
    }

    pub fn reply(&self, prompt: PromptId, text: impl Into<String>) -> Result<(), BridgeError> {
        self.reply.reply(prompt, text)
    }

    pub fn cancel(&self) {
        debug!(id = self.id, "cancel requested");
        self.reply.cancel();
    }

    /// The result, if the execution has already finished.
    pub fn try_result(&mut self) -> Option<ExecutionResult> {
        self.result.try_recv().ok()
    }

    pub async fn wait(self) -> ExecutionResult {
        let (id, command) = (self.id, self.command.clone());
        let (_, _, result) = self.into_parts();
        result_or_lost(id, command, result.await)
    }

    /// Waits for the result and collects every event of the execution.
    /// Prompts are not answered; use [`Execution::into_parts`] for that.
    pub async fn wait_with_output(self) -> (ExecutionResult, Vec<OutputEvent>) {
        let (id, command) = (self.id, self.command.clone());
        let (mut events, _, result) = self.into_parts();
        let result = result_or_lost(id, command, result.await);
        // The console is released before the result is sent, so every event
        // is already queued.
        (result, events.drain())
    }

    pub fn into_parts(
        self,
    ) -> (
        EventStream,
        ReplyHandle,
        oneshot::Receiver<ExecutionResult>,
    ) {
        (self.events, self.reply, self.result)
    }
}

fn result_or_lost(
    id: ExecutionId,
    command: String,
    result: Result<ExecutionResult, oneshot::error::RecvError>,
) -> ExecutionResult {
    result.unwrap_or_else(|_| ExecutionResult {
        id,
        command,
        outcome: Outcome::Failed(Failure::protocol("execution result was lost")),
        elapsed: Default::default(),
    })
}
