//! Execution engine: request, outcome and result types.

use std::{any::Any, fmt, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::bridge::Interrupted;

pub mod args;

pub use args::{coerce, BoundArgs, ExecutionRequest, ValidationError};

pub type ExecutionId = u64;

/// Return value of a command, passed through untouched.
#[derive(Clone)]
pub enum Response {
    Value(Value),
    /// Anything that is not plain data: figures, tables, handles.
    Artifact(Artifact),
}

impl Response {
    pub fn none() -> Self {
        Response::Value(Value::Null)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Response::Value(value.into())
    }

    pub fn artifact<T: Any + Send + Sync>(artifact: T) -> Self {
        Response::Artifact(Artifact {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(artifact),
        })
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Response::Value(v) => Some(v),
            Response::Artifact(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Response::Artifact(a) => a.inner.downcast_ref::<T>(),
            Response::Value(_) => None,
        }
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        Response::Value(value)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Response::Artifact(a) => f.debug_tuple("Artifact").field(&a.type_name).finish(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Value(Value::String(s)) => f.write_str(s),
            Response::Value(v) => write!(f, "{}", v),
            Response::Artifact(a) => write!(f, "<{}>", a.type_name),
        }
    }
}

#[derive(Clone)]
pub struct Artifact {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Artifact {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// A named error a command can raise, e.g. `Raised::new("ValueError", "...")`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Raised {
    pub kind: String,
    pub message: String,
}

impl Raised {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Rejected before the command started.
    Validation,
    /// Raised by the command itself.
    Execution,
    /// Infrastructure: interpreter session messaging or worker plumbing.
    Protocol,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Validation => "validation error",
            ErrorClass::Execution => "execution error",
            ErrorClass::Protocol => "protocol error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub class: ErrorClass,
    pub kind: String,
    pub message: String,
    pub traceback: String,
}

impl Failure {
    pub fn validation(err: &ValidationError) -> Self {
        Self {
            class: ErrorClass::Validation,
            kind: "ValidationError".into(),
            message: err.to_string(),
            traceback: String::new(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Protocol,
            kind: "ProtocolError".into(),
            message: message.into(),
            traceback: String::new(),
        }
    }

    pub fn execution(
        kind: impl Into<String>,
        message: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Self {
        Self {
            class: ErrorClass::Execution,
            kind: kind.into(),
            message: message.into(),
            traceback: traceback.into(),
        }
    }

    /// Classifies an error returned by a native command.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let traceback = format!("{:?}", err);
        match err.downcast_ref::<Raised>() {
            Some(raised) => Self::execution(&raised.kind, &raised.message, traceback),
            None => Self::execution("Error", err.to_string(), traceback),
        }
    }

    pub fn panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "command panicked".to_string());
        Self::execution("Panic", message, String::new())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.class, self.message)
    }
}

/// Whether a command error came from cancellation rather than its own logic.
pub fn is_interruption(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Interrupted>())
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(Response),
    Failed(Failure),
    Cancelled,
}

/// Terminal result of one execution request.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub id: ExecutionId,
    pub command: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Outcome::Cancelled)
    }

    pub fn response(&self) -> Option<&Response> {
        match &self.outcome {
            Outcome::Completed(r) => Some(r),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Failed(f) => Some(f),
            _ => None,
        }
    }
}
