//! Interpreter-session backend.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::{Backend, Job};
use crate::{
    command::{Body, ExecMode},
    execution::{BoundArgs, ErrorClass, Failure, Outcome, Response},
    session::InterpreterSession,
};

const CANCEL_POLL: Duration = Duration::from_millis(50);

pub struct KernelBackend {
    session: Option<Arc<InterpreterSession>>,
    runtime: Option<Handle>,
}

impl KernelBackend {
    pub fn new(session: Option<Arc<InterpreterSession>>, runtime: Option<Handle>) -> Self {
        Self { session, runtime }
    }
}

impl Backend for KernelBackend {
    fn mode(&self) -> ExecMode {
        ExecMode::InterpreterSession
    }

    fn launch(&self, job: Job) {
        let Job {
            id,
            descriptor,
            args,
            bridge,
            finisher,
        } = job;

        let fail = |message: String| Outcome::Failed(Failure::protocol(message));
        let (Some(session), Some(runtime)) = (self.session.clone(), self.runtime.clone()) else {
            finisher.finish(fail(format!(
                "{} needs an interpreter session, none is running",
                descriptor.qualified_name()
            )));
            return;
        };
        let Body::Remote(source) = descriptor.body() else {
            finisher.finish(fail(format!(
                "{} has no interpreter source",
                descriptor.qualified_name()
            )));
            return;
        };
        let console = match bridge.acquire() {
            Ok(console) => console,
            Err(err) => {
                finisher.finish(fail(err.to_string()));
                return;
            }
        };

        let code = render_call(source, descriptor.name(), &args);
        let (msg_id, mut rx) = match session.execute(code, console) {
            Ok(sent) => sent,
            Err(err) => {
                finisher.finish(fail(err.to_string()));
                return;
            }
        };
        debug!(id, msg_id, session = %session.name(), "sent to interpreter");

        let cancel = bridge.reply_handle();
        runtime.spawn(async move {
            let mut interrupted = false;
            let mut tick = tokio::time::interval(CANCEL_POLL);
            let reply = loop {
                tokio::select! {
                    reply = &mut rx => break reply,
                    _ = tick.tick(), if !interrupted => {
                        if cancel.is_cancelled() {
                            interrupted = true;
                            if let Err(err) = session.interrupt(msg_id) {
                                warn!(id, error = %err, "failed to interrupt interpreter");
                            }
                        }
                    }
                }
            };

            let outcome = match reply {
                Ok(Ok(value)) => Outcome::Completed(Response::Value(value)),
                Ok(Err(failure)) if interrupted && failure.class == ErrorClass::Execution => {
                    Outcome::Cancelled
                }
                Ok(Err(failure)) => Outcome::Failed(failure),
                Err(_) => Outcome::Failed(Failure::protocol("interpreter session dropped the call")),
            };
            finisher.finish(outcome);
        });
    }
}

/// Builds the snippet run by the interpreter: the function source followed
/// by a keyword call whose value lands in `response`.
pub fn render_call(source: &str, name: &str, args: &BoundArgs) -> String {
    let kwargs = args
        .iter()
        .map(|(key, value)| format!("{}={}", key, python_literal(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}\n\nresponse = {}({})\n", source.trim_end(), name, kwargs)
}

fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        // JSON string escapes are valid Python string escapes.
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), python_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literals_use_python_spelling() {
        assert_eq!(python_literal(&json!(null)), "None");
        assert_eq!(python_literal(&json!(true)), "True");
        assert_eq!(python_literal(&json!([1, 2.5, "x"])), r#"[1, 2.5, "x"]"#);
        assert_eq!(python_literal(&json!("say \"hi\"\n")), r#""say \"hi\"\n""#);
        assert_eq!(python_literal(&json!({"k": false})), r#"{"k": False}"#);
    }
}
