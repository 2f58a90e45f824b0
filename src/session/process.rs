//! Interpreter process startup.

use std::process::Stdio;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
};
use tracing::{info, warn};

use super::{InterpreterSession, ProtocolError};

/// The NDJSON kernel loop run inside the interpreter.
pub const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// Starts `program -u -c BOOTSTRAP` and connects a session to its pipes.
/// The interpreter's own stderr (crashes, warnings at import time) is
/// forwarded to the log.
pub async fn start(program: &str) -> Result<InterpreterSession, ProtocolError> {
    let spawn_err = |source: std::io::Error| ProtocolError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut cmd = Command::new(program);
    cmd.arg("-u") // unbuffered
        .arg("-c")
        .arg(BOOTSTRAP)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(spawn_err)?;
    let missing = |pipe: &str| {
        spawn_err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("no {pipe}"),
        ))
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(program.to_string(), stderr));
    }

    info!(program, pid = child.id(), "interpreter started");
    let session = InterpreterSession::connect(program, stdout, stdin);
    session.attach_child(child);
    Ok(session)
}

async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(interpreter = %program, "{}", line);
    }
}
