#![cfg(unix)]

use std::{
    io::{BufRead, BufReader},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Result};

fn gui_executor(args: &[&str]) -> Result<Child> {
    Ok(Command::new(env!("CARGO_BIN_EXE_gui-executor"))
        .args(args)
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?)
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<Option<i32>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code());
        }
        if Instant::now() >= deadline {
            child.kill()?;
            bail!("process still running {:?} after the interrupt", limit);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn interrupt_at_a_prompt_exits_without_waiting_for_input() -> Result<()> {
    let mut child = gui_executor(&[
        "--run",
        "output_in_several_steps",
        "--arg",
        "sleep=0",
        "--json",
    ])?;
    // Held open and never written, so the prompt read stays pending.
    let _stdin = child.stdin.take();
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = lines
            .next()
            .ok_or_else(|| anyhow!("exited before prompting"))??;
        if line.contains("\"prompt\"") && line.contains("Continue?") {
            break;
        }
    }
    thread::sleep(Duration::from_millis(200));

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()?;
    assert!(status.success());

    assert_eq!(wait_with_deadline(&mut child, Duration::from_secs(5))?, Some(130));
    Ok(())
}

#[test]
fn closed_stdin_at_a_prompt_cancels() -> Result<()> {
    let mut child = gui_executor(&[
        "--run",
        "output_in_several_steps",
        "--arg",
        "sleep=0",
    ])?;
    drop(child.stdin.take());

    assert_eq!(wait_with_deadline(&mut child, Duration::from_secs(10))?, Some(130));
    Ok(())
}
