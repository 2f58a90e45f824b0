use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::time::timeout;

use gui_executor::{
    bridge::{EventStream, OutputEvent, PromptId},
    builtin::{self, Figures, PlotTableText},
    command::{DeclaredParam, ExecUi, FunctionDef, Module, ModuleTree, SharedDescriptor},
    dispatch::{DispatchError, Dispatcher, SlotState},
    execution::{ErrorClass, ExecutionRequest, Outcome, Raised, Response},
    registry::Registry,
};

const LIMIT: Duration = Duration::from_secs(10);

fn lookup(tree: &ModuleTree, root: &str, name: &str) -> Result<SharedDescriptor> {
    let report = Registry::new().scan(tree, root);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    report
        .catalog
        .find(name)
        .cloned()
        .ok_or_else(|| anyhow!("command {} not registered", name))
}

fn demo(name: &str) -> Result<SharedDescriptor> {
    lookup(&builtin::tree(), builtin::ROOT, name)
}

fn stdout_lines(events: &[OutputEvent]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.is_stdout())
        .filter_map(|e| e.line())
        .collect()
}

/// Reads events until the next prompt; returns the events seen, prompt last.
async fn until_prompt(events: &mut EventStream) -> Result<(Vec<OutputEvent>, PromptId)> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(LIMIT, events.next_event())
            .await?
            .ok_or_else(|| anyhow!("event stream ended before a prompt"))?;
        let prompt = event.prompt().map(|(id, _)| id);
        seen.push(event);
        if let Some(id) = prompt {
            return Ok((seen, id));
        }
    }
}

#[tokio::test]
async fn concatenate_args_joins_strings() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let request = ExecutionRequest::new(demo("concatenate_args")?)
        .arg("arg1", "a")
        .arg("arg2", "b");

    let (result, events) = timeout(LIMIT, slot.submit(request)?.wait_with_output()).await?;

    assert_eq!(result.command, "demo.arguments.concatenate_args");
    assert_eq!(
        result.response().and_then(|r| r.as_value()),
        Some(&json!("ab"))
    );
    assert_eq!(
        stdout_lines(&events),
        vec![r#"concatenate_args(arg1="a", arg2="b")"#]
    );
    assert!(slot.is_idle());
    Ok(())
}

#[tokio::test]
async fn func_with_args_coerces_numbers() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let request = ExecutionRequest::new(demo("func_with_args")?)
        .arg("x", "3")
        .arg("y", "2.5");

    let result = timeout(LIMIT, slot.submit(request)?.wait()).await?;

    let value = result
        .response()
        .and_then(|r| r.as_value())
        .cloned()
        .ok_or_else(|| anyhow!("no value in {:?}", result.outcome))?;
    assert_eq!(value, json!([3, 2.5]));
    assert!(value[0].is_i64());
    assert!(value[1].is_f64());
    Ok(())
}

#[tokio::test]
async fn raise_after_output_keeps_the_output() -> Result<()> {
    let tree = ModuleTree::new().with(
        Module::new("t").function(
            FunctionDef::native("two_lines_then_raise", |ctx| {
                ctx.console.print("first");
                ctx.console.print("second");
                Err(Raised::new("ValueError", "bad input").into())
            })
            .exec_ui(ExecUi::new()),
        ),
    );
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let request = ExecutionRequest::new(lookup(&tree, "t", "two_lines_then_raise")?);

    let (result, events) = timeout(LIMIT, slot.submit(request)?.wait_with_output()).await?;

    let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
    assert_eq!(failure.class, ErrorClass::Execution);
    assert_eq!(failure.kind, "ValueError");
    assert_eq!(failure.message, "bad input");
    assert_eq!(stdout_lines(&events), vec!["first", "second"]);
    assert_eq!(events.len(), 2);
    assert!(slot.is_idle());
    Ok(())
}

#[tokio::test]
async fn validation_failure_never_calls_the_command() -> Result<()> {
    let touched = Arc::new(AtomicBool::new(false));
    let flag = touched.clone();
    let tree = ModuleTree::new().with(
        Module::new("t").function(
            FunctionDef::native("typed", move |ctx| {
                flag.store(true, Ordering::SeqCst);
                ctx.console.print("side effect");
                Ok(Response::none())
            })
            .param(DeclaredParam::typed("n", "int"))
            .param(DeclaredParam::typed("label", "str"))
            .exec_ui(ExecUi::new()),
        ),
    );
    let descriptor = lookup(&tree, "t", "typed")?;
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");

    // Missing `label`.
    let (missing, events) = slot
        .submit(ExecutionRequest::new(descriptor.clone()).arg("n", 1))?
        .wait_with_output()
        .await;
    // Unparsable `n`.
    let (invalid, _) = slot
        .submit(
            ExecutionRequest::new(descriptor)
                .arg("n", "three")
                .arg("label", "x"),
        )?
        .wait_with_output()
        .await;

    for result in [&missing, &invalid] {
        let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
        assert_eq!(failure.class, ErrorClass::Validation);
    }
    assert!(events.is_empty());
    assert!(!touched.load(Ordering::SeqCst));
    assert_eq!(slot.state(), SlotState::Idle);
    Ok(())
}

#[tokio::test]
async fn abort_on_second_prompt_fails_without_further_events() -> Result<()> {
    let tree = ModuleTree::new().with(
        Module::new("t").function(
            FunctionDef::native("three_questions", |ctx| {
                for caption in ["first? ", "second? ", "third? "] {
                    let answer = ctx.console.input(caption)?;
                    if answer == "n" {
                        return Err(Raised::runtime("Function was aborted!").into());
                    }
                    ctx.console.print(format!("answered {}", answer));
                }
                ctx.console.print("all done");
                Ok(Response::none())
            })
            .exec_ui(ExecUi::new().input_request(["first? ", "second? ", "third? "])),
        ),
    );
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let execution = slot.submit(ExecutionRequest::new(lookup(&tree, "t", "three_questions")?))?;
    let (mut events, replies, result) = execution.into_parts();

    let (_, first) = until_prompt(&mut events).await?;
    replies.reply(first, "y")?;
    let (seen, second) = until_prompt(&mut events).await?;
    assert_eq!(stdout_lines(&seen), vec!["answered y"]);
    replies.reply(second, "n")?;

    let result = timeout(LIMIT, result).await??;
    let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
    assert_eq!(failure.class, ErrorClass::Execution);
    assert_eq!(failure.message, "Function was aborted!");
    assert!(events.drain().is_empty());
    assert!(slot.is_idle());
    Ok(())
}

#[tokio::test]
async fn busy_slot_rejects_and_other_slots_run() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let busy = dispatcher.slot("busy");
    let other = dispatcher.slot("other");
    let asks = demo("output_in_several_steps")?;

    let first = busy.submit(
        ExecutionRequest::new(asks.clone())
            .arg("n_steps", 5)
            .arg("sleep", 0.0),
    )?;
    assert_eq!(busy.state(), SlotState::Running);

    let second = busy.submit(ExecutionRequest::new(asks));
    assert!(matches!(second, Err(DispatchError::SlotBusy(ref name)) if name == "busy"));

    let quick = other.submit(
        ExecutionRequest::new(demo("compare_args")?)
            .arg("arg1", 1)
            .arg("arg2", 1),
    )?;
    let quick = timeout(LIMIT, quick.wait()).await?;
    assert_eq!(quick.response().and_then(|r| r.as_value()), Some(&Value::Bool(true)));

    first.cancel();
    let first = timeout(LIMIT, first.wait()).await?;
    assert!(first.is_cancelled());
    assert!(busy.is_idle());
    Ok(())
}

#[tokio::test]
async fn cancel_interrupts_a_sleeping_command() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let mut execution = slot.submit(ExecutionRequest::new(demo("long_duration_func")?))?;

    let first = timeout(LIMIT, execution.events().next_event())
        .await?
        .ok_or_else(|| anyhow!("no output"))?;
    assert_eq!(first.line(), Some("Sleeping for 10s.."));

    execution.cancel();
    let result = timeout(Duration::from_secs(2), execution.wait()).await?;
    assert!(matches!(result.outcome, Outcome::Cancelled));
    assert!(result.elapsed < Duration::from_secs(10));
    assert!(slot.is_idle());
    Ok(())
}

#[tokio::test]
async fn reply_unblocks_only_its_own_worker() -> Result<()> {
    let tree = ModuleTree::new().with(
        Module::new("t").function(
            FunctionDef::native("echo", |ctx| {
                let answer = ctx.console.input("say? ")?;
                Ok(Response::value(answer))
            })
            .exec_ui(ExecUi::new()),
        ),
    );
    let echo = lookup(&tree, "t", "echo")?;
    let dispatcher = Dispatcher::new();
    let (a, b) = (dispatcher.slot("a"), dispatcher.slot("b"));

    let mut run_a = a.submit(ExecutionRequest::new(echo.clone()))?;
    let mut run_b = b.submit(ExecutionRequest::new(echo))?;
    let (_, prompt_a) = until_prompt(run_a.events()).await?;
    let (_, prompt_b) = until_prompt(run_b.events()).await?;

    run_a.reply(prompt_a, "from a\n")?;
    let result_a = timeout(LIMIT, run_a.wait()).await?;
    assert_eq!(result_a.response().and_then(|r| r.as_value()), Some(&json!("from a")));

    assert!(run_b.try_result().is_none());
    assert_eq!(b.state(), SlotState::Running);

    run_b.reply(prompt_b, "from b")?;
    let result_b = timeout(LIMIT, run_b.wait()).await?;
    assert_eq!(result_b.response().and_then(|r| r.as_value()), Some(&json!("from b")));
    Ok(())
}

#[derive(Debug, Default)]
struct Probe {
    active: usize,
    max_active: usize,
    calls: usize,
}

#[tokio::test]
async fn graphical_commands_are_serialized() -> Result<()> {
    let tree = ModuleTree::new().with(
        Module::new("t")
            .function(
                FunctionDef::native("draw", |ctx| {
                    {
                        let probe = ctx
                            .toolkit::<Probe>()
                            .ok_or_else(|| anyhow!("no toolkit"))?;
                        probe.active += 1;
                        probe.calls += 1;
                        probe.max_active = probe.max_active.max(probe.active);
                    }
                    ctx.console.sleep(Duration::from_millis(100))?;
                    if let Some(probe) = ctx.toolkit::<Probe>() {
                        probe.active -= 1;
                    }
                    Ok(Response::none())
                })
                .exec_ui(ExecUi::new().use_gui_app()),
            )
            .function(
                FunctionDef::native("plain", |ctx| Ok(Response::value(ctx.has_toolkit())))
                    .exec_ui(ExecUi::new()),
            ),
    );
    let draw = lookup(&tree, "t", "draw")?;
    let dispatcher = Dispatcher::with_toolkit(Probe::default());
    let slots: Vec<_> = (0..3).map(|i| dispatcher.slot(format!("gui-{}", i))).collect();

    let runs = slots
        .iter()
        .map(|slot| slot.submit(ExecutionRequest::new(draw.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    for run in runs {
        let result = timeout(LIMIT, run.wait()).await?;
        assert!(result.is_success(), "{:?}", result.outcome);
    }

    {
        let toolkit = dispatcher.toolkit();
        let guard = toolkit.lock();
        let probe = (**guard)
            .downcast_ref::<Probe>()
            .ok_or_else(|| anyhow!("toolkit is not a probe"))?;
        assert_eq!(probe.calls, 3);
        assert_eq!(probe.max_active, 1);
    }

    let plain = dispatcher
        .slot("plain")
        .submit(ExecutionRequest::new(lookup(&tree, "t", "plain")?))?;
    let plain = timeout(LIMIT, plain.wait()).await?;
    assert_eq!(plain.response().and_then(|r| r.as_value()), Some(&json!(false)));
    Ok(())
}

#[tokio::test]
async fn panics_become_execution_failures() -> Result<()> {
    let tree = ModuleTree::new().with(
        Module::new("t").function(
            FunctionDef::native("boom", |ctx| {
                ctx.console.write_stdout("partial");
                panic!("kaboom");
            })
            .exec_ui(ExecUi::new()),
        ),
    );
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let (result, events) = timeout(
        LIMIT,
        slot.submit(ExecutionRequest::new(lookup(&tree, "t", "boom")?))?
            .wait_with_output(),
    )
    .await?;

    let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
    assert_eq!(failure.class, ErrorClass::Execution);
    assert_eq!(failure.kind, "Panic");
    assert_eq!(failure.message, "kaboom");
    // The unterminated line is flushed on release.
    assert_eq!(stdout_lines(&events), vec!["partial"]);
    assert!(slot.is_idle());
    Ok(())
}

#[tokio::test]
async fn events_arrive_in_production_order() -> Result<()> {
    let tree = ModuleTree::new().with(
        Module::new("t").function(
            FunctionDef::native("chatty", |ctx| {
                for i in 0..200 {
                    if i % 3 == 0 {
                        ctx.console.eprint(format!("err {}", i));
                    } else {
                        ctx.console.print(format!("out {}", i));
                    }
                }
                Ok(Response::none())
            })
            .exec_ui(ExecUi::new()),
        ),
    );
    let dispatcher = Dispatcher::new();
    let (_, events) = dispatcher
        .slot("main")
        .submit(ExecutionRequest::new(lookup(&tree, "t", "chatty")?))?
        .wait_with_output()
        .await;

    assert_eq!(events.len(), 200);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64);
        let expected = if i % 3 == 0 {
            format!("err {}", i)
        } else {
            format!("out {}", i)
        };
        assert_eq!(event.line(), Some(expected.as_str()));
        assert_eq!(event.is_stderr(), i % 3 == 0);
    }
    Ok(())
}

#[tokio::test]
async fn kernel_command_without_session_fails_cleanly() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let result = timeout(
        LIMIT,
        slot.submit(ExecutionRequest::new(demo("run_function_in_kernel")?))?
            .wait(),
    )
    .await?;

    let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
    assert_eq!(failure.class, ErrorClass::Protocol);
    assert!(slot.is_idle());
    Ok(())
}

#[tokio::test]
async fn several_steps_demo_aborts_on_request() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let slot = dispatcher.slot("main");
    let execution = slot.submit(
        ExecutionRequest::new(demo("output_in_several_steps")?)
            .arg("n_steps", "10")
            .arg("sleep", "0"),
    )?;
    let (mut events, replies, result) = execution.into_parts();

    let (seen, first) = until_prompt(&mut events).await?;
    assert_eq!(seen.last().and_then(|e| e.prompt()).map(|p| p.1), Some("Continue? > "));
    replies.reply(first, "Y")?;
    let (seen, second) = until_prompt(&mut events).await?;
    assert_eq!(
        seen.iter().filter(|e| e.is_stderr()).count(),
        3,
        "step 5 writes three stderr lines"
    );
    replies.reply(second, "y")?;

    let result = timeout(LIMIT, result).await??;
    let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
    assert_eq!(failure.kind, "RuntimeError");
    assert_eq!(failure.message, "Function was aborted!");
    Ok(())
}

#[tokio::test]
async fn composite_command_returns_plot_table_and_text() -> Result<()> {
    let dispatcher = Dispatcher::with_toolkit(Figures::default());
    let slot = dispatcher.slot("main");
    let result = timeout(
        LIMIT,
        slot.submit(ExecutionRequest::new(demo("a_plot_a_table_and_some_text")?))?
            .wait(),
    )
    .await?;

    let composite = result
        .response()
        .and_then(|r| r.downcast_ref::<PlotTableText>())
        .ok_or_else(|| anyhow!("unexpected outcome {:?}", result.outcome))?;
    assert_eq!(composite.figure.points.len(), 50);
    assert_eq!(composite.table.title, "Configuration");
    assert_eq!(composite.table.rows.len(), 20);
    assert_eq!(composite.text.split("\n\n").count(), 5);

    let toolkit = dispatcher.toolkit();
    let guard = toolkit.lock();
    let figures = (**guard)
        .downcast_ref::<Figures>()
        .ok_or_else(|| anyhow!("toolkit holds no figures"))?;
    assert_eq!(figures.figures, vec![composite.figure.clone()]);
    Ok(())
}

#[tokio::test]
async fn integer_overflow_is_raised_not_panicked() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let request = ExecutionRequest::new(demo("concatenate_args")?)
        .arg("arg1", json!(i64::MAX))
        .arg("arg2", json!(1));

    let result = timeout(LIMIT, dispatcher.slot("main").submit(request)?.wait()).await?;

    let failure = result.failure().ok_or_else(|| anyhow!("expected a failure"))?;
    assert_eq!(failure.class, ErrorClass::Execution);
    assert_eq!(failure.kind, "OverflowError");
    Ok(())
}
