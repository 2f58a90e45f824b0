mod cli;

use std::{
    io::{self, BufRead},
    process::ExitCode,
    sync::Arc,
    thread,
};

use anyhow::{anyhow, Context, Result};
use futures_util::StreamExt;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use gui_executor::{
    bridge::{EventStream, ReplyHandle},
    builtin::{self, Figures},
    command::{ExecMode, SharedDescriptor},
    config::Config,
    dispatch::Dispatcher,
    execution::{ExecutionResult, Outcome},
    form::FormSpec,
    printer::{self, EventPrinter, MarkdownPrinter},
    registry::{Catalog, Registry},
    session,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();

    let mut cfg = Config::load_from(args.config.as_deref())?;
    if let Some(path) = &args.module_path {
        cfg.set("MODULE_PATH", path);
    }
    if let Some(name) = &args.kernel_name {
        cfg.set("KERNEL_NAME", name);
    }
    if let Some(name) = &args.app_name {
        cfg.set("APP_NAME", name);
    }
    init_tracing(&args, &cfg);

    let color = io::stdout().is_terminal() && !args.json;

    let registry = Registry::new();
    let report = registry.scan(&builtin::tree(), &cfg.module_path());
    for err in &report.errors {
        if color {
            eprintln!("{} {}", "skipped:".yellow(), err);
        } else {
            eprintln!("skipped: {}", err);
        }
    }
    let catalog = report.catalog;

    if let Some(name) = &args.describe {
        describe(&catalog, name, &args, &cfg)?;
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(name) = &args.run {
        return run(&catalog, name, &args, &cfg, color).await;
    }

    list(&catalog, &cfg, color);
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(args: &cli::Cli, cfg: &Config) {
    let fallback = if args.debug {
        "gui_executor=debug".to_string()
    } else {
        match args.verbose {
            0 => cfg.log_filter(),
            1 => "info".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn list(catalog: &Catalog, cfg: &Config, color: bool) {
    let header = format!("{} ({})", cfg.app_name(), catalog.root());
    if color {
        println!("{}", header.bold());
    } else {
        println!("{}", header);
    }
    if catalog.is_empty() {
        println!("no commands found");
        return;
    }
    for descriptor in catalog.iter() {
        println!("{}", printer::catalog_line(descriptor, color));
    }
}

fn lookup(catalog: &Catalog, name: &str) -> Result<SharedDescriptor> {
    catalog
        .find(name)
        .cloned()
        .ok_or_else(|| anyhow!("unknown or ambiguous command `{}`", name))
}

fn describe(catalog: &Catalog, name: &str, args: &cli::Cli, cfg: &Config) -> Result<()> {
    let descriptor = lookup(catalog, name)?;
    let form = FormSpec::new(&descriptor);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&form)?);
        return Ok(());
    }
    let md = printer::form_markdown(&form, descriptor.doc());
    if cfg.get_bool("PRETTIFY_MARKDOWN") && io::stdout().is_terminal() {
        MarkdownPrinter::default().print(&md);
    } else {
        println!("{}", md);
    }
    Ok(())
}

async fn run(
    catalog: &Catalog,
    name: &str,
    args: &cli::Cli,
    cfg: &Config,
    color: bool,
) -> Result<ExitCode> {
    let descriptor = lookup(catalog, name)?;
    let form = FormSpec::new(&descriptor);
    let pairs = args.arg_pairs()?;
    let request = match form.bind(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("{}: {}", descriptor.qualified_name(), err);
            return Ok(ExitCode::from(2));
        }
    };

    let mut dispatcher = Dispatcher::with_toolkit(Figures::default());
    if descriptor.mode() == ExecMode::InterpreterSession && !args.no_kernel {
        let program = cfg.kernel_name();
        let session = session::process::start(&program)
            .await
            .with_context(|| format!("cannot run {}", descriptor.qualified_name()))?;
        dispatcher = dispatcher.with_session(Arc::new(session));
    }

    let slot = dispatcher.slot("main");
    let execution = slot.submit(request)?;
    let (events, replies, result) = execution.into_parts();

    let cancel = replies.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let printer = EventPrinter {
        color,
        timestamps: cfg.get_bool("SHOW_TIMESTAMPS"),
    };
    let result = pump(events, replies, result, &printer, args.json).await;

    if args.json {
        println!("{}", printer::result_json(&result));
    } else {
        printer.print_result(&result);
    }
    if let Some(session) = dispatcher.session() {
        session.shutdown();
    }

    Ok(match result.outcome {
        Outcome::Completed(_) => ExitCode::SUCCESS,
        Outcome::Failed(_) => ExitCode::FAILURE,
        Outcome::Cancelled => ExitCode::from(130),
    })
}

/// Prints events until the result arrives, answering prompts from stdin.
async fn pump(
    mut events: EventStream,
    replies: ReplyHandle,
    mut result: oneshot::Receiver<ExecutionResult>,
    printer: &EventPrinter,
    json: bool,
) -> ExecutionResult {
    let show = |event: &gui_executor::bridge::OutputEvent| {
        if json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!(error = %err, "failed to encode event"),
            }
        } else {
            printer.print(event);
        }
    };

    let mut open = true;
    let finished = loop {
        tokio::select! {
            event = events.next(), if open => match event {
                Some(event) => {
                    show(&event);
                    if let Some((id, _)) = event.prompt() {
                        answer_from_stdin(id, replies.clone());
                    }
                }
                None => open = false,
            },
            finished = &mut result => break finished,
        }
    };
    for event in events.drain() {
        show(&event);
    }

    finished.unwrap_or_else(|_| ExecutionResult {
        id: 0,
        command: String::new(),
        outcome: Outcome::Failed(gui_executor::execution::Failure::protocol(
            "execution result was lost",
        )),
        elapsed: Default::default(),
    })
}

/// Reads one line on a detached thread and hands it to the prompt. End of
/// input cancels the execution, as no answer can ever arrive. The thread is
/// never joined, so a read still pending when the run ends does not keep
/// the process alive.
fn answer_from_stdin(id: u64, replies: ReplyHandle) {
    let cancel = replies.clone();
    let spawned = thread::Builder::new()
        .name(format!("gexec-stdin-{}", id))
        .spawn(move || {
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    warn!(prompt = id, "stdin closed, cancelling");
                    replies.cancel();
                }
                Ok(_) => {
                    if let Err(err) = replies.reply(id, line) {
                        debug!(prompt = id, error = %err, "reply not delivered");
                    }
                }
            }
        });
    if let Err(err) = spawned {
        warn!(prompt = id, error = %err, "cannot read stdin, cancelling");
        cancel.cancel();
    }
}
