//! Built-in demo commands, used when the host program registers nothing
//! else. They exercise every execution mode and the prompt relay.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    command::{CallContext, DeclaredParam, ExecUi, FunctionDef, Module, ModuleTree},
    execution::{Raised, Response},
};

pub const ROOT: &str = "demo";

/// Toolkit state shared by graphical commands: the figures they produced.
#[derive(Debug, Default)]
pub struct Figures {
    pub figures: Vec<Figure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<(f64, f64)>,
}

impl Figure {
    fn to_csv(&self) -> String {
        let mut out = format!("{},{}\n", self.x_label, self.y_label);
        for (x, y) in &self.points {
            out.push_str(&format!("{},{}\n", x, y));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// What `a_plot_a_table_and_some_text` hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotTableText {
    pub figure: Figure,
    pub table: Table,
    pub text: String,
}

pub fn tree() -> ModuleTree {
    ModuleTree::new()
        .with(arguments())
        .with(plots())
        .with(interactive())
        .with(kernel())
}

fn arguments() -> Module {
    Module::new("demo.arguments")
        .function(
            FunctionDef::native("concatenate_args", concatenate_args)
                .param(DeclaredParam::new("arg1"))
                .param(DeclaredParam::new("arg2"))
                .doc("Concatenates the two arguments with the '+' operator.")
                .exec_ui(ExecUi::new().description("button function to concat arguments")),
        )
        .function(
            FunctionDef::native("compare_args", |ctx| {
                let (a, b) = (ctx.args.value("arg1")?, ctx.args.value("arg2")?);
                ctx.console.print(format!("compare_args(arg1={}, arg2={})", a, b));
                Ok(Response::value(a == b))
            })
            .param(DeclaredParam::new("arg1"))
            .param(DeclaredParam::new("arg2"))
            .doc("Compares the two arguments with the '==' operator.")
            .exec_ui(ExecUi::new()),
        )
        .function(
            FunctionDef::native("func_with_args", |ctx| {
                let (x, y) = (ctx.args.i64("x")?, ctx.args.f64("y")?);
                ctx.console.print(format!("func_with_args(x={}, y={})", x, y));
                ctx.console.print("type(x) = i64, type(y) = f64");
                Ok(Response::value(json!([x, y])))
            })
            .param(DeclaredParam::typed("x", "int"))
            .param(DeclaredParam::typed("y", "float"))
            .exec_ui(ExecUi::new()),
        )
        .function(
            FunctionDef::native("func_with_only_kwargs", |ctx| {
                let a = ctx.args.str("a")?.to_string();
                let b = ctx.args.i64("b")?;
                let c = ctx.args.value("c")?.clone();
                ctx.console
                    .print(format!("func_with_only_kwargs(a={:?}, b={}, c={})", a, b, c));
                Ok(Response::value(json!([a, b, c])))
            })
            .param(DeclaredParam::typed("a", "str").keyword_only())
            .param(DeclaredParam::typed("b", "int").with_default(42).keyword_only())
            .param(DeclaredParam::new("c").keyword_only())
            .exec_ui(ExecUi::new()),
        )
        .function(
            FunctionDef::native("bool_arg", |ctx| {
                let x = ctx.args.bool("x")?;
                ctx.console.print(format!("x = {}", x));
                Ok(Response::none())
            })
            .param(DeclaredParam::typed("x", "bool").with_default(true))
            .exec_ui(ExecUi::new()),
        )
        // Not annotated: never shows up as a command.
        .function(FunctionDef::native("some_text", |_| Ok(Response::value(some_text()))))
}

const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do \
                     eiusmod tempor incididunt ut labore et dolore magna aliqua.";

fn some_text() -> String {
    vec![LOREM; 5].join("\n\n")
}

fn concatenate_args(ctx: &mut CallContext<'_>) -> Result<Response> {
    let a = ctx.args.value("arg1")?.clone();
    let b = ctx.args.value("arg2")?.clone();
    ctx.console
        .print(format!("concatenate_args(arg1={}, arg2={})", a, b));
    let joined = match (&a, &b) {
        (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => match x.checked_add(y) {
                Some(sum) => json!(sum),
                None => {
                    return Err(Raised::new(
                        "OverflowError",
                        format!("{} + {} does not fit in a 64-bit integer", x, y),
                    )
                    .into())
                }
            },
            _ => json!(x.as_f64().unwrap_or_default() + y.as_f64().unwrap_or_default()),
        },
        (Value::Array(x), Value::Array(y)) => Value::Array(x.iter().chain(y).cloned().collect()),
        _ => {
            return Err(Raised::new(
                "TypeError",
                format!("cannot concatenate {} and {}", a, b),
            )
            .into())
        }
    };
    Ok(Response::value(joined))
}

fn plots() -> Module {
    Module::new("demo.plots")
        .function(
            FunctionDef::native("long_duration_func", |ctx| {
                ctx.console.print("Sleeping for 10s..");
                ctx.console.sleep(Duration::from_secs(10))?;
                Ok(Response::value("Done"))
            })
            .exec_ui(ExecUi::new()),
        )
        .function(
            FunctionDef::native("simple_plot", simple_plot)
                .param(DeclaredParam::typed("save", "bool").with_default(false))
                .param(DeclaredParam::typed("png_dir", "str").with_default("/tmp"))
                .param(DeclaredParam::typed("png_filename", "str").with_default("plot.png"))
                .doc(
                    "\n    Create a simple plot and return the figure.\n\n    \
                     The figure is kept by the graphical toolkit, so later commands\n    \
                     can reuse it.\n",
                )
                .exec_ui(ExecUi::new().use_gui_app()),
        )
        .function(
            FunctionDef::native("two_simple_plots", |ctx| {
                let voltage = Figure {
                    title: "About as simple as it gets, folks".into(),
                    x_label: "time (s)".into(),
                    y_label: "voltage (mV)".into(),
                    points: (0..200)
                        .map(|i| {
                            let t = i as f64 * 0.01;
                            (t, 1.0 + (2.0 * std::f64::consts::PI * t).sin())
                        })
                        .collect(),
                };
                let damped = Figure {
                    title: "Damped sine".into(),
                    x_label: "x".into(),
                    y_label: "y".into(),
                    points: (0..100)
                        .map(|i| {
                            let x = i as f64 * 12.0 / 100.0;
                            (x, x.sin() * (-x / 4.0).exp())
                        })
                        .collect(),
                };
                keep_figure(ctx, &voltage);
                keep_figure(ctx, &damped);
                Ok(Response::artifact((voltage, damped)))
            })
            .exec_ui(ExecUi::new().use_gui_app()),
        )
        .function(
            FunctionDef::native("a_simple_table", |_| Ok(Response::artifact(configuration_table())))
                .exec_ui(ExecUi::new().use_gui_app()),
        )
        .function(
            FunctionDef::native("a_plot_a_table_and_some_text", |ctx| {
                let figure = parabola();
                keep_figure(ctx, &figure);
                Ok(Response::artifact(PlotTableText {
                    figure,
                    table: configuration_table(),
                    text: some_text(),
                }))
            })
            .exec_ui(ExecUi::new().use_gui_app()),
        )
}

const NAMES: [&str; 5] = ["Ada Byron", "Grace Hopper", "Alan Turing", "Edsger Dijkstra", "Barbara Liskov"];
const STREETS: [&str; 4] = ["Main Street", "Station Road", "Church Lane", "Mill Road"];

fn configuration_table() -> Table {
    let rows = (0..20)
        .map(|i| {
            vec![
                NAMES[i % NAMES.len()].to_string(),
                format!("{} {}", 10 + 7 * i, STREETS[i % STREETS.len()]),
            ]
        })
        .collect();
    Table {
        title: "Configuration".into(),
        columns: vec!["Name".into(), "Value".into()],
        rows,
    }
}

fn parabola() -> Figure {
    Figure {
        title: "Reusing this figure".into(),
        x_label: "x".into(),
        y_label: "y".into(),
        points: linspace(-0.5, 3.3, 50)
            .map(|x| (x, x * x - 2.0 * x + 1.0))
            .collect(),
    }
}

fn simple_plot(ctx: &mut CallContext<'_>) -> Result<Response> {
    let figure = parabola();

    if ctx.args.bool("save")? {
        let path = Path::new(ctx.args.str("png_dir")?).join(ctx.args.str("png_filename")?);
        ctx.console
            .print(format!("Saving plot to {} ...", path.display()));
        fs::write(&path, figure.to_csv())
            .with_context(|| format!("failed to save plot to {}", path.display()))?;
    }

    keep_figure(ctx, &figure);
    ctx.console.print("Returning the figure...");
    Ok(Response::artifact(figure))
}

fn keep_figure(ctx: &mut CallContext<'_>, figure: &Figure) {
    if let Some(figures) = ctx.toolkit::<Figures>() {
        figures.figures.push(figure.clone());
    }
}

fn linspace(start: f64, stop: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (stop - start) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| start + step * i as f64)
}

fn interactive() -> Module {
    Module::new("demo.interactive").function(
        FunctionDef::native("output_in_several_steps", output_in_several_steps)
            .param(DeclaredParam::typed("n_steps", "int").with_default(10))
            .param(DeclaredParam::typed("sleep", "float").with_default(1.0))
            .doc(
                "\n    Goes through 'n_steps' steps and waits 'sleep' seconds between them.\n\n    \
                 Asks for input in step 3 and step 7. Answering 'n' in step 3 or 'y' in\n    \
                 step 7 ends the function with an error.\n",
            )
            .exec_ui(ExecUi::new().input_request(["Continue? > ", "Abort? > "])),
    )
}

fn output_in_several_steps(ctx: &mut CallContext<'_>) -> Result<Response> {
    let n_steps = ctx.args.i64("n_steps")?;
    let pause = Duration::from_secs_f64(ctx.args.f64("sleep")?.max(0.0));
    let console = &mut *ctx.console;

    for n in 0..n_steps {
        console.print(format!("step {}..", n));
        console.sleep(pause)?;
        match n {
            3 => {
                let answer = console.input("Continue? > ")?;
                console.print(&answer);
                if answer.eq_ignore_ascii_case("n") {
                    return Err(Raised::runtime("No further steps requested.").into());
                }
            }
            5 => {
                console.eprint("An error message...");
                console.eprint("Line two of the error message");
                console.eprint("...and the last line of this error message");
            }
            7 => {
                let answer = console.input("Abort? > ")?;
                console.print(&answer);
                if answer.eq_ignore_ascii_case("y") {
                    return Err(Raised::runtime("Function was aborted!").into());
                }
            }
            _ => {}
        }
    }
    Ok(Response::none())
}

const RUN_FUNCTION_IN_KERNEL: &str = r#"
def run_function_in_kernel(msg="add your message here"):
    print("Use in conjunction with an interpreter console.")
    print("Return value will be available in the session as 'response'...")
    return f"Message from 'run_function_in_kernel': {msg}"
"#;

fn kernel() -> Module {
    Module::new("demo.kernel").function(
        FunctionDef::remote("run_function_in_kernel", RUN_FUNCTION_IN_KERNEL.trim_start())
            .param(DeclaredParam::typed("msg", "str").with_default("add your message here"))
            .doc(
                "\n    When a function is executed in the kernel, its return value is\n    \
                 available in the session in the 'response' variable (which will be\n    \
                 overwritten).\n",
            )
            .exec_ui(ExecUi::new().use_kernel()),
    )
}
