//! Printers: execution events, results and markdown (termimad).

use owo_colors::OwoColorize;
use serde_json::json;
use termimad::MadSkin;

use crate::{
    bridge::{EventKind, OutputEvent},
    command::CommandDescriptor,
    execution::{ExecutionResult, Outcome},
    form::FormSpec,
};

/// Prints execution events to the terminal as they arrive: stdout lines to
/// stdout, stderr lines and prompts to stderr.
pub struct EventPrinter {
    pub color: bool,
    pub timestamps: bool,
}

impl EventPrinter {
    pub fn print(&self, event: &OutputEvent) {
        let stamp = if self.timestamps {
            format!("{} ", event.at.format("%H:%M:%S%.3f"))
        } else {
            String::new()
        };
        match &event.kind {
            EventKind::Stdout { line } => println!("{}{}", stamp, line),
            EventKind::Stderr { line } if self.color => eprintln!("{}{}", stamp, line.red()),
            EventKind::Stderr { line } => eprintln!("{}{}", stamp, line),
            EventKind::Prompt { caption, .. } if self.color => {
                eprint!("{}{}", stamp, caption.yellow().bold())
            }
            EventKind::Prompt { caption, .. } => eprint!("{}{}", stamp, caption),
        }
    }

    pub fn print_result(&self, result: &ExecutionResult) {
        let elapsed = format!("({:.2?})", result.elapsed);
        match &result.outcome {
            Outcome::Completed(response) => {
                if !matches!(response.as_value(), Some(v) if v.is_null()) {
                    println!("{}", response);
                }
                if self.color {
                    eprintln!("{} {}", "completed".green(), elapsed.dimmed());
                } else {
                    eprintln!("completed {}", elapsed);
                }
            }
            Outcome::Failed(failure) => {
                if !failure.traceback.is_empty() {
                    eprintln!("{}", failure.traceback.trim_end());
                }
                if self.color {
                    eprintln!("{} {}", failure.to_string().red().bold(), elapsed.dimmed());
                } else {
                    eprintln!("{} {}", failure, elapsed);
                }
            }
            Outcome::Cancelled => {
                if self.color {
                    eprintln!("{} {}", "cancelled".yellow(), elapsed.dimmed());
                } else {
                    eprintln!("cancelled {}", elapsed);
                }
            }
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
    pub width: usize,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self {
            skin: MadSkin::default(),
            width: 100,
        }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// One line per command: qualified name, mode and description.
pub fn catalog_line(descriptor: &CommandDescriptor, color: bool) -> String {
    let mode = format!("[{}]", descriptor.mode());
    if color {
        format!(
            "{:<48} {:<22} {}",
            descriptor.qualified_name().cyan(),
            mode.dimmed(),
            descriptor.description()
        )
    } else {
        format!(
            "{:<48} {:<22} {}",
            descriptor.qualified_name(),
            mode,
            descriptor.description()
        )
    }
}

/// Renders the input form of a command as markdown.
pub fn form_markdown(form: &FormSpec, doc: &str) -> String {
    let mut md = format!("# {}\n\n`{}` · {}\n\n", form.title, form.command, form.mode);
    if !doc.trim().is_empty() {
        for line in doc.lines() {
            md.push_str(line.trim());
            md.push('\n');
        }
        md.push('\n');
    }
    if form.fields.is_empty() {
        md.push_str("*No arguments.*\n");
    } else {
        md.push_str("|argument|widget|type|default|\n|-|-|-|-|\n");
        for field in &form.fields {
            let default = match (&field.default_text, field.required) {
                (Some(text), false) => format!("`{}`", text),
                (_, true) => "**required**".to_string(),
                (None, false) => String::new(),
            };
            let name = if field.keyword_only {
                format!("{} (keyword)", field.name)
            } else {
                field.name.clone()
            };
            md.push_str(&format!(
                "|{}|{:?}|{}|{}|\n",
                name, field.widget, field.type_tag, default
            ));
        }
    }
    if !form.prompts.is_empty() {
        md.push_str("\nAsks for input:\n");
        for caption in &form.prompts {
            md.push_str(&format!("* `{}`\n", caption.trim()));
        }
    }
    md
}

/// Machine-readable form of a result, for `--json`.
pub fn result_json(result: &ExecutionResult) -> serde_json::Value {
    let elapsed_ms = result.elapsed.as_millis() as u64;
    match &result.outcome {
        Outcome::Completed(response) => json!({
            "id": result.id,
            "command": result.command,
            "status": "completed",
            "value": response.as_value().cloned().unwrap_or_else(|| json!(response.to_string())),
            "elapsed_ms": elapsed_ms,
        }),
        Outcome::Failed(failure) => json!({
            "id": result.id,
            "command": result.command,
            "status": "failed",
            "failure": failure,
            "elapsed_ms": elapsed_ms,
        }),
        Outcome::Cancelled => json!({
            "id": result.id,
            "command": result.command,
            "status": "cancelled",
            "elapsed_ms": elapsed_ms,
        }),
    }
}
