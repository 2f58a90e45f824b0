use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "gui-executor", about = "Discover annotated functions and run them as commands", version)]
#[command(group(ArgGroup::new("action").args(["list", "describe", "run"]).multiple(false)))]
pub struct Cli {
    /// Dotted module path to scan for commands.
    #[arg(long = "module-path", value_name = "PATH")]
    pub module_path: Option<String>,

    /// List the commands found under the module path.
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Show the input form of a command.
    #[arg(short = 'd', long, value_name = "NAME")]
    pub describe: Option<String>,

    /// Run a command (qualified name, or bare name when unambiguous).
    #[arg(short = 'r', long, value_name = "NAME")]
    pub run: Option<String>,

    /// Argument for --run, as NAME=VALUE. Can be used multiple times.
    #[arg(short = 'a', long = "arg", value_name = "NAME=VALUE", action = ArgAction::Append)]
    pub args: Vec<String>,

    /// Interpreter program for kernel commands.
    #[arg(long = "kernel-name", value_name = "PROGRAM")]
    pub kernel_name: Option<String>,

    /// Do not start an interpreter; kernel commands fail.
    #[arg(long = "no-kernel")]
    pub no_kernel: bool,

    /// Read configuration from this file instead of the default rc file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Application name shown in headers.
    #[arg(long = "app-name")]
    pub app_name: Option<String>,

    /// Print events and the result as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Debug logging for this crate.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Splits each `NAME=VALUE`; the value may itself contain `=`.
    pub fn arg_pairs(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.args
            .iter()
            .map(|raw| {
                raw.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                    .ok_or_else(|| anyhow::anyhow!("argument `{}` is not NAME=VALUE", raw))
            })
            .collect()
    }
}
