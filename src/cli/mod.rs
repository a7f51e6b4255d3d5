// src/cli/mod.rs

//! The command-line surface: argument parsing, dispatch and one handler per command.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

pub mod args;
pub mod dispatcher;
pub mod handlers;

use args::{CleanArgs, ListArgs, RunArgs};

/// envmatrix: runs tests, linters and type checkers across a matrix of isolated environments.
///
/// Environments are declared in `envmatrix.toml`, found in the current directory or one of
/// its ancestors. Running without a subcommand runs every environment.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
#[command(styles = clap::builder::Styles::styled()
    .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
    .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
    .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
    .placeholder(clap::builder::styling::AnsiColor::Green.on_default()))]
pub struct Cli {
    /// More output: `-v` for info, `-vv` for debug logs. `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the configuration file instead of searching for `envmatrix.toml`.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The command to run; `run` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// The available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision and run environments (all of them when none is named).
    Run(RunArgs),
    /// List the configured environments in declaration order.
    #[command(visible_alias = "ls")]
    List(ListArgs),
    /// Remove provisioned contexts and logs.
    Clean(CleanArgs),
}

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Number of `-v` flags.
    pub verbose: u8,
    /// Explicit configuration file.
    pub config: Option<PathBuf>,
}
