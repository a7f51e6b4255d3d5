// src/cli/args.rs

//! Arguments of each subcommand.

use clap::Args;
use std::path::PathBuf;

/// Arguments of `envmatrix run`.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Environments to run. Accepts comma-separated names and brace expansion
    /// (`py{39,311}-unit`). Defaults to every environment.
    pub envs: Vec<String>,

    /// Number of environments to run at once. `0` uses one worker per CPU.
    #[arg(short, long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Provision every selected environment from scratch.
    #[arg(long)]
    pub recreate: bool,

    /// Remove contexts after the run instead of keeping them for reuse.
    #[arg(long)]
    pub no_reuse: bool,

    /// Write the run report as JSON to this file.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Arguments after `--`, substituted for `{posargs}` in commands.
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

/// Arguments of `envmatrix list`. Verbosity comes from the global `-v`.
#[derive(Args, Debug, Default, Clone)]
pub struct ListArgs {}

/// Arguments of `envmatrix clean`.
#[derive(Args, Debug, Default, Clone)]
pub struct CleanArgs {
    /// Environments to clean. Defaults to the whole work directory.
    pub envs: Vec<String>,
}
