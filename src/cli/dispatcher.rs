// src/cli/dispatcher.rs

//! Routes parsed commands to their handlers.

use anyhow::Result;

use crate::{
    CancellationToken,
    cli::{Cli, Command, GlobalOptions, args::RunArgs, handlers},
};

/// Routes a parsed command line to its handler and returns the process exit code.
/// Running without a subcommand is the same as `run` with no arguments.
pub fn dispatch(cli: Cli, cancellation_token: &CancellationToken) -> Result<i32> {
    log::debug!("CLI args parsed: {:?}", cli);
    let global = GlobalOptions {
        verbose: cli.verbose,
        config: cli.config,
    };

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => handlers::run::handle(&global, args, cancellation_token),
        Command::List(args) => handlers::list::handle(&global, args),
        Command::Clean(args) => handlers::clean::handle(&global, args),
    }
}
