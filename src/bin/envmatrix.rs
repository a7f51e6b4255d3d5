// src/bin/envmatrix.rs

//! The `envmatrix` executable.

use clap::Parser;
use colored::*;
use envmatrix::{
    CancellationToken,
    cli::{Cli, dispatcher},
    constants::{EXIT_CONFIG_ERROR, EXIT_INTERNAL_ERROR},
    core::{paths::PathError, registry::ConfigError},
    system::signals,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// The main entry point of the `envmatrix` application.
/// It sets up logging and Ctrl+C handling, dispatches to the correct handler,
/// and maps errors to exit codes in one place.
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));
    if let Err(e) = signals::install_interrupt_handler(&cancellation_token) {
        log::warn!("Ctrl+C handling is unavailable: {}", e);
    }

    let code = match dispatcher::dispatch(cli, &cancellation_token) {
        Ok(code) => code,
        Err(e) => {
            // --- Centralized Error Handling ---
            eprintln!("\n{}: {}", "Error".red().bold(), e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Configuration problems are reported as such; everything else is an internal error.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() || error.downcast_ref::<PathError>().is_some() {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_INTERNAL_ERROR
    }
}

/// `warn` by default, raised by each `-v`. `RUST_LOG` wins when set.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}
