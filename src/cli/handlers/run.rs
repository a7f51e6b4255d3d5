// src/cli/handlers/run.rs

//! `envmatrix run`.

use crate::{
    CancellationToken,
    cli::{GlobalOptions, args::RunArgs, handlers::commons},
    core::{
        matrix::{self, MatrixOptions},
        registry::worker_count,
        report,
    },
};
use anyhow::{Context, Result};
use colored::*;

/// Main entry point for the `run` command. Returns the process exit code.
pub fn handle(global: &GlobalOptions, args: RunArgs, cancellation_token: &CancellationToken) -> Result<i32> {
    // 1. Load and validate everything before touching the filesystem.
    let registry = commons::load_registry(global.config.as_deref())?;
    let selected = registry.select(&args.envs)?;

    // 2. Command-line flags override the configured settings.
    let mut options = MatrixOptions::from_registry(&registry);
    if let Some(requested) = args.parallel {
        options.workers = worker_count(requested);
    }
    options.recreate = args.recreate;
    options.reuse = options.reuse && !args.no_reuse;
    options.extra_args = args.extra_args;
    options.interactive = true;

    println!(
        "{} {} environment(s) from {}",
        "Running".cyan().bold(),
        selected.len(),
        registry.project_root.display().to_string().dimmed()
    );

    // 3. Run the matrix and always print the summary, even for an interrupted run.
    let report = matrix::execute(&registry, &selected, &options, cancellation_token)?;
    report::print_summary(&report);

    if let Some(path) = &args.report {
        report::write_json(&report, path)
            .with_context(|| format!("Could not write the report to '{}'", path.display()))?;
        log::info!("Report written to '{}'", path.display());
    }

    Ok(report.exit_code())
}
