// src/core/matrix.rs

//! # Matrix Executor
//!
//! Drives resolve → provision → run for every selected environment and aggregates the
//! outcomes into a `RunReport`.
//!
//! Each environment is an independent unit of work. With more than one worker the units
//! run on a bounded rayon pool; results are collected through an indexed parallel
//! iterator, so the report always follows declaration order. A failing unit never stops
//! the others. Units that never started, or were interrupted, are listed as not completed.

use crate::{
    CancellationToken,
    constants::EXIT_ENV_FAILURE,
    core::{registry::Registry, resolver},
    is_cancelled,
    models::{EnvironmentDescriptor, ExecutionResult, Outcome, RunReport},
    system::{
        executor::OutputSink,
        provisioner::{ProvisionError, ProvisionOptions, Provisioner},
        runner::{self, RunRequest},
    },
};
use colored::Colorize;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the executor itself, as opposed to environment failures.
#[derive(Error, Debug)]
pub enum MatrixError {
    /// The rayon pool could not be built.
    #[error("Could not start the worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Options of one `run` invocation.
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    /// Maximum number of environments running at once. `1` runs sequentially.
    pub workers: usize,
    /// Provision every context from scratch.
    pub recreate: bool,
    /// Keep contexts after the run.
    pub reuse: bool,
    /// Arguments substituted for `{posargs}`.
    pub extra_args: Vec<String>,
    /// Stream command output to the terminal when sequential and print progress lines.
    pub interactive: bool,
}

impl MatrixOptions {
    /// Options taken from the registry's settings.
    pub fn from_registry(registry: &Registry) -> Self {
        Self {
            workers: registry.settings.workers,
            recreate: false,
            reuse: registry.settings.reuse,
            extra_args: Vec::new(),
            interactive: false,
        }
    }
}

/// Runs every selected environment and returns the ordered report.
pub fn execute(
    registry: &Registry,
    selected: &[&EnvironmentDescriptor],
    options: &MatrixOptions,
    cancellation_token: &CancellationToken,
) -> Result<RunReport, MatrixError> {
    let run_id = Uuid::new_v4();
    let workers = options.workers.clamp(1, selected.len().max(1));
    let sequential = workers == 1;
    log::debug!(
        "Run {}: {} environment(s) on {} worker(s)",
        run_id,
        selected.len(),
        workers
    );

    let unit = |descriptor: &&EnvironmentDescriptor| {
        let result = execute_unit(registry, descriptor, options, sequential, cancellation_token);
        if options.interactive && !sequential {
            if let Some(result) = &result {
                print_progress(result);
            }
        }
        result
    };

    let outcomes: Vec<Option<ExecutionResult>> = if sequential {
        selected.iter().map(unit).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("envmatrix-worker-{i}"))
            .build()?;
        pool.install(|| selected.par_iter().map(unit).collect())
    };

    let mut results = Vec::with_capacity(outcomes.len());
    let mut not_completed = Vec::new();
    for (descriptor, outcome) in selected.iter().zip(outcomes) {
        match outcome {
            Some(result) => results.push(result),
            None => not_completed.push(descriptor.name.clone()),
        }
    }

    Ok(RunReport {
        run_id,
        selected: selected.iter().map(|d| d.name.clone()).collect(),
        incomplete: !not_completed.is_empty(),
        results,
        not_completed,
    })
}

/// Resolve, provision and run one environment. `None` means the unit was cancelled
/// before it could produce a result.
fn execute_unit(
    registry: &Registry,
    descriptor: &EnvironmentDescriptor,
    options: &MatrixOptions,
    sequential: bool,
    cancellation_token: &CancellationToken,
) -> Option<ExecutionResult> {
    if is_cancelled(cancellation_token) {
        log::debug!("Not starting '{}': run was cancelled", descriptor.name);
        return None;
    }

    let started = Instant::now();
    let echo = sequential && options.interactive;
    if echo {
        println!("\n{} {}", "▶".cyan(), descriptor.name.bold());
    }

    let log_path = registry.log_file(&descriptor.name);
    let sink = match OutputSink::to_file(&log_path, echo) {
        Ok(sink) => sink,
        Err(e) => {
            let reason = format!("could not open log file '{}': {}", log_path.display(), e);
            return Some(failed_provision(descriptor, reason, EXIT_ENV_FAILURE, started, None));
        }
    };

    // Load validated every group reference, so this only fails for a hand-built registry.
    let requirements = match resolver::resolve(descriptor, &registry.groups) {
        Ok(requirements) => requirements,
        Err(e) => return Some(failed_provision(descriptor, e.to_string(), EXIT_ENV_FAILURE, started, Some(log_path))),
    };
    log::debug!(
        "'{}' resolved to {} requirement(s)",
        descriptor.name,
        requirements.len()
    );

    let provisioner = Provisioner::new(
        registry,
        ProvisionOptions {
            reuse: options.reuse,
            recreate: options.recreate,
        },
    );
    let context = match provisioner.provision(descriptor, &requirements, &sink, cancellation_token) {
        Ok(context) => context,
        Err(ProvisionError::Cancelled) => return None,
        Err(ProvisionError::RuntimeNotFound(runtime)) if registry.settings.skip_missing_runtimes => {
            let reason = format!("runtime '{runtime}' not found");
            sink.note(&format!("skipped: {reason}"));
            return Some(ExecutionResult {
                env: descriptor.name.clone(),
                outcome: Outcome::Skipped { reason },
                exit_code: 0,
                duration: started.elapsed(),
                log_path: Some(log_path),
            });
        }
        Err(e) => {
            sink.note(&format!("provisioning failed: {e}"));
            let code = e.exit_code().unwrap_or(EXIT_ENV_FAILURE);
            return Some(failed_provision(descriptor, e.to_string(), code, started, Some(log_path)));
        }
    };

    let specs: Vec<String> = requirements.into_iter().map(|r| r.spec).collect();
    let request = RunRequest {
        registry,
        context: &context,
        requirements: &specs,
        extra_args: &options.extra_args,
        sink: &sink,
        log_path: Some(log_path),
        started,
    };
    match runner::run(descriptor, &request, cancellation_token) {
        // A process that died from the terminal's interrupt is not a real failure.
        Ok(result) if !result.is_success() && is_cancelled(cancellation_token) => None,
        Ok(result) => Some(result),
        Err(e) => {
            log::debug!("'{}' stopped: {}", descriptor.name, e);
            None
        }
    }
}

fn failed_provision(
    descriptor: &EnvironmentDescriptor,
    reason: String,
    exit_code: i32,
    started: Instant,
    log_path: Option<PathBuf>,
) -> ExecutionResult {
    ExecutionResult {
        env: descriptor.name.clone(),
        outcome: Outcome::ProvisionFailed { reason },
        exit_code,
        duration: started.elapsed(),
        log_path,
    }
}

fn print_progress(result: &ExecutionResult) {
    let status = match &result.outcome {
        Outcome::Success => "done".green(),
        Outcome::Skipped { .. } => "skipped".yellow(),
        Outcome::ProvisionFailed { .. } | Outcome::CommandFailed { .. } => "failed".red(),
    };
    println!(
        "{} {} {} {}",
        "·".dimmed(),
        result.env.bold(),
        status,
        format!("({:.2}s)", result.duration.as_secs_f64()).dimmed()
    );
}
