// src/system/runner.rs

//! Runs an environment's command list inside its isolated context.

use crate::{
    CancellationToken,
    core::{
        registry::Registry,
        template::{CommandTemplate, RenderContext},
    },
    models::{EnvironmentDescriptor, ExecutionResult, Outcome},
    system::{
        context::IsolatedContext,
        executor::{self, ExecutionError, OutputSink},
    },
};
use std::path::PathBuf;
use std::time::Instant;

/// Exit code reported for a command whose program could not be started.
const SPAWN_FAILURE_CODE: i32 = 127;

/// Everything the runner needs besides the descriptor itself.
#[derive(Debug)]
pub struct RunRequest<'a> {
    /// Source of the work dir and project root.
    pub registry: &'a Registry,
    /// The provisioned context commands run in.
    pub context: &'a IsolatedContext,
    /// Resolved requirement specifiers, for `{requirements}` in commands.
    pub requirements: &'a [String],
    /// Positional arguments given after `--`.
    pub extra_args: &'a [String],
    /// Receives all command output.
    pub sink: &'a OutputSink,
    /// Copied into the result.
    pub log_path: Option<PathBuf>,
    /// When the unit started, provisioning included.
    pub started: Instant,
}

/// Executes the commands of `descriptor` in declared order.
///
/// The first non-zero exit stops the environment and becomes its exit code, unless
/// `ignore_errors` is set, in which case every command runs and the first failure is
/// kept. Commands marked with a leading `-` never fail the environment.
///
/// Only cancellation is returned as an error; every other failure is part of the result.
pub fn run(
    descriptor: &EnvironmentDescriptor,
    request: &RunRequest<'_>,
    cancellation_token: &CancellationToken,
) -> Result<ExecutionResult, ExecutionError> {
    let registry = request.registry;
    let render = RenderContext {
        env_name: &descriptor.name,
        env_dir: request.context.root(),
        env_bin: request.context.bin_dir(),
        project_root: &registry.project_root,
        work_dir: &registry.settings.work_dir,
        runtime: &descriptor.runtime,
        posargs: request.extra_args,
        requirements: request.requirements,
    };

    let cwd = descriptor
        .change_dir
        .as_ref()
        .map(|dir| registry.project_root.join(dir.render(&render)))
        .unwrap_or_else(|| registry.project_root.clone());

    if !request.extra_args.is_empty() && !descriptor.commands.iter().any(CommandTemplate::uses_posargs) {
        log::debug!(
            "'{}' declares no {{posargs}}; ignoring {} extra argument(s)",
            descriptor.name,
            request.extra_args.len()
        );
    }

    let mut first_failure: Option<(String, i32)> = None;
    for template in &descriptor.commands {
        let command = template.render(&render);
        request.sink.announce(&command);

        let code = match executor::execute_command(&command, &cwd, request.context.vars(), request.sink, cancellation_token) {
            Ok(code) => code,
            Err(ExecutionError::Cancelled) => return Err(ExecutionError::Cancelled),
            Err(e) => {
                request.sink.note(&e.to_string());
                SPAWN_FAILURE_CODE
            }
        };

        if code == 0 {
            continue;
        }
        if command.ignore_exit {
            request.sink.note(&format!("exit code {code} ignored"));
            continue;
        }

        request.sink.note(&format!("command failed with exit code {code}"));
        first_failure.get_or_insert((command.to_string(), code));
        if !descriptor.ignore_errors {
            break;
        }
    }

    let (outcome, exit_code) = match first_failure {
        Some((command, exit_code)) => (Outcome::CommandFailed { command, exit_code }, exit_code),
        None => (Outcome::Success, 0),
    };

    Ok(ExecutionResult {
        env: descriptor.name.clone(),
        outcome,
        exit_code,
        duration: request.started.elapsed(),
        log_path: request.log_path.clone(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, commands: &str, extra: &str) -> Registry {
        let src = format!(
            r#"
            env_list = ["unit"]
            [settings]
            work_dir = "work"
            [env.unit]
            commands = {commands}
            {extra}
            "#
        );
        Registry::from_toml_str(&src, dir.path()).unwrap()
    }

    /// Runs `unit` and returns its result together with the log content.
    fn run_unit(registry: &Registry, extra_args: &[String]) -> (ExecutionResult, String) {
        let descriptor = registry.get("unit").unwrap();
        let root = registry.context_dir("unit");
        fs::create_dir_all(&root).unwrap();
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        let context = IsolatedContext::new("unit", root.clone(), root.join("bin"), vars, false, false);

        let log_path = registry.log_file("unit");
        let sink = OutputSink::to_file(&log_path, false).unwrap();
        let request = RunRequest {
            registry,
            context: &context,
            requirements: &[],
            extra_args,
            sink: &sink,
            log_path: Some(log_path.clone()),
            started: Instant::now(),
        };
        let result = run(descriptor, &request, &Arc::new(AtomicBool::new(false))).unwrap();
        (result, fs::read_to_string(&log_path).unwrap())
    }

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let commands = format!(r#"["true", "sh -c 'exit 5'", "touch {}"]"#, marker.display());
        let registry = registry(&dir, &commands, "");

        let (result, log) = run_unit(&registry, &[]);
        assert_eq!(result.exit_code, 5);
        assert!(matches!(&result.outcome, Outcome::CommandFailed { exit_code: 5, .. }));
        assert!(!marker.exists());
        assert!(log.contains("$ true"));
        assert!(!log.contains("touch"));
    }

    #[test]
    fn test_ignore_errors_runs_everything_and_keeps_first_code() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let commands = format!(
            r#"["sh -c 'exit 4'", "sh -c 'exit 9'", "touch {}"]"#,
            marker.display()
        );
        let registry = registry(&dir, &commands, "ignore_errors = true");

        let (result, _) = run_unit(&registry, &[]);
        assert_eq!(result.exit_code, 4);
        assert!(marker.exists());
    }

    #[test]
    fn test_dash_prefix_ignores_exit_code() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, r#"["- sh -c 'exit 2'", "true"]"#, "");
        let (result, log) = run_unit(&registry, &[]);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.exit_code, 0);
        assert!(log.contains("exit code 2 ignored"));
    }

    #[test]
    fn test_posargs_spliced_or_dropped() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, r#"[["echo", "start", "{posargs}", "end"]]"#, "");

        let (_, log) = run_unit(&registry, &["-k".to_string(), "fast".to_string()]);
        assert!(log.contains("start -k fast end"));

        let (_, log) = run_unit(&registry, &[]);
        assert!(log.contains("start end"));
    }

    #[test]
    fn test_extra_args_ignored_without_placeholder() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, r#"[["echo", "fixed"]]"#, "");
        let (result, log) = run_unit(&registry, &["--unexpected".to_string()]);
        assert_eq!(result.exit_code, 0);
        assert!(!log.contains("--unexpected"));
    }

    #[test]
    fn test_missing_program_is_a_command_failure() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, r#"["envmatrix-no-such-tool --version"]"#, "");
        let (result, log) = run_unit(&registry, &[]);
        assert_eq!(result.exit_code, SPAWN_FAILURE_CODE);
        assert!(log.contains("could not be executed"));
    }

    #[test]
    fn test_change_dir_is_relative_to_project_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        let registry = registry(&dir, r#"["pwd"]"#, r#"change_dir = "tests""#);
        let (_, log) = run_unit(&registry, &[]);
        assert!(log.trim_end().ends_with("tests"));
    }
}
