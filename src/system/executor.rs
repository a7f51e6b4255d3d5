// src/system/executor.rs

//! Spawning one external process with an exact environment and capturing its output.

use crate::{CancellationToken, core::template::RenderedCommand, is_cancelled};
use colored::Colorize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Why a process could not be run to completion.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The rendered program name is empty.
    #[error("No command specified to run.")]
    EmptyCommand,
    /// The process could not be spawned or waited on.
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, #[source] io::Error),
    /// Cancellation was raised; the process was killed.
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Where a command's output goes: an optional log file, optionally echoed to the terminal.
#[derive(Debug, Clone)]
pub struct OutputSink {
    log: Option<Arc<Mutex<File>>>,
    echo: bool,
}

impl OutputSink {
    /// Truncates (or creates) `path` and writes everything there.
    pub fn to_file(path: &Path, echo: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            log: Some(Arc::new(Mutex::new(file))),
            echo,
        })
    }

    /// Echo to the terminal only.
    pub fn terminal() -> Self {
        Self { log: None, echo: true }
    }

    /// Whether output also goes to the terminal.
    pub fn echoes(&self) -> bool {
        self.echo
    }

    /// Records a command about to run.
    pub fn announce(&self, command: &RenderedCommand) {
        self.write_log(format!("$ {}\n", command).as_bytes());
        if self.echo {
            println!("{} {}", "→".blue(), command.to_string().green());
        }
    }

    /// Records an informational line (exit codes, skipped steps, spawn errors).
    pub fn note(&self, message: &str) {
        self.write_log(format!("# {}\n", message).as_bytes());
        if self.echo {
            println!("{}", message.dimmed());
        }
    }

    fn write_chunk(&self, bytes: &[u8], stream: Stream) {
        self.write_log(bytes);
        if self.echo {
            let result = match stream {
                Stream::Stdout => io::stdout().lock().write_all(bytes),
                Stream::Stderr => io::stderr().lock().write_all(bytes),
            };
            if let Err(e) = result {
                log::trace!("Failed to echo output: {}", e);
            }
        }
    }

    fn write_log(&self, bytes: &[u8]) {
        if let Some(log) = &self.log {
            match log.lock() {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(bytes) {
                        log::warn!("Failed to write to log file: {}", e);
                    }
                }
                Err(_) => log::warn!("Log file lock poisoned; output dropped."),
            }
        }
    }
}

/// Copies a child's pipe into the sink until EOF.
fn pump<R: Read + Send + 'static>(mut reader: R, sink: OutputSink, stream: Stream) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 8192];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => sink.write_chunk(buffer.get(..n).unwrap_or_default(), stream),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("Stopped reading child output: {}", e);
                    break;
                }
            }
        }
    })
}

/// Maps an exit status to a shell-style code. A process killed by a signal reports `128 + signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

fn spawn(
    command: &RenderedCommand,
    cwd: &Path,
    env_vars: &BTreeMap<String, String>,
) -> Result<Child, ExecutionError> {
    let clean_cwd = dunce::simplified(cwd);
    let build = |program: &str, args: &[String]| {
        let mut cmd = StdCommand::new(program);
        cmd.args(args)
            .current_dir(clean_cwd)
            .env_clear()
            .envs(env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    };

    // Fallback logic for Windows built-in commands like `echo`.
    // We try to spawn directly first. If it fails with `NotFound`, we try with `cmd /C`.
    match build(&command.program, &command.args).spawn() {
        Ok(child) => Ok(child),
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", command.program);
            let mut args = vec!["/C".to_string(), command.program.clone()];
            args.extend(command.args.iter().cloned());
            build("cmd", &args)
                .spawn()
                .map_err(|e| ExecutionError::CommandFailed(command.to_string(), e))
        }
        Err(e) => Err(ExecutionError::CommandFailed(command.to_string(), e)),
    }
}

/// Executes a single command to completion and returns its exit code.
///
/// Output is pumped into `sink` by two reader threads. A non-zero exit is not an error
/// here; interpreting it is the caller's job. If the cancellation token is raised while
/// the process runs, it is killed and `ExecutionError::Cancelled` is returned.
pub fn execute_command(
    command: &RenderedCommand,
    cwd: &Path,
    env_vars: &BTreeMap<String, String>,
    sink: &OutputSink,
    cancellation_token: &CancellationToken,
) -> Result<i32, ExecutionError> {
    if command.program.trim().is_empty() {
        return Err(ExecutionError::EmptyCommand);
    }
    if is_cancelled(cancellation_token) {
        return Err(ExecutionError::Cancelled);
    }

    log::trace!("Spawning {:?} {:?} in '{}'", command.program, command.args, cwd.display());
    let mut child = spawn(command, cwd, env_vars)?;

    let readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|out| pump(out, sink.clone(), Stream::Stdout)),
        child.stderr.take().map(|err| pump(err, sink.clone(), Stream::Stderr)),
    ]
    .into_iter()
    .flatten()
    .collect();

    // Non-blocking wait loop to allow for cancellation.
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                for reader in readers {
                    if reader.join().is_err() {
                        log::warn!("Output reader thread panicked for '{}'", command);
                    }
                }
                return Ok(exit_code_of(status));
            }
            Ok(None) => {
                if is_cancelled(cancellation_token) {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    // Reap the process; the reader threads end when the pipes close.
                    child.wait().ok();
                    return Err(ExecutionError::Cancelled);
                }
                // Wait briefly to avoid a tight loop consuming CPU.
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(ExecutionError::CommandFailed(command.to_string(), e));
            }
        }
    }
}
