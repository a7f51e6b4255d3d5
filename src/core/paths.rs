// src/core/paths.rs

//! Configuration discovery and the on-disk layout of the work directory.

use crate::constants::{CONFIG_FILENAME, LOGS_DIRNAME};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors locating the configuration or expanding a configured path.
#[derive(Error, Debug)]
pub enum PathError {
    /// No configuration file in the start directory or above it.
    #[error("No '{file}' found in '{start}' or any of its parent directories.")]
    ConfigNotFound {
        /// The file name searched for.
        file: &'static str,
        /// Where the search started.
        start: String,
    },
    /// A `~` or `$VAR` in a path could not be expanded.
    #[error("Could not expand path template '{template}': {reason}")]
    Expansion {
        /// The template as configured.
        template: String,
        /// Why expansion failed.
        reason: String,
    },
}

/// Walks from `start` up to the filesystem root looking for `envmatrix.toml`.
pub fn find_config_file(start: &Path) -> Result<PathBuf, PathError> {
    let found = start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILENAME))
        .find(|candidate| candidate.is_file());

    match found {
        Some(path) => {
            log::debug!("Found configuration at '{}'", path.display());
            Ok(path)
        }
        None => Err(PathError::ConfigNotFound {
            file: CONFIG_FILENAME,
            start: start.display().to_string(),
        }),
    }
}

/// Expands a path template (`~`, `$VAR`) and anchors relative results at `base`.
///
/// # Arguments
/// * `template` - The template string (e.g., "~/.cache/envmatrix" or ".envmatrix").
/// * `base` - The directory relative paths are resolved against (the project root).
pub fn expand_path_template(template: &str, base: &Path) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;

    let path = PathBuf::from(expanded.into_owned());
    let absolute = if path.is_absolute() { path } else { base.join(path) };
    Ok(dunce::simplified(&normalize(&absolute)).to_path_buf())
}

/// Resolves `.` and `..` lexically, so `/project/..` compares as `/`.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The directory holding one environment's isolated context.
pub fn context_dir(work_dir: &Path, env_name: &str) -> PathBuf {
    work_dir.join(env_name)
}

/// The log file capturing one environment's provisioning and command output.
pub fn log_file(work_dir: &Path, env_name: &str) -> PathBuf {
    work_dir.join(LOGS_DIRNAME).join(format!("{env_name}.log"))
}
