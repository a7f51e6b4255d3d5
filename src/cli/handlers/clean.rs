// src/cli/handlers/clean.rs

//! `envmatrix clean`.

use crate::{
    cli::{GlobalOptions, args::CleanArgs, handlers::commons},
    constants::EXIT_SUCCESS,
    core::registry::Registry,
    system::context,
};
use anyhow::Result;
use colored::*;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Removes provisioned contexts and logs. Without names the whole work directory goes.
pub fn handle(global: &GlobalOptions, args: CleanArgs) -> Result<i32> {
    let registry = commons::load_registry(global.config.as_deref())?;
    let removed = clean(&registry, &args.envs)?;
    if removed.is_empty() {
        println!("{}", "Nothing to clean.".dimmed());
    }
    for name in removed {
        println!("{} {}", "removed".yellow(), name);
    }
    Ok(EXIT_SUCCESS)
}

/// Cleans the selected environments and returns what was removed.
fn clean(registry: &Registry, envs: &[String]) -> Result<Vec<String>> {
    let work_dir = &registry.settings.work_dir;
    // The registry refuses work dirs that contain the project, so removing it is safe.
    if envs.is_empty() {
        if !work_dir.exists() {
            return Ok(Vec::new());
        }
        log::debug!("Removing work directory '{}'", work_dir.display());
        context::remove_dir_if_exists(work_dir);
        return Ok(vec![work_dir.display().to_string()]);
    }

    let mut removed = Vec::new();
    for descriptor in registry.select(envs)? {
        let dir = registry.context_dir(&descriptor.name);
        let had_dir = dir.exists();
        context::remove_dir_if_exists(&dir);
        let had_log = remove_file_if_exists(&registry.log_file(&descriptor.name));
        if had_dir || had_log {
            removed.push(descriptor.name.clone());
        }
    }
    Ok(removed)
}

fn remove_file_if_exists(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("Failed to remove '{}': {}", path.display(), e);
            false
        }
    }
}
