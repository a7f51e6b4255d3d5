// src/system/context.rs

//! The isolated execution context of one environment.
//!
//! A context is a directory under the work dir plus the exact set of environment variables
//! its commands see. It is owned by a single unit of work and is never shared.

use crate::constants::{ALWAYS_PASSED_VARS, ENV_DIR_VAR, ENV_NAME_VAR};
use regex::Regex;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A provisioned environment directory and the variables its commands run with.
/// Removed on drop unless it is retained for reuse.
#[derive(Debug)]
pub struct IsolatedContext {
    env_name: String,
    root: PathBuf,
    bin_dir: PathBuf,
    vars: BTreeMap<String, String>,
    reused: bool,
    retain: bool,
}

impl IsolatedContext {
    pub(crate) fn new(
        env_name: &str,
        root: PathBuf,
        bin_dir: PathBuf,
        vars: BTreeMap<String, String>,
        reused: bool,
        retain: bool,
    ) -> Self {
        Self {
            env_name: env_name.to_string(),
            root,
            bin_dir,
            vars,
            reused,
            retain,
        }
    }

    /// The environment this context belongs to.
    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// The context directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the context's executables live. Prepended to `PATH`.
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// The complete environment of every process started in this context.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Whether a previous provision was reused instead of creating the context again.
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    /// Whether the directory survives this context being dropped.
    pub fn is_retained(&self) -> bool {
        self.retain
    }
}

impl Drop for IsolatedContext {
    fn drop(&mut self) {
        if self.retain {
            log::debug!("Keeping context '{}' for reuse", self.root.display());
            return;
        }
        log::debug!("Tearing down context '{}'", self.root.display());
        remove_dir_if_exists(&self.root);
    }
}

/// Removes a directory tree, ignoring a missing one and logging any other failure.
pub(crate) fn remove_dir_if_exists(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove '{}': {}", path.display(), e),
    }
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    let source = if cfg!(target_os = "windows") {
        format!("(?i)^{escaped}$")
    } else {
        format!("^{escaped}$")
    };
    Regex::new(&source).ok()
}

/// Filters the parent environment. `None` passes everything; otherwise only variables
/// matching one of the glob patterns, plus a few essentials, are kept.
pub fn filter_parent_env(
    parent: impl IntoIterator<Item = (String, String)>,
    pass_env: Option<&[String]>,
) -> BTreeMap<String, String> {
    let Some(patterns) = pass_env else {
        return parent.into_iter().collect();
    };

    let matchers: Vec<Regex> = patterns.iter().filter_map(|p| glob_to_regex(p)).collect();
    parent
        .into_iter()
        .filter(|(key, _)| {
            ALWAYS_PASSED_VARS
                .iter()
                .any(|essential| essential.eq_ignore_ascii_case(key))
                || matchers.iter().any(|m| m.is_match(key))
        })
        .collect()
}

/// Builds the full variable set of a context: the filtered parent environment, `PATH`
/// prefixed with the context's binary directory, layered `set_env` maps and the
/// `ENVMATRIX_*` identity variables.
pub fn build_vars<'a>(
    parent: impl IntoIterator<Item = (String, String)>,
    pass_env: Option<&[String]>,
    bin_dir: &Path,
    env_name: &str,
    env_dir: &Path,
    layers: impl IntoIterator<Item = &'a BTreeMap<String, String>>,
) -> Result<BTreeMap<String, String>, env::JoinPathsError> {
    let mut vars = filter_parent_env(parent, pass_env);

    let path_key = vars
        .keys()
        .find(|k| k.eq_ignore_ascii_case("PATH"))
        .cloned()
        .unwrap_or_else(|| "PATH".to_string());
    let existing = vars.get(&path_key).cloned().unwrap_or_default();
    let entries = std::iter::once(bin_dir.to_path_buf()).chain(env::split_paths(&existing));
    let joined = env::join_paths(entries)?;
    vars.insert(path_key, joined.to_string_lossy().into_owned());

    for layer in layers {
        vars.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    vars.insert(ENV_NAME_VAR.to_string(), env_name.to_string());
    vars.insert(ENV_DIR_VAR.to_string(), env_dir.to_string_lossy().into_owned());
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parent() -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/me".to_string()),
            ("CI".to_string(), "true".to_string()),
            ("AWS_SECRET".to_string(), "s3cr3t".to_string()),
            ("PIP_INDEX_URL".to_string(), "https://mirror".to_string()),
        ]
    }

    #[test]
    fn test_pass_everything_by_default() {
        let vars = filter_parent_env(parent(), None);
        assert_eq!(vars.len(), 5);
    }

    #[test]
    fn test_pass_env_globs() {
        let patterns = vec!["PIP_*".to_string(), "CI".to_string()];
        let vars = filter_parent_env(parent(), Some(patterns.as_slice()));
        assert!(vars.contains_key("PATH"));
        assert!(vars.contains_key("HOME"));
        assert!(vars.contains_key("CI"));
        assert!(vars.contains_key("PIP_INDEX_URL"));
        assert!(!vars.contains_key("AWS_SECRET"));
    }

    #[test]
    #[cfg(unix)]
    fn test_build_vars_layers_and_path() {
        let mut provision_layer = BTreeMap::new();
        provision_layer.insert("VIRTUAL_ENV".to_string(), "/w/unit".to_string());
        provision_layer.insert("CI".to_string(), "overridden-by-env".to_string());
        let mut env_layer = BTreeMap::new();
        env_layer.insert("CI".to_string(), "false".to_string());

        let vars = build_vars(
            parent(),
            None,
            Path::new("/w/unit/bin"),
            "unit",
            Path::new("/w/unit"),
            [&provision_layer, &env_layer],
        )
        .unwrap();

        assert_eq!(vars["PATH"], "/w/unit/bin:/usr/bin");
        assert_eq!(vars["VIRTUAL_ENV"], "/w/unit");
        assert_eq!(vars["CI"], "false");
        assert_eq!(vars[ENV_NAME_VAR], "unit");
        assert_eq!(vars[ENV_DIR_VAR], "/w/unit");
    }

    #[test]
    fn test_drop_removes_unretained_context() {
        let work = TempDir::new().unwrap();
        let root = work.path().join("unit");
        fs::create_dir_all(root.join("bin")).unwrap();

        let context = IsolatedContext::new("unit", root.clone(), root.join("bin"), BTreeMap::new(), false, false);
        assert!(!context.is_retained());
        drop(context);
        assert!(!root.exists());
    }

    #[test]
    fn test_drop_keeps_retained_context() {
        let work = TempDir::new().unwrap();
        let root = work.path().join("unit");
        fs::create_dir_all(&root).unwrap();

        let context = IsolatedContext::new("unit", root.clone(), root.join("bin"), BTreeMap::new(), true, true);
        assert!(context.was_reused());
        drop(context);
        assert!(root.exists());
    }
}
