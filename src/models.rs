// src/models.rs

//! Configuration file models, validated runtime descriptors and run results.

use crate::core::template::{CommandTemplate, ValueTemplate};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

// --- `envmatrix.toml` MODELS (What is read from the configuration file) ---

/// Represents the deserialized structure of an `envmatrix.toml` file.
/// It is validated and compiled into a `Registry` before anything runs.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Ordered environment names; entries may use brace expansion (`py{39,311}-unit`).
    #[serde(default)]
    pub env_list: Vec<String>,
    /// The `[settings]` table.
    #[serde(default)]
    pub settings: SettingsConfig,
    /// The `[provision]` table with the installer templates.
    #[serde(default)]
    pub provision: ProvisionConfig,
    /// Named requirement lists from `[dependency-groups]`.
    #[serde(default, rename = "dependency-groups")]
    pub dependency_groups: HashMap<String, Vec<GroupEntry>>,
    /// Settings inherited by every environment.
    #[serde(default)]
    pub env_run_base: EnvSection,
    /// Per-environment overrides, keyed by environment name.
    #[serde(default)]
    pub env: BTreeMap<String, EnvSection>,
}

/// The `[settings]` table. Missing keys take their defaults.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct SettingsConfig {
    /// Environments run at once. `0` means one per CPU.
    pub workers: usize,
    /// Where contexts and logs live. Relative paths are anchored at the project root.
    pub work_dir: String,
    /// Keep provisioned contexts between runs.
    pub reuse: bool,
    /// Report a missing runtime as skipped instead of failed.
    pub skip_missing_runtimes: bool,
    /// Runtime for environments whose name does not imply one.
    pub default_runtime: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            work_dir: crate::constants::DEFAULT_WORK_DIR.to_string(),
            reuse: true,
            skip_missing_runtimes: false,
            default_runtime: crate::constants::DEFAULT_RUNTIME.to_string(),
        }
    }
}

/// Installer command templates. An empty list disables the step.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct ProvisionConfig {
    /// Creates an empty context in `{env_dir}`.
    pub create: Vec<String>,
    /// Installs `{requirements}` into the context.
    pub install: Vec<String>,
    /// Installs the project itself.
    pub install_project: Vec<String>,
    /// Executables directory inside a context, relative to it.
    pub bin_dir: String,
    /// Variables set for every provisioned context.
    pub set_env: BTreeMap<String, String>,
}

impl Default for ProvisionConfig {
    /// A plain `venv` + `pip` setup.
    fn default() -> Self {
        let words = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut set_env = BTreeMap::new();
        set_env.insert("VIRTUAL_ENV".to_string(), "{env_dir}".to_string());

        Self {
            create: words(&["{runtime}", "-m", "venv", "{env_dir}"]),
            install: words(&["{env_bin}/python", "-m", "pip", "install", "{requirements}"]),
            install_project: words(&["{env_bin}/python", "-m", "pip", "install", "{project_root}"]),
            bin_dir: if cfg!(target_os = "windows") {
                "Scripts".to_string()
            } else {
                "bin".to_string()
            },
            set_env,
        }
    }
}

/// An entry of a `[dependency-groups]` list: a requirement specifier or an include.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum GroupEntry {
    /// A requirement specifier such as `pytest>=8`.
    Requirement(String),
    /// `{ include-group = "name" }`
    Include {
        /// Name of the included group.
        #[serde(rename = "include-group")]
        include_group: String,
    },
}

/// A command in `envmatrix.toml`. Uses `untagged` for flexible syntax.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandEntry {
    /// An argument vector, used verbatim.
    Argv(Vec<String>),
    /// A shell-like line, split into words once at load time.
    Line(String),
}

/// One `[env.<name>]` (or `[env_run_base]`) section. Every field is optional so that
/// an environment section overrides the base section field by field.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EnvSection {
    /// Shown by `list -v`.
    pub description: Option<String>,
    /// Interpreter to provision with, such as `python3.11`.
    pub runtime: Option<String>,
    /// Install the project itself.
    pub package: Option<bool>,
    /// Groups to install, in order.
    pub dependency_groups: Option<Vec<String>>,
    /// Inline requirements, installed after the groups.
    pub deps: Option<Vec<String>>,
    /// Commands run in order; the first failure stops the rest.
    pub commands: Option<Vec<CommandEntry>>,
    /// Extra variables; merged with the base section.
    pub set_env: Option<BTreeMap<String, String>>,
    /// Glob patterns of parent variables to keep.
    pub pass_env: Option<Vec<String>>,
    /// Working directory for commands. Defaults to the project root.
    pub change_dir: Option<String>,
    /// Keep running after a failing command.
    pub ignore_errors: Option<bool>,
}

impl EnvSection {
    /// Layers `over` on top of `self`. `set_env` maps are merged, every other field
    /// is replaced when present in `over`.
    pub fn overlay(&self, over: Option<&Self>) -> Self {
        let Some(over) = over else {
            return self.clone();
        };

        let set_env = match (&self.set_env, &over.set_env) {
            (Some(base), Some(top)) => {
                let mut merged = base.clone();
                merged.extend(top.iter().map(|(k, v)| (k.clone(), v.clone())));
                Some(merged)
            }
            (base, top) => top.clone().or_else(|| base.clone()),
        };

        Self {
            description: over.description.clone().or_else(|| self.description.clone()),
            runtime: over.runtime.clone().or_else(|| self.runtime.clone()),
            package: over.package.or(self.package),
            dependency_groups: over
                .dependency_groups
                .clone()
                .or_else(|| self.dependency_groups.clone()),
            deps: over.deps.clone().or_else(|| self.deps.clone()),
            commands: over.commands.clone().or_else(|| self.commands.clone()),
            set_env,
            pass_env: over.pass_env.clone().or_else(|| self.pass_env.clone()),
            change_dir: over.change_dir.clone().or_else(|| self.change_dir.clone()),
            ignore_errors: over.ignore_errors.or(self.ignore_errors),
        }
    }
}

// --- RUNTIME MODELS (Validated, immutable after load) ---

/// A single requirement specifier and the key used to de-duplicate it.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized package name, or the whole specifier when no name can be parsed.
    pub key: String,
    /// The specifier exactly as written.
    pub spec: String,
}

/// A named, reusable set of requirements. Includes are already flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGroup {
    /// Group name as declared.
    pub name: String,
    /// Flattened requirements, includes resolved.
    pub requirements: Vec<Requirement>,
}

/// A fully validated environment definition.
#[derive(Debug, Clone)]
pub struct EnvironmentDescriptor {
    /// Unique environment name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Runtime the context is provisioned with.
    pub runtime: String,
    /// Install the project itself, not only its dependencies.
    pub package: bool,
    /// Group names, in installation order.
    pub dependency_groups: Vec<String>,
    /// Inline `deps`, appended after the groups.
    pub extra_requirements: Vec<Requirement>,
    /// Never empty.
    pub commands: Vec<CommandTemplate>,
    /// Variables set for commands, rendered per context.
    pub set_env: BTreeMap<String, ValueTemplate>,
    /// Glob patterns of parent variables to pass through; `None` passes everything.
    pub pass_env: Option<Vec<String>>,
    /// Working directory template for commands.
    pub change_dir: Option<ValueTemplate>,
    /// Run every command even after a failure.
    pub ignore_errors: bool,
}

// --- RESULT MODELS ---

/// How a single environment ended.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Every command exited with 0 or had its failure ignored.
    Success,
    /// The runtime was missing and `skip_missing_runtimes` is on.
    Skipped {
        /// Why the environment was skipped.
        reason: String,
    },
    /// Provisioning failed; no command ran.
    ProvisionFailed {
        /// The provisioning error.
        reason: String,
    },
    /// A command exited non-zero and stopped the environment.
    CommandFailed {
        /// The failing command, quoted for display.
        command: String,
        /// Its exit code.
        exit_code: i32,
    },
}

/// The record of one environment's run. Built once by the matrix executor.
#[derive(Serialize, Debug, Clone)]
pub struct ExecutionResult {
    /// Environment name.
    pub env: String,
    /// How it ended.
    pub outcome: Outcome,
    /// `0` on success, otherwise the code of the failing step.
    pub exit_code: i32,
    /// Wall time for provisioning and commands.
    #[serde(rename = "duration_secs", serialize_with = "serialize_duration_secs")]
    pub duration: Duration,
    /// Log file of this environment, when one was written.
    pub log_path: Option<PathBuf>,
}

impl ExecutionResult {
    /// Skipped environments count as successful.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success | Outcome::Skipped { .. })
    }
}

/// The ordered results of one invocation.
#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    /// Unique id of this invocation.
    pub run_id: Uuid,
    /// Every selected environment, in declaration order.
    pub selected: Vec<String>,
    /// In declaration order, regardless of completion order.
    pub results: Vec<ExecutionResult>,
    /// Selected environments that did not complete because the run was cancelled.
    pub not_completed: Vec<String>,
    /// Set when cancellation left at least one environment without a result.
    pub incomplete: bool,
}

impl RunReport {
    /// Success iff the run completed and every environment succeeded.
    pub fn is_success(&self) -> bool {
        !self.incomplete && self.results.iter().all(ExecutionResult::is_success)
    }

    /// The process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        use crate::constants::{EXIT_ENV_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
        if self.incomplete {
            EXIT_INTERRUPTED
        } else if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_ENV_FAILURE
        }
    }
}

fn serialize_duration_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
