//! # Environment Definition Registry
//!
//! Loads `envmatrix.toml`, validates it completely and compiles it into an ordered list of
//! immutable `EnvironmentDescriptor`s. Nothing is executed before loading succeeds, so an
//! invalid matrix never produces side effects.
//!
//! Validation covers:
//! - `env_list` entries (brace expansion, names, duplicates, emptiness).
//! - `[env.<name>]` sections that match no declared environment.
//! - Command lists (non-empty, each with a program name).
//! - Dependency group references and `include-group` cycles.

use crate::{
    core::{
        envlist::{self, EnvListError},
        paths::{self, PathError},
        resolver::{self, GroupError, UnknownGroupError},
        template::{CommandTemplate, TemplateError, ValueTemplate},
    },
    models::{CommandEntry, DependencyGroup, EnvSection, EnvironmentDescriptor, ProjectConfig, Requirement},
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;

/// Everything that makes a configuration unusable. Reported before anything runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file or a configured path could not be located.
    #[error(transparent)]
    Path(#[from] PathError),
    /// The configuration file could not be read.
    #[error("Could not read '{path}': {source}")]
    Io {
        /// The file that failed.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid TOML or has unknown keys.
    #[error("Error parsing TOML in '{path}': {source}")]
    TomlParse {
        /// The file that failed.
        path: String,
        /// The parser error.
        #[source]
        source: toml::de::Error,
    },
    /// `env_list` names no environment.
    #[error("The environment list is empty. Add names to `env_list`.")]
    EmptyEnvList,
    /// An `env_list` entry is malformed.
    #[error("Invalid `env_list` entry '{entry}': {reason}")]
    InvalidEnvListEntry {
        /// The entry as written.
        entry: String,
        /// Why it could not be expanded.
        reason: EnvListError,
    },
    /// Two entries expand to the same name.
    #[error("Environment '{0}' is declared more than once.")]
    DuplicateEnvironment(String),
    /// An `[env.X]` section with no matching `env_list` entry.
    #[error("Section [env.{0}] does not match any environment in `env_list`.")]
    UndeclaredEnvironment(String),
    /// An environment without commands.
    #[error("Environment '{0}' has no commands.")]
    EmptyCommands(String),
    /// A command that does not compile to a template.
    #[error("Environment '{env}', command #{index}: {reason}")]
    MalformedCommand {
        /// The environment.
        env: String,
        /// One-based position of the command.
        index: usize,
        /// What is wrong with it.
        reason: TemplateError,
    },
    /// A templated field that does not compile.
    #[error("Environment '{env}', field '{field}': {reason}")]
    InvalidField {
        /// The environment.
        env: String,
        /// The field name.
        field: &'static str,
        /// What is wrong with it.
        reason: TemplateError,
    },
    /// An installer template that does not compile.
    #[error("Provision step '{step}': {reason}")]
    InvalidProvisionStep {
        /// `create`, `install`, `install_project` or `set_env`.
        step: &'static str,
        /// What is wrong with it.
        reason: TemplateError,
    },
    /// A referenced dependency group does not exist.
    #[error(transparent)]
    UnknownGroup(#[from] UnknownGroupError),
    /// Group includes form a cycle.
    #[error("Dependency group '{0}' includes itself (through: {1}).")]
    GroupCycle(String, String),
    /// The work directory is the project root or one of its ancestors.
    #[error(
        "Work directory '{}' contains the project. Point `settings.work_dir` at a dedicated directory such as '.envmatrix'.",
        .0.display()
    )]
    UnsafeWorkDir(PathBuf),
    /// A selected name is not configured.
    #[error("Unknown environment '{0}'. Run `envmatrix list` to see the configured environments.")]
    UnknownEnvironment(String),
}

impl From<GroupError> for ConfigError {
    fn from(value: GroupError) -> Self {
        match value {
            GroupError::Unknown(e) => Self::UnknownGroup(e),
            GroupError::Cycle(group, path) => Self::GroupCycle(group, path),
        }
    }
}

/// Run-wide settings, with paths already resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Absolute work directory. Never contains the project root.
    pub work_dir: PathBuf,
    /// Always at least 1; a configured `0` means one worker per CPU.
    pub workers: usize,
    /// Keep contexts between runs.
    pub reuse: bool,
    /// Skip environments whose runtime is missing.
    pub skip_missing_runtimes: bool,
}

/// Compiled installer templates. `None` disables a step.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    /// Creates the empty context.
    pub create: Option<CommandTemplate>,
    /// Installs the resolved requirements.
    pub install: Option<CommandTemplate>,
    /// Installs the project itself.
    pub install_project: Option<CommandTemplate>,
    /// Executables directory relative to a context.
    pub bin_dir: String,
    /// Variables set for every context.
    pub set_env: BTreeMap<String, ValueTemplate>,
}

/// The validated, read-only matrix definition.
#[derive(Debug, Clone)]
pub struct Registry {
    /// Directory holding `envmatrix.toml`.
    pub project_root: PathBuf,
    /// Run-wide settings.
    pub settings: Settings,
    /// Installer templates.
    pub provision: ProvisionSpec,
    /// Flattened dependency groups by name.
    pub groups: HashMap<String, DependencyGroup>,
    descriptors: Vec<EnvironmentDescriptor>,
}

impl Registry {
    /// Finds `envmatrix.toml` from `start` upwards and loads it.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        let path = paths::find_config_file(start)?;
        Self::load_file(&path)
    }

    /// Loads a configuration file. Its directory becomes the project root.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let project_root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let project_root = dunce::canonicalize(&project_root).unwrap_or(project_root);

        let config: ProjectConfig = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: path.display().to_string(),
            source,
        })?;
        Self::load(config, project_root)
    }

    /// Parses and loads a configuration held in memory.
    pub fn from_toml_str(content: &str, project_root: &Path) -> Result<Self, ConfigError> {
        let config: ProjectConfig = toml::from_str(content).map_err(|source| ConfigError::TomlParse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::load(config, project_root.to_path_buf())
    }

    /// Validates a deserialized configuration and compiles every environment.
    pub fn load(config: ProjectConfig, project_root: PathBuf) -> Result<Self, ConfigError> {
        let names = expand_env_list(&config.env_list)?;
        let declared: HashSet<&str> = names.iter().map(String::as_str).collect();
        if let Some(stray) = config.env.keys().find(|name| !declared.contains(name.as_str())) {
            return Err(ConfigError::UndeclaredEnvironment(stray.clone()));
        }

        let groups = resolver::build_groups(&config.dependency_groups)?;

        let descriptors = names
            .iter()
            .map(|name| {
                let section = config.env_run_base.overlay(config.env.get(name));
                build_descriptor(name, &section, &config.settings.default_runtime)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for descriptor in &descriptors {
            resolver::validate_references(descriptor, &groups)?;
        }

        let work_dir = paths::expand_path_template(&config.settings.work_dir, &project_root)?;
        // Contexts are wiped by name, so the work dir must never overlap the project.
        if project_root.starts_with(&work_dir) {
            return Err(ConfigError::UnsafeWorkDir(work_dir));
        }

        let settings = Settings {
            work_dir,
            workers: worker_count(config.settings.workers),
            reuse: config.settings.reuse,
            skip_missing_runtimes: config.settings.skip_missing_runtimes,
        };
        let provision = build_provision_spec(&config)?;

        log::debug!(
            "Loaded {} environment(s) and {} dependency group(s) from '{}'",
            descriptors.len(),
            groups.len(),
            project_root.display()
        );

        Ok(Self {
            project_root,
            settings,
            provision,
            groups,
            descriptors,
        })
    }

    /// All environments, in declaration order.
    pub fn descriptors(&self) -> &[EnvironmentDescriptor] {
        &self.descriptors
    }

    /// Looks up one environment by name.
    pub fn get(&self, name: &str) -> Option<&EnvironmentDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Selects environments by name. Arguments may be comma-separated and use brace
    /// expansion. The result follows declaration order; an empty selection means all.
    pub fn select(&self, requested: &[String]) -> Result<Vec<&EnvironmentDescriptor>, ConfigError> {
        if requested.is_empty() {
            return Ok(self.descriptors.iter().collect());
        }

        let mut wanted = HashSet::new();
        for arg in requested {
            for part in split_selection(arg) {
                let expanded = envlist::expand_entry(part)
                    .map_err(|_| ConfigError::UnknownEnvironment(part.to_string()))?;
                for name in expanded {
                    if self.get(&name).is_none() {
                        return Err(ConfigError::UnknownEnvironment(name));
                    }
                    wanted.insert(name);
                }
            }
        }

        Ok(self
            .descriptors
            .iter()
            .filter(|d| wanted.contains(&d.name))
            .collect())
    }

    /// Directory of an environment's isolated context.
    pub fn context_dir(&self, env_name: &str) -> PathBuf {
        paths::context_dir(&self.settings.work_dir, env_name)
    }

    /// Log file of an environment.
    pub fn log_file(&self, env_name: &str) -> PathBuf {
        paths::log_file(&self.settings.work_dir, env_name)
    }
}

/// Turns a requested worker count into an effective one: `0` means one worker per CPU.
pub fn worker_count(requested: usize) -> usize {
    match requested {
        0 => thread::available_parallelism().map_or(1, NonZeroUsize::get),
        n => n,
    }
}

/// Splits a selection argument on commas that are not inside braces.
fn split_selection(arg: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in arg.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.extend(arg.get(start..i));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.extend(arg.get(start..));
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

fn expand_env_list(entries: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    for entry in entries {
        let expanded = envlist::expand_entry(entry).map_err(|reason| ConfigError::InvalidEnvListEntry {
            entry: entry.clone(),
            reason,
        })?;
        for name in expanded {
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateEnvironment(name));
            }
            names.push(name);
        }
    }

    if names.is_empty() {
        return Err(ConfigError::EmptyEnvList);
    }
    Ok(names)
}

fn compile_command(entry: &CommandEntry) -> Result<CommandTemplate, TemplateError> {
    match entry {
        CommandEntry::Argv(argv) => CommandTemplate::from_argv(argv),
        CommandEntry::Line(line) => CommandTemplate::from_line(line),
    }
}

fn build_descriptor(
    name: &str,
    section: &EnvSection,
    default_runtime: &str,
) -> Result<EnvironmentDescriptor, ConfigError> {
    let entries = section.commands.as_deref().unwrap_or_default();
    if entries.is_empty() {
        return Err(ConfigError::EmptyCommands(name.to_string()));
    }
    let commands = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            compile_command(entry).map_err(|reason| ConfigError::MalformedCommand {
                env: name.to_string(),
                index: i + 1,
                reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let invalid_field = |field: &'static str| {
        move |reason| ConfigError::InvalidField {
            env: name.to_string(),
            field,
            reason,
        }
    };

    let set_env = section
        .set_env
        .iter()
        .flatten()
        .map(|(key, value)| {
            ValueTemplate::parse(value, "a set_env value")
                .map(|template| (key.clone(), template))
                .map_err(invalid_field("set_env"))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let change_dir = section
        .change_dir
        .as_deref()
        .map(|raw| ValueTemplate::parse(raw, "change_dir").map_err(invalid_field("change_dir")))
        .transpose()?;

    let runtime = section
        .runtime
        .clone()
        .or_else(|| envlist::runtime_from_name(name))
        .unwrap_or_else(|| default_runtime.to_string());

    Ok(EnvironmentDescriptor {
        name: name.to_string(),
        description: section.description.clone(),
        runtime,
        package: section.package.unwrap_or(true),
        dependency_groups: section.dependency_groups.clone().unwrap_or_default(),
        extra_requirements: section
            .deps
            .iter()
            .flatten()
            .map(|spec| Requirement::parse(spec))
            .collect(),
        commands,
        set_env,
        pass_env: section.pass_env.clone(),
        change_dir,
        ignore_errors: section.ignore_errors.unwrap_or(false),
    })
}

fn build_provision_spec(config: &ProjectConfig) -> Result<ProvisionSpec, ConfigError> {
    let step = |name: &'static str, argv: &[String]| -> Result<Option<CommandTemplate>, ConfigError> {
        if argv.is_empty() {
            return Ok(None);
        }
        CommandTemplate::from_argv(argv)
            .map(Some)
            .map_err(|reason| ConfigError::InvalidProvisionStep { step: name, reason })
    };

    let raw = &config.provision;
    let set_env = raw
        .set_env
        .iter()
        .map(|(key, value)| {
            ValueTemplate::parse(value, "a set_env value")
                .map(|template| (key.clone(), template))
                .map_err(|reason| ConfigError::InvalidProvisionStep { step: "set_env", reason })
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(ProvisionSpec {
        create: step("create", &raw.create)?,
        install: step("install", &raw.install)?,
        install_project: step("install_project", &raw.install_project)?,
        bin_dir: raw.bin_dir.clone(),
        set_env,
    })
}
