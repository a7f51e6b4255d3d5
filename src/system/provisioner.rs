// src/system/provisioner.rs

//! # Isolation Provisioner
//!
//! Produces one `IsolatedContext` per environment and installs its resolved requirements
//! through the configured installer templates.
//!
//! Provisioning steps, in order:
//! 1. Check that the environment's runtime exists.
//! 2. Compare the requirement fingerprint with the record of the last successful provision.
//!    On a match (and unless `recreate` is set) the context is reused as is.
//! 3. Otherwise wipe the directory, run `create`, then `install` with the requirements.
//!    A scope guard removes the directory again on every failure path, cancellation included.
//! 4. Run `install_project` when the environment installs the project itself.
//!
//! Failures are terminal for the environment and never retried.

use crate::{
    CancellationToken,
    core::{
        fingerprint::{self, FingerprintError, ProvisionRecord},
        registry::Registry,
        template::{CommandTemplate, RenderContext, ValueTemplate},
    },
    models::{EnvironmentDescriptor, Requirement},
    system::{
        context::{self, IsolatedContext},
        executor::{self, ExecutionError, OutputSink},
    },
};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Why a context could not be provisioned. Always terminal for the environment.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The runtime is neither a path nor an executable on `PATH`.
    #[error("Runtime '{0}' was not found.")]
    RuntimeNotFound(String),
    /// The context directory could not be wiped or created.
    #[error("Could not prepare context directory '{path}': {source}")]
    Io {
        /// The directory.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// An installer step exited non-zero.
    #[error("The {step} step failed: `{command}` exited with code {code}.")]
    StepFailed {
        /// `create`, `install` or `install_project`.
        step: &'static str,
        /// The rendered command.
        command: String,
        /// Its exit code.
        code: i32,
    },
    /// An installer step could not be started.
    #[error("The {step} step could not run: {source}")]
    Spawn {
        /// The step.
        step: &'static str,
        /// The executor error.
        #[source]
        source: ExecutionError,
    },
    /// The provision record could not be written.
    #[error("Could not write the provision record: {0}")]
    Record(#[from] FingerprintError),
    /// `PATH` could not be rebuilt with the context's executables first.
    #[error("Could not assemble the environment variables: {0}")]
    Environment(#[from] env::JoinPathsError),
    /// Cancellation was raised mid-provision.
    #[error("Provisioning was cancelled.")]
    Cancelled,
}

impl ProvisionError {
    /// The installer's exit code, when a step ran and failed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::StepFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Per-run provisioning switches.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionOptions {
    /// Keep contexts after the run and reuse them when the fingerprint matches.
    pub reuse: bool,
    /// Ignore any recorded fingerprint and provision from scratch.
    pub recreate: bool,
}

/// Builds isolated contexts from the registry's installer templates.
#[derive(Debug)]
pub struct Provisioner<'a> {
    registry: &'a Registry,
    options: ProvisionOptions,
}

/// Checks whether a runtime is an existing path or an executable on `PATH`.
pub fn runtime_available(runtime: &str) -> bool {
    let as_path = Path::new(runtime);
    if as_path.components().count() > 1 {
        return as_path.is_file();
    }
    let Some(path_var) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path_var).any(|dir| {
        dir.join(runtime).is_file()
            || (cfg!(target_os = "windows") && dir.join(format!("{runtime}.exe")).is_file())
    })
}

impl<'a> Provisioner<'a> {
    /// A provisioner for one run.
    pub fn new(registry: &'a Registry, options: ProvisionOptions) -> Self {
        Self { registry, options }
    }

    /// Creates (or reuses) the isolated context of `descriptor` with `requirements` installed.
    pub fn provision(
        &self,
        descriptor: &EnvironmentDescriptor,
        requirements: &[Requirement],
        sink: &OutputSink,
        cancellation_token: &CancellationToken,
    ) -> Result<IsolatedContext, ProvisionError> {
        if !runtime_available(&descriptor.runtime) {
            return Err(ProvisionError::RuntimeNotFound(descriptor.runtime.clone()));
        }

        let spec = &self.registry.provision;
        let env_dir = self.registry.context_dir(&descriptor.name);
        let bin_dir = env_dir.join(&spec.bin_dir);
        let specs: Vec<String> = requirements.iter().map(|r| r.spec.clone()).collect();
        let render = RenderContext {
            env_name: &descriptor.name,
            env_dir: &env_dir,
            env_bin: &bin_dir,
            project_root: &self.registry.project_root,
            work_dir: &self.registry.settings.work_dir,
            runtime: &descriptor.runtime,
            posargs: &[],
            requirements: &specs,
        };

        let vars = self.context_vars(descriptor, &env_dir, &bin_dir, &render)?;
        let fingerprint = fingerprint::compute(&descriptor.runtime, requirements, spec);
        let reused = self.options.reuse
            && !self.options.recreate
            && fingerprint::read_record(&env_dir).is_some_and(|record| record.fingerprint == fingerprint);

        if reused {
            log::debug!("Reusing context for '{}' (fingerprint {})", descriptor.name, fingerprint);
            sink.note(&format!("reusing provisioned context {}", env_dir.display()));
        } else {
            log::debug!("Provisioning '{}' into '{}'", descriptor.name, env_dir.display());
            context::remove_dir_if_exists(&env_dir);
            fs::create_dir_all(&env_dir).map_err(|source| io_error(&env_dir, source))?;

            // Tear the half-built directory down on any early return below.
            let guard = scopeguard::guard(env_dir.clone(), |dir| {
                log::debug!("Removing partially provisioned context '{}'", dir.display());
                context::remove_dir_if_exists(&dir);
            });

            self.run_step("create", spec.create.as_ref(), &render, &vars, sink, cancellation_token)?;
            if specs.is_empty() {
                sink.note("no requirements to install");
            } else {
                self.run_step("install", spec.install.as_ref(), &render, &vars, sink, cancellation_token)?;
            }

            if self.options.reuse {
                let record = ProvisionRecord::new(fingerprint, &descriptor.runtime, requirements);
                fingerprint::write_record(&env_dir, &record)?;
            }
            scopeguard::ScopeGuard::into_inner(guard);
        }

        let context = IsolatedContext::new(
            &descriptor.name,
            env_dir.clone(),
            bin_dir.clone(),
            vars,
            reused,
            self.options.reuse,
        );

        if descriptor.package {
            self.run_step(
                "install_project",
                self.registry.provision.install_project.as_ref(),
                &render,
                context.vars(),
                sink,
                cancellation_token,
            )?;
        }
        Ok(context)
    }

    fn context_vars(
        &self,
        descriptor: &EnvironmentDescriptor,
        env_dir: &Path,
        bin_dir: &Path,
        render: &RenderContext<'_>,
    ) -> Result<BTreeMap<String, String>, ProvisionError> {
        let render_layer = |templates: &BTreeMap<String, ValueTemplate>| {
            templates
                .iter()
                .map(|(key, value)| (key.clone(), value.render(render)))
                .collect::<BTreeMap<_, _>>()
        };
        let provision_layer = render_layer(&self.registry.provision.set_env);
        let env_layer = render_layer(&descriptor.set_env);

        Ok(context::build_vars(
            parent_env(),
            descriptor.pass_env.as_deref(),
            bin_dir,
            &descriptor.name,
            env_dir,
            [&provision_layer, &env_layer],
        )?)
    }

    fn run_step(
        &self,
        step: &'static str,
        template: Option<&CommandTemplate>,
        render: &RenderContext<'_>,
        vars: &BTreeMap<String, String>,
        sink: &OutputSink,
        cancellation_token: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let Some(template) = template else {
            log::trace!("Provision step '{}' is disabled", step);
            return Ok(());
        };

        let command = template.render(render);
        sink.announce(&command);
        let code = executor::execute_command(
            &command,
            &self.registry.project_root,
            vars,
            sink,
            cancellation_token,
        )
        .map_err(|source| match source {
            ExecutionError::Cancelled => ProvisionError::Cancelled,
            source => ProvisionError::Spawn { step, source },
        })?;

        if code != 0 && !command.ignore_exit {
            sink.note(&format!("{step} exited with code {code}"));
            return Err(ProvisionError::StepFailed {
                step,
                command: command.to_string(),
                code,
            });
        }
        Ok(())
    }
}

/// The parent environment. Variables that are not valid Unicode cannot be passed through.
fn parent_env() -> impl Iterator<Item = (String, String)> {
    env::vars_os().filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

fn io_error(path: &Path, source: std::io::Error) -> ProvisionError {
    ProvisionError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::constants::PROVISION_RECORD_FILENAME;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// An installer that records what it was asked to install inside the context.
    const FAKE_INSTALLER: &str = r#"
        env_list = ["unit", "lint"]

        [settings]
        work_dir = "work"
        default_runtime = "sh"

        [provision]
        create = ["sh", "-c", "mkdir -p {env_bin} && echo created >> {env_dir}/events"]
        install = ["sh", "-c", "for r in \"$@\"; do echo \"$r\" >> {env_dir}/installed; done", "install", "{requirements}"]
        install_project = ["sh", "-c", "echo project >> {env_dir}/events"]

        [dependency-groups]
        test = ["pytest"]
        lint = ["ruff"]

        [env.unit]
        dependency_groups = ["test"]
        commands = ["true"]

        [env.lint]
        package = false
        dependency_groups = ["lint"]
        commands = ["true"]
    "#;

    fn registry(dir: &TempDir, src: &str) -> Registry {
        Registry::from_toml_str(src, dir.path()).unwrap()
    }

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    fn provision(
        registry: &Registry,
        name: &str,
        options: ProvisionOptions,
    ) -> Result<IsolatedContext, ProvisionError> {
        provision_until(registry, name, options, &token())
    }

    fn provision_until(
        registry: &Registry,
        name: &str,
        options: ProvisionOptions,
        cancellation_token: &CancellationToken,
    ) -> Result<IsolatedContext, ProvisionError> {
        let descriptor = registry.get(name).unwrap();
        let requirements = crate::core::resolver::resolve(descriptor, &registry.groups).unwrap();
        let sink = OutputSink::to_file(&registry.log_file(name), false).unwrap();
        Provisioner::new(registry, options).provision(descriptor, &requirements, &sink, cancellation_token)
    }

    const REUSE: ProvisionOptions = ProvisionOptions {
        reuse: true,
        recreate: false,
    };

    #[test]
    fn test_contexts_are_isolated() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, FAKE_INSTALLER);

        let unit = provision(&registry, "unit", REUSE).unwrap();
        let lint = provision(&registry, "lint", REUSE).unwrap();
        assert_ne!(unit.root(), lint.root());

        let unit_installed = fs::read_to_string(unit.root().join("installed")).unwrap();
        let lint_installed = fs::read_to_string(lint.root().join("installed")).unwrap();
        assert_eq!(unit_installed.trim(), "pytest");
        assert_eq!(lint_installed.trim(), "ruff");

        assert!(unit.vars()["PATH"].starts_with(&unit.bin_dir().to_string_lossy().into_owned()));
        assert_eq!(unit.vars()["VIRTUAL_ENV"], unit.root().to_string_lossy());
    }

    #[test]
    fn test_package_flag_controls_project_install() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, FAKE_INSTALLER);

        let unit = provision(&registry, "unit", REUSE).unwrap();
        let lint = provision(&registry, "lint", REUSE).unwrap();
        assert!(fs::read_to_string(unit.root().join("events")).unwrap().contains("project"));
        assert!(!fs::read_to_string(lint.root().join("events")).unwrap().contains("project"));
    }

    #[test]
    fn test_matching_fingerprint_skips_install() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, FAKE_INSTALLER);

        let first = provision(&registry, "lint", REUSE).unwrap();
        assert!(!first.was_reused());
        let root = first.root().to_path_buf();
        drop(first);
        assert!(root.join(PROVISION_RECORD_FILENAME).is_file());

        let second = provision(&registry, "lint", REUSE).unwrap();
        assert!(second.was_reused());
        let events = fs::read_to_string(root.join("events")).unwrap();
        assert_eq!(events.matches("created").count(), 1);

        let third = provision(&registry, "lint", ProvisionOptions { reuse: true, recreate: true }).unwrap();
        assert!(!third.was_reused());
    }

    #[test]
    fn test_changed_requirements_reprovision() {
        let dir = TempDir::new().unwrap();
        let first = registry(&dir, FAKE_INSTALLER);
        drop(provision(&first, "lint", REUSE).unwrap());

        let changed = registry(&dir, &FAKE_INSTALLER.replace(r#"lint = ["ruff"]"#, r#"lint = ["ruff==0.6"]"#));
        let context = provision(&changed, "lint", REUSE).unwrap();
        assert!(!context.was_reused());
        let installed = fs::read_to_string(context.root().join("installed")).unwrap();
        assert_eq!(installed.trim(), "ruff==0.6");
    }

    #[test]
    fn test_failed_install_tears_down_directory() {
        let dir = TempDir::new().unwrap();
        let src = FAKE_INSTALLER.replace(
            r#"install = ["sh", "-c", "for r"#,
            r#"install = ["sh", "-c", "exit 7; for r"#,
        );
        let registry = registry(&dir, &src);

        let err = provision(&registry, "unit", REUSE).unwrap_err();
        assert!(matches!(err, ProvisionError::StepFailed { step: "install", code: 7, .. }));
        assert_eq!(err.exit_code(), Some(7));
        assert!(!registry.context_dir("unit").exists());
    }

    #[test]
    fn test_cancelled_install_tears_down_directory() {
        let dir = TempDir::new().unwrap();
        let src = FAKE_INSTALLER.replace(
            r#"install = ["sh", "-c", "for r"#,
            r#"install = ["sh", "-c", "touch {env_dir}/installing; exec sleep 30; for r"#,
        );
        let registry = registry(&dir, &src);
        let marker = registry.context_dir("unit").join("installing");

        let cancel = token();
        let trigger = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            // Wait until the install step is running before interrupting it.
            let deadline = Instant::now() + Duration::from_secs(10);
            while !marker.exists() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
            thread::sleep(Duration::from_millis(100));
            trigger.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let result = provision_until(&registry, "unit", REUSE, &cancel);
        handle.join().unwrap();

        assert!(matches!(result, Err(ProvisionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(!registry.context_dir("unit").exists());
        assert!(!registry.context_dir("unit").join(PROVISION_RECORD_FILENAME).exists());
    }

    #[test]
    fn test_missing_runtime() {
        let dir = TempDir::new().unwrap();
        let src = FAKE_INSTALLER.replace(r#"default_runtime = "sh""#, r#"default_runtime = "python0.1-missing""#);
        let registry = registry(&dir, &src);
        assert!(matches!(
            provision(&registry, "unit", REUSE),
            Err(ProvisionError::RuntimeNotFound(runtime)) if runtime == "python0.1-missing"
        ));
    }

    #[test]
    fn test_unretained_context_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, FAKE_INSTALLER);
        let context = provision(&registry, "unit", ProvisionOptions { reuse: false, recreate: false }).unwrap();
        let root = context.root().to_path_buf();
        assert!(root.is_dir());
        assert!(!root.join(PROVISION_RECORD_FILENAME).exists());
        drop(context);
        assert!(!root.exists());
    }

    #[test]
    fn test_runtime_available() {
        assert!(runtime_available("sh"));
        assert!(!runtime_available("envmatrix-no-such-runtime"));
        assert!(!runtime_available("/definitely/not/here/python"));
    }
}
