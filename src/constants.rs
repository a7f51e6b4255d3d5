// src/constants.rs

//! File names, environment variable names and process exit codes.

/// The name of the project configuration file, searched from the current directory upwards.
pub const CONFIG_FILENAME: &str = "envmatrix.toml";

/// The default directory (relative to the project root) holding isolated contexts.
pub const DEFAULT_WORK_DIR: &str = ".envmatrix";

/// The name of the directory (inside the work dir) holding per-environment logs.
pub const LOGS_DIRNAME: &str = ".logs";

/// The name of the provision record file stored inside each context directory.
pub const PROVISION_RECORD_FILENAME: &str = ".provision.bin";

/// The runtime used when neither the environment nor its name selects one.
pub const DEFAULT_RUNTIME: &str = "python3";

/// Placeholder replaced by the extra arguments given after `--`.
pub const POSARGS_TOKEN: &str = "posargs";

/// Environment variable exposing the environment name to every command.
pub const ENV_NAME_VAR: &str = "ENVMATRIX_ENV_NAME";

/// Environment variable exposing the context directory to every command.
pub const ENV_DIR_VAR: &str = "ENVMATRIX_ENV_DIR";

/// Variables that always reach subprocesses, even when `pass_env` is restricted.
pub const ALWAYS_PASSED_VARS: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "SYSTEMROOT", "TEMP", "TMP"];

// --- Process exit codes ---

/// Every selected environment succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one environment failed to provision or had a failing command.
pub const EXIT_ENV_FAILURE: i32 = 1;
/// The configuration could not be loaded; nothing was executed.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// An unexpected error outside of any environment (I/O on the report file, etc).
pub const EXIT_INTERNAL_ERROR: i32 = 3;
/// The run was interrupted by the user.
pub const EXIT_INTERRUPTED: i32 = 130;
