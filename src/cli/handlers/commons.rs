// src/cli/handlers/commons.rs

//! Shared functions used by multiple handlers.

use crate::core::registry::{ConfigError, Registry};
use std::env;
use std::path::Path;

/// Loads the registry from `--config` when given, otherwise by searching upwards from
/// the current directory.
pub fn load_registry(config: Option<&Path>) -> Result<Registry, ConfigError> {
    match config {
        Some(path) => {
            log::debug!("Using configuration file '{}'", path.display());
            Registry::load_file(path)
        }
        None => {
            let cwd = env::current_dir().map_err(|source| ConfigError::Io {
                path: ".".to_string(),
                source,
            })?;
            Registry::discover(&cwd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CONFIG_FILENAME;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ci.toml");
        fs::write(
            &path,
            r#"
            env_list = ["unit"]
            [env.unit]
            commands = ["pytest"]
            "#,
        )
        .unwrap();

        let registry = load_registry(Some(path.as_path())).unwrap();
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn test_missing_explicit_config() {
        let dir = TempDir::new().unwrap();
        let err = load_registry(Some(dir.path().join(CONFIG_FILENAME).as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
