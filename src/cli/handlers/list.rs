// src/cli/handlers/list.rs

//! `envmatrix list`.

use crate::{
    cli::{GlobalOptions, args::ListArgs, handlers::commons},
    constants::EXIT_SUCCESS,
    core::registry::Registry,
    models::EnvironmentDescriptor,
};
use anyhow::Result;
use colored::*;

/// Prints the configured environments in declaration order. With `-v`, each name is
/// followed by its runtime, dependency groups and description.
pub fn handle(global: &GlobalOptions, _args: ListArgs) -> Result<i32> {
    let registry = commons::load_registry(global.config.as_deref())?;
    for line in render(&registry, global.verbose > 0) {
        println!("{line}");
    }
    Ok(EXIT_SUCCESS)
}

fn render(registry: &Registry, verbose: bool) -> Vec<String> {
    let width = registry
        .descriptors()
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0);

    registry
        .descriptors()
        .iter()
        .map(|descriptor| {
            if verbose {
                detailed_line(descriptor, width)
            } else {
                descriptor.name.clone()
            }
        })
        .collect()
}

fn detailed_line(descriptor: &EnvironmentDescriptor, width: usize) -> String {
    let groups = if descriptor.dependency_groups.is_empty() {
        "-".to_string()
    } else {
        descriptor.dependency_groups.join(",")
    };
    let mut line = format!(
        "{:<width$}  {}  {}",
        descriptor.name.bold(),
        descriptor.runtime.cyan(),
        format!("[{groups}]").dimmed()
    );
    if let Some(description) = &descriptor.description {
        line.push_str("  ");
        line.push_str(description);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const CONFIG: &str = r#"
        env_list = ["py{39,311}", "lint"]
        [dependency-groups]
        test = ["pytest"]
        lint = ["ruff"]
        [env_run_base]
        dependency_groups = ["test"]
        commands = ["pytest"]
        [env.lint]
        description = "Static checks"
        dependency_groups = ["lint"]
        commands = ["ruff check ."]
    "#;

    #[test]
    fn test_names_in_declaration_order() {
        let registry = Registry::from_toml_str(CONFIG, Path::new("/project")).unwrap();
        assert_eq!(render(&registry, false), vec!["py39", "py311", "lint"]);
    }

    #[test]
    fn test_verbose_lines() {
        colored::control::set_override(false);
        let registry = Registry::from_toml_str(CONFIG, Path::new("/project")).unwrap();
        let lines = render(&registry, true);
        assert!(lines[1].contains("python3.11"));
        assert!(lines[1].contains("[test]"));
        assert!(lines[2].contains("[lint]"));
        assert!(lines[2].ends_with("Static checks"));
    }
}
