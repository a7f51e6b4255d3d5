//! # Dependency Group Resolver
//!
//! Flattens `[dependency-groups]` (including `include-group` entries) at load time and
//! computes the requirement set of an environment: the union of its groups followed by
//! its inline `deps`. When a package appears more than once the last declaration wins,
//! and the winner keeps the position of the first occurrence.

use crate::models::{DependencyGroup, EnvironmentDescriptor, GroupEntry, Requirement};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

lazy_static! {
    /// A PEP 508 distribution name at the start of a specifier.
    static ref NAME_RE: Regex =
        Regex::new(r"^\s*([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)").expect("valid regex");
    static ref SEPARATOR_RE: Regex = Regex::new(r"[-_.]+").expect("valid regex");
}

/// A reference to a dependency group that does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{referrer} references undefined dependency group '{group}'.")]
pub struct UnknownGroupError {
    /// Who holds the dangling reference, e.g. "environment 'unit'".
    pub referrer: String,
    /// The missing group.
    pub group: String,
}

/// Failures while flattening dependency groups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// A reference to a group that does not exist.
    #[error(transparent)]
    Unknown(#[from] UnknownGroupError),
    /// The group and the include chain that leads back to it.
    #[error("Dependency group '{0}' includes itself (through: {1}).")]
    Cycle(String, String),
}

impl Requirement {
    /// Parses a specifier. Specifiers without a leading distribution name
    /// (`-r requirements.txt`, `./local`, URLs) are keyed by the whole string.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let key = NAME_RE
            .captures(spec)
            .and_then(|caps| caps.get(1))
            .filter(|name| {
                let next = spec.get(name.end()..).and_then(|tail| tail.chars().next());
                !matches!(next, Some('/' | ':' | '\\'))
            })
            .map(|name| SEPARATOR_RE.replace_all(&name.as_str().to_lowercase(), "-").into_owned())
            .unwrap_or_else(|| spec.to_string());

        Self {
            key,
            spec: spec.to_string(),
        }
    }
}

/// Keeps one requirement per key. A later push replaces the earlier spec in place.
#[derive(Debug, Default)]
struct RequirementSet {
    items: Vec<Requirement>,
    positions: HashMap<String, usize>,
}

impl RequirementSet {
    fn push(&mut self, requirement: Requirement) {
        match self.positions.get(&requirement.key) {
            Some(&pos) => {
                if let Some(slot) = self.items.get_mut(pos) {
                    *slot = requirement;
                }
            }
            None => {
                self.positions.insert(requirement.key.clone(), self.items.len());
                self.items.push(requirement);
            }
        }
    }

    fn into_vec(self) -> Vec<Requirement> {
        self.items
    }
}

/// Flattens the raw `[dependency-groups]` table into resolved groups.
pub fn build_groups(
    raw: &HashMap<String, Vec<GroupEntry>>,
) -> Result<HashMap<String, DependencyGroup>, GroupError> {
    let mut resolved = HashMap::with_capacity(raw.len());
    for name in raw.keys() {
        let mut set = RequirementSet::default();
        let mut stack = vec![name.clone()];
        flatten_group(name, raw, &mut stack, &mut set)?;
        resolved.insert(
            name.clone(),
            DependencyGroup {
                name: name.clone(),
                requirements: set.into_vec(),
            },
        );
    }
    Ok(resolved)
}

fn flatten_group(
    name: &str,
    raw: &HashMap<String, Vec<GroupEntry>>,
    stack: &mut Vec<String>,
    set: &mut RequirementSet,
) -> Result<(), GroupError> {
    let entries = raw.get(name).ok_or_else(|| UnknownGroupError {
        referrer: format!("dependency group '{}'", stack.iter().rev().nth(1).map_or(name, String::as_str)),
        group: name.to_string(),
    })?;

    for entry in entries {
        match entry {
            GroupEntry::Requirement(spec) => set.push(Requirement::parse(spec)),
            GroupEntry::Include { include_group } => {
                if stack.contains(include_group) {
                    return Err(GroupError::Cycle(include_group.clone(), stack.join(" -> ")));
                }
                stack.push(include_group.clone());
                flatten_group(include_group, raw, stack, set)?;
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Checks that every group an environment references exists.
pub fn validate_references(
    descriptor: &EnvironmentDescriptor,
    groups: &HashMap<String, DependencyGroup>,
) -> Result<(), UnknownGroupError> {
    match descriptor
        .dependency_groups
        .iter()
        .find(|group| !groups.contains_key(group.as_str()))
    {
        Some(missing) => Err(unknown(descriptor, missing)),
        None => Ok(()),
    }
}

/// Computes the requirement set of an environment.
pub fn resolve(
    descriptor: &EnvironmentDescriptor,
    groups: &HashMap<String, DependencyGroup>,
) -> Result<Vec<Requirement>, UnknownGroupError> {
    let mut set = RequirementSet::default();
    for group_name in &descriptor.dependency_groups {
        let group = groups
            .get(group_name)
            .ok_or_else(|| unknown(descriptor, group_name))?;
        for requirement in &group.requirements {
            set.push(requirement.clone());
        }
    }
    for requirement in &descriptor.extra_requirements {
        set.push(requirement.clone());
    }

    let requirements = set.into_vec();
    log::debug!(
        "Resolved {} requirement(s) for '{}': {:?}",
        requirements.len(),
        descriptor.name,
        requirements.iter().map(|r| r.spec.as_str()).collect::<Vec<_>>()
    );
    Ok(requirements)
}

fn unknown(descriptor: &EnvironmentDescriptor, group: &str) -> UnknownGroupError {
    UnknownGroupError {
        referrer: format!("Environment '{}'", descriptor.name),
        group: group.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::CommandTemplate;

    fn descriptor(groups: &[&str], extra: &[&str]) -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            name: "unit".to_string(),
            description: None,
            runtime: "python3".to_string(),
            package: true,
            dependency_groups: groups.iter().map(|s| s.to_string()).collect(),
            extra_requirements: extra.iter().map(|s| Requirement::parse(s)).collect(),
            commands: vec![CommandTemplate::from_line("pytest").unwrap()],
            set_env: Default::default(),
            pass_env: None,
            change_dir: None,
            ignore_errors: false,
        }
    }

    fn raw_groups(toml_src: &str) -> HashMap<String, Vec<GroupEntry>> {
        toml::from_str(toml_src).unwrap()
    }

    fn specs(requirements: &[Requirement]) -> Vec<&str> {
        requirements.iter().map(|r| r.spec.as_str()).collect()
    }

    #[test]
    fn test_requirement_keys_are_normalized() {
        assert_eq!(Requirement::parse("Foo_Bar.baz>=1.0").key, "foo-bar-baz");
        assert_eq!(Requirement::parse("pytest [cov] ; python_version>'3'").key, "pytest");
        assert_eq!(Requirement::parse("pkg @ https://x/pkg.whl").key, "pkg");
        assert_eq!(Requirement::parse("-r requirements.txt").key, "-r requirements.txt");
        assert_eq!(Requirement::parse("./vendored").key, "./vendored");
        assert_eq!(Requirement::parse("https://x/y.whl").key, "https://x/y.whl");
        assert_eq!(Requirement::parse("src/local").key, "src/local");
    }

    #[test]
    fn test_union_with_last_declared_wins() {
        let groups = build_groups(&raw_groups(
            r#"
            test = ["pytest>=7", "coverage"]
            extra = ["PyTest==8.0", "hypothesis"]
            "#,
        ))
        .unwrap();

        let resolved = resolve(&descriptor(&["test", "extra"], &["coverage[toml]"]), &groups).unwrap();
        assert_eq!(specs(&resolved), vec!["PyTest==8.0", "coverage[toml]", "hypothesis"]);
    }

    #[test]
    fn test_include_group_is_flattened() {
        let groups = build_groups(&raw_groups(
            r#"
            base = ["attrs"]
            test = [{ include-group = "base" }, "pytest"]
            "#,
        ))
        .unwrap();
        assert_eq!(specs(&groups["test"].requirements), vec!["attrs", "pytest"]);
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let err = build_groups(&raw_groups(
            r#"
            a = [{ include-group = "b" }]
            b = [{ include-group = "a" }]
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, GroupError::Cycle(..)));
    }

    #[test]
    fn test_dangling_include_is_unknown_group() {
        let err = build_groups(&raw_groups(r#"test = [{ include-group = "missing" }]"#)).unwrap_err();
        assert_eq!(
            err,
            GroupError::Unknown(UnknownGroupError {
                referrer: "dependency group 'test'".to_string(),
                group: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_group_reference() {
        let groups = build_groups(&raw_groups(r#"test = ["pytest"]"#)).unwrap();
        let env = descriptor(&["test", "lint"], &[]);
        assert_eq!(validate_references(&env, &groups).unwrap_err().group, "lint");
        assert_eq!(resolve(&env, &groups).unwrap_err().group, "lint");
    }
}
