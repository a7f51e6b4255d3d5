// src/core/envlist.rs

//! Expansion of `env_list` entries and name-derived defaults.
//!
//! An entry such as `py{39,311}-{unit,lint}` expands left to right into
//! `py39-unit`, `py39-lint`, `py311-unit`, `py311-lint`.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref ENV_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex");
    static ref RUNTIME_FACTOR_RE: Regex = Regex::new(r"^(py|pypy)(\d)(\d+)?$").expect("valid regex");
}

/// Why an `env_list` entry could not be expanded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvListError {
    /// A `{` without its `}`, or the reverse.
    #[error("unbalanced braces")]
    UnbalancedBraces,
    /// A brace group inside another.
    #[error("nested braces are not supported")]
    NestedBraces,
    /// An expanded name with characters outside the allowed set.
    #[error("'{0}' is not a valid environment name (letters, digits, '.', '_' and '-' only)")]
    InvalidName(String),
}

/// Expands one `env_list` entry into concrete environment names.
pub fn expand_entry(entry: &str) -> Result<Vec<String>, EnvListError> {
    let mut names = vec![String::new()];
    let mut rest = entry.trim();

    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                for name in &mut names {
                    name.push_str(rest);
                }
                rest = "";
            }
            Some(pos) => {
                let (literal, tail) = rest.split_at(pos);
                for name in &mut names {
                    name.push_str(literal);
                }
                let inner_and_rest = tail.strip_prefix('{').ok_or(EnvListError::UnbalancedBraces)?;
                let (inner, after) = inner_and_rest
                    .split_once('}')
                    .ok_or(EnvListError::UnbalancedBraces)?;
                if inner.contains('{') {
                    return Err(EnvListError::NestedBraces);
                }

                let alternatives: Vec<&str> = inner.split(',').map(str::trim).collect();
                names = names
                    .iter()
                    .flat_map(|prefix| alternatives.iter().map(move |alt| format!("{prefix}{alt}")))
                    .collect();
                rest = after;
            }
        }
    }

    for name in &names {
        validate_name(name)?;
    }
    Ok(names)
}

/// Checks that a name is safe to use as a directory name.
pub fn validate_name(name: &str) -> Result<(), EnvListError> {
    if ENV_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(EnvListError::InvalidName(name.to_string()))
    }
}

/// Derives a runtime from a `pyXY` / `pypyX` factor of a dash-separated name.
///
/// `py311-unit` selects `python3.11`, `py3-lint` selects `python3`.
pub fn runtime_from_name(name: &str) -> Option<String> {
    name.split('-').find_map(|factor| {
        let caps = RUNTIME_FACTOR_RE.captures(factor)?;
        let interpreter = match caps.get(1)?.as_str() {
            "py" => "python",
            other => other,
        };
        let major = caps.get(2)?.as_str();
        Some(match caps.get(3) {
            Some(minor) => format!("{interpreter}{major}.{}", minor.as_str()),
            None => format!("{interpreter}{major}"),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_entry() {
        assert_eq!(expand_entry(" lint ").unwrap(), vec!["lint"]);
    }

    #[test]
    fn test_product_expansion_keeps_order() {
        assert_eq!(
            expand_entry("py{39,311}-{unit,lint}").unwrap(),
            vec!["py39-unit", "py39-lint", "py311-unit", "py311-lint"]
        );
    }

    #[test]
    fn test_empty_alternative() {
        assert_eq!(expand_entry("docs{,-linkcheck}").unwrap(), vec!["docs", "docs-linkcheck"]);
    }

    #[test]
    fn test_brace_errors() {
        assert_eq!(expand_entry("py{39"), Err(EnvListError::UnbalancedBraces));
        assert_eq!(expand_entry("py39}"), Err(EnvListError::UnbalancedBraces));
        assert_eq!(expand_entry("py{3{9}}"), Err(EnvListError::NestedBraces));
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(expand_entry("../escape"), Err(EnvListError::InvalidName(_))));
        assert!(matches!(expand_entry(""), Err(EnvListError::InvalidName(_))));
        assert!(matches!(expand_entry("a b"), Err(EnvListError::InvalidName(_))));
    }

    #[test]
    fn test_runtime_from_name() {
        assert_eq!(runtime_from_name("py311-unit").as_deref(), Some("python3.11"));
        assert_eq!(runtime_from_name("lint-py3").as_deref(), Some("python3"));
        assert_eq!(runtime_from_name("pypy310").as_deref(), Some("pypy3.10"));
        assert_eq!(runtime_from_name("lint"), None);
        assert_eq!(runtime_from_name("python311"), None);
    }
}
