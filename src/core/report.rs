// src/core/report.rs

//! Rendering of a `RunReport`: the colored terminal summary and the JSON file.

use crate::models::{ExecutionResult, Outcome, RunReport};
use colored::*;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

/// Builds the summary block printed after every run. Every selected environment gets
/// exactly one line, in declaration order.
pub fn render_summary(report: &RunReport) -> String {
    let width = report.selected.iter().map(String::len).max().unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "─".repeat(width + 24).dimmed());
    for name in &report.selected {
        match report.results.iter().find(|r| &r.env == name) {
            Some(result) => {
                let _ = writeln!(out, "  {}", result_line(result, width));
            }
            None => {
                let _ = writeln!(out, "  {:<width$}  {}", name, "INTERRUPTED".yellow().bold());
            }
        }
    }

    let footer = if report.incomplete {
        "  run interrupted, results are partial".yellow().bold()
    } else if report.is_success() {
        "  congratulations :)".green().bold()
    } else {
        "  evaluation failed :(".red().bold()
    };
    let _ = writeln!(out, "{}", footer);
    out
}

fn result_line(result: &ExecutionResult, width: usize) -> String {
    let duration = format!("({:.2}s)", result.duration.as_secs_f64()).dimmed();
    let status = match &result.outcome {
        Outcome::Success => "OK".green().bold().to_string(),
        Outcome::Skipped { reason } => format!("{} {}", "SKIP".yellow().bold(), reason.dimmed()),
        Outcome::ProvisionFailed { .. } => format!(
            "{} {}",
            "FAIL".red().bold(),
            format!("provisioning failed, code {}", result.exit_code).red()
        ),
        Outcome::CommandFailed { command, exit_code } => format!(
            "{} {} {}",
            "FAIL".red().bold(),
            format!("code {exit_code}").red(),
            format!("`{command}`").dimmed()
        ),
    };

    let mut line = format!("{:<width$}  {} {}", result.env, status, duration);
    if !result.is_success() {
        if let Some(log) = &result.log_path {
            let _ = write!(line, "\n  {:<width$}  {} {}", "", "log:".dimmed(), log.display());
        }
    }
    line
}

/// Prints the summary block to stdout.
pub fn print_summary(report: &RunReport) {
    print!("{}", render_summary(report));
}

/// Writes the report as pretty-printed JSON.
pub fn write_json(report: &RunReport, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn report() -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            selected: vec!["unit".to_string(), "lint".to_string()],
            results: vec![
                ExecutionResult {
                    env: "unit".to_string(),
                    outcome: Outcome::Success,
                    exit_code: 0,
                    duration: Duration::from_millis(1500),
                    log_path: Some(PathBuf::from("/w/.logs/unit.log")),
                },
                ExecutionResult {
                    env: "lint".to_string(),
                    outcome: Outcome::CommandFailed {
                        command: "ruff check .".to_string(),
                        exit_code: 3,
                    },
                    exit_code: 3,
                    duration: Duration::from_millis(200),
                    log_path: Some(PathBuf::from("/w/.logs/lint.log")),
                },
            ],
            not_completed: vec![],
            incomplete: false,
        }
    }

    #[test]
    fn test_summary_lists_every_environment() {
        colored::control::set_override(false);
        let summary = render_summary(&report());
        let unit = summary.lines().find(|l| l.trim_start().starts_with("unit")).unwrap();
        assert!(unit.contains("OK"));
        let lint = summary.lines().find(|l| l.trim_start().starts_with("lint")).unwrap();
        assert!(lint.contains("FAIL code 3"));
        assert!(summary.contains("/w/.logs/lint.log"));
        assert!(!summary.contains("/w/.logs/unit.log"));
        assert!(summary.contains("evaluation failed :("));
    }

    #[test]
    fn test_summary_marks_interrupted_runs() {
        colored::control::set_override(false);
        let mut report = report();
        report.results.truncate(1);
        report.not_completed = vec!["lint".to_string()];
        report.incomplete = true;
        let summary = render_summary(&report);
        assert!(summary.contains("INTERRUPTED"));
        assert!(summary.contains("run interrupted"));
    }

    #[test]
    fn test_interrupted_lines_keep_declaration_order() {
        colored::control::set_override(false);
        let mut report = report();
        report.selected = vec!["unit".to_string(), "stuck".to_string(), "lint".to_string()];
        report.not_completed = vec!["stuck".to_string()];
        report.incomplete = true;

        let summary = render_summary(&report);
        let order: Vec<&str> = summary
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .filter(|word| ["unit", "stuck", "lint"].contains(word))
            .collect();
        assert_eq!(order, vec!["unit", "stuck", "lint"]);
        let stuck = summary.lines().find(|l| l.trim_start().starts_with("stuck")).unwrap();
        assert!(stuck.contains("INTERRUPTED"));
    }

    #[test]
    fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let report = report();
        write_json(&report, &path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["run_id"], report.run_id.to_string());
        assert_eq!(value["results"][1]["env"], "lint");
        assert_eq!(value["results"][1]["outcome"]["exit_code"], 3);
    }
}
