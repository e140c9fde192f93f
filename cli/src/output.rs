// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Output
//!
//! Table, JSON and YAML rendering of command results.
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Terminal formatting shared by all commands

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::Serialize;

use flotilla_core::domain::report::{ApplyReport, DispatchResult, EntityAction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Serialize `value` for the structured formats; `None` means draw a table.
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    match format {
        OutputFormat::Table => Ok(None),
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map(Some)
            .context("Failed to serialize output as JSON"),
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map(Some)
            .context("Failed to serialize output as YAML"),
    }
}

/// Print `value` in a structured format, or call `table` for table output.
pub fn emit<T: Serialize + ?Sized>(value: &T, format: OutputFormat, table: impl FnOnce()) -> Result<()> {
    match render(value, format)? {
        Some(text) => println!("{}", text.trim_end()),
        None => table(),
    }
    Ok(())
}

pub fn action_label(action: EntityAction) -> ColoredString {
    let label = action.as_str();
    match action {
        EntityAction::Created | EntityAction::Updated | EntityAction::Deleted => label.green(),
        EntityAction::WouldCreate | EntityAction::WouldUpdate | EntityAction::WouldDelete => {
            label.cyan()
        }
        EntityAction::Unchanged => label.dimmed(),
        EntityAction::Skipped | EntityAction::Cancelled => label.yellow(),
        EntityAction::Failed => label.red(),
    }
}

/// Cut `text` to one line of at most `width` characters.
pub fn truncate(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= width && !text.contains('\n') {
        return line.to_string();
    }
    let kept: String = line.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

// ============================================================================
// Apply Reports
// ============================================================================

pub fn print_apply_report(report: &ApplyReport, format: OutputFormat) -> Result<()> {
    emit(report, format, || print_apply_table(report))
}

fn print_apply_table(report: &ApplyReport) {
    if report.dry_run {
        println!("{}", "Dry run: no changes were made".cyan().bold());
        println!();
    }

    if !report.shared.is_empty() {
        println!("{:<12} {:<32} {:<14} {}", "KIND", "SHARED", "ACTION", "REFS");
        println!("{}", "-".repeat(64));
        for shared in &report.shared {
            println!(
                "{:<12} {:<32} {:<14} {}",
                shared.kind.as_str(),
                shared.name,
                action_label(shared.action),
                shared.ref_count
            );
            if let Some(error) = &shared.error {
                println!("  {} {}", "✗".red(), error);
            }
        }
        println!();
    }

    println!("{:<32} {:<14} {:<8} {}", "AGENT", "ACTION", "CHANGES", "CONFLICTS");
    println!("{}", "-".repeat(64));
    for agent in &report.agents {
        println!(
            "{:<32} {:<14} {:<8} {}",
            agent.name,
            action_label(agent.action),
            agent.patch.len(),
            agent.conflicts.len()
        );
        for conflict in &agent.conflicts {
            println!(
                "  {} {} was changed outside the engine, overwriting",
                "⚠".yellow(),
                conflict.path
            );
        }
        if agent.calibrated {
            println!("  {} calibration message sent", "•".dimmed());
        }
        if let Some(error) = &agent.error {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !report.pruned.is_empty() {
        println!();
        println!("{:<12} {:<32} {}", "PRUNED", "NAME", "ACTION");
        println!("{}", "-".repeat(64));
        for pruned in &report.pruned {
            println!("{:<12} {:<32} {}", pruned.kind, pruned.name, action_label(pruned.action));
            if let Some(error) = &pruned.error {
                println!("  {} {}", "✗".red(), error);
            }
        }
    }

    println!();
    let summary = format!(
        "{} succeeded, {} failed, {} conflict(s)",
        report.succeeded(),
        report.failed(),
        report.conflicts()
    );
    if report.has_failures() {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}

// ============================================================================
// Dispatch Results
// ============================================================================

/// Serializable view of one dispatch result.
#[derive(Debug, Serialize)]
pub struct DispatchEntry<'a, T: Serialize> {
    pub agent: &'a str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn dispatch_entries<T: Serialize>(result: &DispatchResult<T>) -> Vec<DispatchEntry<'_, T>> {
    result
        .iter()
        .map(|(agent, outcome)| match outcome {
            Ok(value) => DispatchEntry {
                agent,
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => DispatchEntry {
                agent,
                ok: false,
                result: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

/// One row per agent; `describe` renders the detail column of successes.
pub fn print_dispatch<T: Serialize>(
    result: &DispatchResult<T>,
    format: OutputFormat,
    describe: impl Fn(&T) -> String,
) -> Result<()> {
    let entries = dispatch_entries(result);
    emit(&entries, format, || {
        println!("{:<32} {:<8} {}", "AGENT", "STATUS", "DETAIL");
        println!("{}", "-".repeat(80));
        for (agent, outcome) in result {
            match outcome {
                Ok(value) => println!("{:<32} {:<8} {}", agent, "ok".green(), truncate(&describe(value), 60)),
                Err(e) => println!("{:<32} {:<8} {}", agent, "failed".red(), e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::domain::report::DispatchError;

    #[test]
    fn test_render_table_is_deferred() {
        assert!(render(&vec![1, 2], OutputFormat::Table).unwrap().is_none());
        assert_eq!(
            render(&vec![1, 2], OutputFormat::Json).unwrap().unwrap(),
            "[\n  1,\n  2\n]"
        );
        assert_eq!(render(&vec![1, 2], OutputFormat::Yaml).unwrap().unwrap(), "- 1\n- 2\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer line", 10), "a much ...");
        assert_eq!(truncate("first\nsecond", 20), "first...");
    }

    #[test]
    fn test_dispatch_entries_flatten_errors() {
        let mut result: DispatchResult<String> = DispatchResult::new();
        result.insert("a".to_string(), Ok("hi".to_string()));
        result.insert("b".to_string(), Err(DispatchError::Timeout));

        let entries = dispatch_entries(&result);
        let json = serde_json::to_value(&entries).unwrap();

        assert_eq!(json[0]["agent"], "a");
        assert_eq!(json[0]["result"], "hi");
        assert_eq!(json[1]["ok"], false);
        assert_eq!(json[1]["error"], "Did not finish before the dispatch deadline");
        assert!(json[1].get("result").is_none());
    }
}
