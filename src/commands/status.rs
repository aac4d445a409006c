//! Show recent runs recorded in `.smith/runs`.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use crate::record::RunRecord;

/// Entry point: loads records from the current directory and prints them.
pub(crate) fn run(limit: usize) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let records = RunRecord::load_recent(&cwd, limit)?;
    print!("{}", format_runs(&records));
    Ok(())
}

/// Formats records for display, newest first as given.
fn format_runs(records: &[RunRecord]) -> String {
    let mut out = String::new();

    if records.is_empty() {
        writeln!(&mut out, "\n{} No runs recorded yet.", "ℹ".blue()).unwrap();
        writeln!(
            &mut out,
            "  Run {} to start one.",
            "smith ask \"<question>\"".green()
        )
        .unwrap();
        return out;
    }

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Recent runs".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    for record in records {
        let outcome = if record.succeeded {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        let elapsed = (record.finished_at - record.started_at).num_seconds().max(0);
        writeln!(
            &mut out,
            "  {} {} {:<6} {} {}",
            outcome,
            record.run_id.dimmed(),
            record.kind.to_string().cyan(),
            record.started_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            format!("({elapsed}s)").dimmed()
        )
        .unwrap();

        let target = record.project.as_deref().unwrap_or(&record.repo);
        match &record.working_branch {
            Some(branch) => {
                writeln!(&mut out, "      {} {} → {}", target, record.base_branch, branch)
                    .unwrap();
            }
            None => writeln!(&mut out, "      {} {}", target, record.base_branch).unwrap(),
        }

        if let Some(url) = &record.pull_request {
            writeln!(&mut out, "      PR: {}", url.cyan()).unwrap();
        }
        if let Some(kind) = &record.error_kind {
            let first = record
                .diagnostics
                .first()
                .and_then(|d| d.lines().next())
                .unwrap_or_default();
            writeln!(&mut out, "      {} {}", kind.red(), first).unwrap();
        }
    }

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    out
}
