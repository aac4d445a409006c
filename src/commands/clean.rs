//! Remove run records and leftover workspace containers.
//!
//! Formatting is pure. IO happens only at the top level.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use crate::config::Config;
use crate::record::{RunRecord, RUNS_DIR};
use crate::sandbox::{DockerSandbox, Sandbox};

/// What a clean removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CleanSummary {
    records: usize,
    /// `None` when containers were not requested.
    containers: Option<u32>,
}

/// Entry point: runs clean against the current directory.
pub(crate) async fn run(containers: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let mut summary = CleanSummary {
        records: RunRecord::delete_all(&cwd)?,
        containers: None,
    };

    if containers {
        let config = Config::load(&cwd).context("Failed to load smith.toml")?;
        let sandbox = DockerSandbox::connect(config.sandbox)?;
        summary.containers = Some(
            sandbox
                .cleanup_orphaned()
                .await
                .context("Failed to remove workspace containers")?,
        );
    }

    print!("{}", format_results(&summary));
    Ok(())
}

/// Format the clean results as a displayable string
fn format_results(summary: &CleanSummary) -> String {
    let mut out = String::new();

    if summary.records == 0 && summary.containers.unwrap_or(0) == 0 {
        writeln!(&mut out, "\n{} Nothing to clean.", "ℹ".blue()).unwrap();
        return out;
    }

    writeln!(&mut out, "\n{} Cleaned:", "✓".green()).unwrap();
    if summary.records > 0 {
        writeln!(
            &mut out,
            "  {} {} run record(s) in {}",
            "✗".red(),
            summary.records,
            RUNS_DIR.dimmed()
        )
        .unwrap();
    }
    if let Some(count) = summary.containers.filter(|c| *c > 0) {
        writeln!(
            &mut out,
            "  {} {} workspace container(s)",
            "✗".red(),
            count
        )
        .unwrap();
    }
    out
}
