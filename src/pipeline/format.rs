//! Formatting functions for run output.
//!
//! Pure functions that return strings; the caller decides where they go.

use chrono::Duration;
use colored::Colorize;
use std::fmt::Write;

use super::model::{Artifact, Attempt, Phase, RunResult};
use crate::agent::prompt::tail_lines;

/// Lines of attempt output shown in verbose mode.
const VERBOSE_OUTPUT_LINES: usize = 15;

/// Banner information for display at run start.
#[derive(Debug, Clone)]
pub(crate) struct BannerInfo {
    pub kind: String,
    pub repo: String,
    pub base_branch: String,
    pub working_branch: Option<String>,
    pub agent: String,
    pub sandbox: String,
    pub image: String,
    pub timeout_minutes: u64,
}

/// Formats a duration for display (e.g., "2h 5m 30s").
pub(crate) fn format_duration(duration: &Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Formats the startup banner for display.
pub(crate) fn format_banner(info: &BannerInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(
        &mut out,
        "{}",
        format!("   smith {}", info.kind).yellow().bold()
    )
    .unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(&mut out, "  Repo:       {}", info.repo.cyan()).unwrap();
    writeln!(&mut out, "  Base:       {}", info.base_branch.cyan()).unwrap();
    if let Some(ref branch) = info.working_branch {
        writeln!(&mut out, "  Branch:     {}", branch.cyan().bold()).unwrap();
    }
    writeln!(&mut out, "  Agent:      {}", info.agent.cyan().bold()).unwrap();
    writeln!(
        &mut out,
        "  Workspace:  {} ({})",
        info.sandbox.cyan(),
        info.image.dimmed()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  Timeout:    {}",
        format!("{}m", info.timeout_minutes).cyan()
    )
    .unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    out
}

/// Formats the header printed when a phase starts.
pub(crate) fn format_phase_start(phase: Phase) -> String {
    format!(
        "\n{} {} {}",
        "━".repeat(10).dimmed(),
        phase.to_string().cyan().bold(),
        "━".repeat(10).dimmed()
    )
}

/// Formats one finished attempt, with the tail of its output.
pub(crate) fn format_attempt(phase: Phase, attempt: &Attempt) -> String {
    let mut out = String::new();
    let elapsed = attempt
        .finished_at
        .signed_duration_since(attempt.started_at);
    let mark = if attempt.passed {
        "✓".green()
    } else {
        "✗".red()
    };
    writeln!(
        &mut out,
        "  {mark} {phase} #{} {}",
        attempt.number,
        format!("({})", format_duration(&elapsed)).dimmed()
    )
    .unwrap();

    let tail = tail_lines(attempt.output.trim(), VERBOSE_OUTPUT_LINES);
    for line in tail.lines() {
        writeln!(&mut out, "    {}", line.dimmed()).unwrap();
    }
    out
}

/// Formats the final summary and artifact of a run.
pub(crate) fn format_result(result: &RunResult) -> String {
    let mut out = String::new();
    let elapsed = result.finished_at.signed_duration_since(result.started_at);

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    let status = if result.succeeded {
        "succeeded".green().bold()
    } else {
        "failed".red().bold()
    };
    writeln!(
        &mut out,
        "  {} {} in {}",
        result.kind.to_string().cyan().bold(),
        status,
        format_duration(&elapsed)
    )
    .unwrap();
    if let Some(kind) = result.error_kind {
        writeln!(&mut out, "  Error:      {}", kind.red()).unwrap();
    }

    let mut phases: Vec<String> = Vec::new();
    for record in result.history.records() {
        let passed = record.attempts.last().is_some_and(|a| a.passed);
        let label = format!("{}×{}", record.phase, record.attempts.len());
        phases.push(if passed {
            label.green().to_string()
        } else {
            label.yellow().to_string()
        });
    }
    if !phases.is_empty() {
        writeln!(&mut out, "  Phases:     {}", phases.join(" → ")).unwrap();
    }

    if let Some(ref commit) = result.commit {
        let short = commit.get(..8).unwrap_or(commit);
        writeln!(&mut out, "  Commit:     {}", short.cyan()).unwrap();
    }
    if let Some(ref pr) = result.pull_request {
        writeln!(
            &mut out,
            "  Pull req:   #{} {}",
            pr.number,
            pr.url.cyan().underline()
        )
        .unwrap();
    }

    if !result.diagnostics.is_empty() {
        writeln!(&mut out, "\n  {}", "Diagnostics:".yellow()).unwrap();
        for diagnostic in &result.diagnostics {
            let mut lines = diagnostic.lines();
            if let Some(first) = lines.next() {
                writeln!(&mut out, "  - {first}").unwrap();
            }
            for line in lines.take(VERBOSE_OUTPUT_LINES) {
                writeln!(&mut out, "    {}", line.dimmed()).unwrap();
            }
        }
    }
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    if let Some(ref artifact) = result.artifact {
        match artifact {
            Artifact::ChangeSet(change) => {
                if !change.files.is_empty() {
                    writeln!(&mut out, "\n{}", "Changed files:".bold()).unwrap();
                    for file in &change.files {
                        writeln!(&mut out, "  {file}").unwrap();
                    }
                }
                writeln!(&mut out, "\n{}", change.summary).unwrap();
            }
            Artifact::Answer(text) | Artifact::ReviewReport(text) => {
                writeln!(&mut out, "\n{text}").unwrap();
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{ChangeSet, CommandKind, RunHistory};
    use chrono::Utc;

    fn result(succeeded: bool) -> RunResult {
        let now = Utc::now();
        let mut history = RunHistory::default();
        history.record(Phase::Setup, Attempt::new(1, true, "", now));
        RunResult {
            run_id: "r1".to_string(),
            kind: CommandKind::Dev,
            succeeded,
            artifact: Some(Artifact::ChangeSet(ChangeSet {
                summary: "Added the login page.".to_string(),
                files: vec!["src/login.rs".to_string()],
            })),
            diagnostics: vec!["execute-check exhausted".to_string()],
            error_kind: None,
            history,
            commit: Some("0123456789abcdef".to_string()),
            pull_request: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::seconds(45)), "45s");
        assert_eq!(format_duration(&Duration::seconds(125)), "2m 5s");
        assert_eq!(format_duration(&Duration::seconds(7530)), "2h 5m 30s");
    }

    #[test]
    fn test_format_result_includes_artifact_and_diagnostics() {
        colored::control::set_override(false);
        let out = format_result(&result(true));
        assert!(out.contains("dev succeeded"));
        assert!(out.contains("Commit:     01234567"));
        assert!(out.contains("- execute-check exhausted"));
        assert!(out.contains("src/login.rs"));
        assert!(out.contains("Added the login page."));
    }

    #[test]
    fn test_format_attempt_shows_tail() {
        colored::control::set_override(false);
        let attempt = Attempt::new(2, false, "line1\nerror: boom", Utc::now());
        let out = format_attempt(Phase::ExecuteCheck, &attempt);
        assert!(out.contains("✗ execute-check #2"));
        assert!(out.contains("error: boom"));
    }

    #[test]
    fn test_format_banner() {
        colored::control::set_override(false);
        let out = format_banner(&BannerInfo {
            kind: "dev".to_string(),
            repo: "git@github.com:acme/widgets.git".to_string(),
            base_branch: "main".to_string(),
            working_branch: Some("feature/login".to_string()),
            agent: "claude".to_string(),
            sandbox: "docker".to_string(),
            image: "rust:1-bookworm".to_string(),
            timeout_minutes: 60,
        });
        assert!(out.contains("smith dev"));
        assert!(out.contains("Branch:     feature/login"));
    }
}
