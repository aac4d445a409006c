//! Persisted records of finished runs.
//!
//! Each run is written to `.smith/runs/<run-id>.toml` in the directory
//! smith was started from. Attempt output is cut to an excerpt so a
//! record stays readable.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::prompt::tail_lines;
use crate::pipeline::{Attempt, CommandKind, Phase, RunRequest, RunResult};

pub(crate) const RUNS_DIR: &str = ".smith/runs";

/// Lines of attempt output kept in a record.
const OUTPUT_EXCERPT_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AttemptSummary {
    pub number: u32,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl From<&Attempt> for AttemptSummary {
    fn from(attempt: &Attempt) -> Self {
        Self {
            number: attempt.number,
            passed: attempt.passed,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            output: tail_lines(attempt.output.trim(), OUTPUT_EXCERPT_LINES),
            fix: attempt
                .fix
                .as_deref()
                .map(|fix| tail_lines(fix.trim(), OUTPUT_EXCERPT_LINES)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PhaseSummary {
    pub phase: Phase,
    pub attempts: Vec<AttemptSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RunRecord {
    pub run_id: String,
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub repo: String,
    pub base_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_branch: Option<String>,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
    #[serde(default)]
    pub phases: Vec<PhaseSummary>,
}

impl RunRecord {
    pub fn new(request: &RunRequest, result: &RunResult) -> Self {
        let working_branch = match &request.command {
            crate::pipeline::Command::Review { branch } => Some(branch.clone()),
            _ => request.working_branch.clone(),
        };
        Self {
            run_id: result.run_id.clone(),
            kind: result.kind,
            project: request.project.name.clone(),
            repo: request.project.repo_url.clone(),
            base_branch: request.base_branch.clone(),
            working_branch,
            succeeded: result.succeeded,
            error_kind: result.error_kind.map(String::from),
            commit: result.commit.clone(),
            pull_request: result.pull_request.as_ref().map(|pr| pr.url.clone()),
            started_at: result.started_at,
            finished_at: result.finished_at,
            diagnostics: result.diagnostics.clone(),
            phases: result
                .history
                .records()
                .iter()
                .map(|record| PhaseSummary {
                    phase: record.phase,
                    attempts: record.attempts.iter().map(AttemptSummary::from).collect(),
                })
                .collect(),
        }
    }

    fn path(project_dir: &Path, run_id: &str) -> PathBuf {
        project_dir.join(RUNS_DIR).join(format!("{run_id}.toml"))
    }

    /// Writes the record and returns where it went.
    pub fn save(&self, project_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(project_dir, &self.run_id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize run record")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write run record: {}", path.display()))?;

        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run record: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse run record: {}", path.display()))
    }

    /// The `limit` most recent records, newest first.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn load_recent(project_dir: &Path, limit: usize) -> Result<Vec<Self>> {
        let dir = project_dir.join(RUNS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match Self::load(&path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping run record"),
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Deletes every stored record. Returns how many were removed.
    pub fn delete_all(project_dir: &Path) -> Result<usize> {
        let dir = project_dir.join(RUNS_DIR);
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete run record: {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
