//! Run requests, phases, the append-only attempt history, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::PipelineError;
use crate::config::GitConfig;
use crate::forge::PullRequestRef;
use crate::git::validate_branch_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum CommandKind {
    Ask,
    Dev,
    Review,
}

impl CommandKind {
    /// Phases a run of this kind walks through, in order.
    pub fn phases(self) -> &'static [Phase] {
        match self {
            Self::Ask => &[Phase::Setup, Phase::SetupCheck, Phase::Execute, Phase::Assurance],
            Self::Dev => &[
                Phase::Setup,
                Phase::SetupCheck,
                Phase::Execute,
                Phase::ExecuteCheck,
                Phase::Assurance,
                Phase::CommitPush,
            ],
            Self::Review => &[Phase::Setup, Phase::SetupCheck, Phase::Execute],
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ask => write!(f, "ask"),
            Self::Dev => write!(f, "dev"),
            Self::Review => write!(f, "review"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Phase {
    Setup,
    SetupCheck,
    Execute,
    ExecuteCheck,
    Assurance,
    CommitPush,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::SetupCheck => "setup-check",
            Self::Execute => "execute",
            Self::ExecuteCheck => "execute-check",
            Self::Assurance => "assurance",
            Self::CommitPush => "commit-push",
        };
        f.write_str(name)
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Ask { question: String },
    Dev { task: String, open_pr: bool },
    Review { branch: String },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Ask { .. } => CommandKind::Ask,
            Self::Dev { .. } => CommandKind::Dev,
            Self::Review { .. } => CommandKind::Review,
        }
    }
}

/// The repository a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectRef {
    pub name: Option<String>,
    pub repo_url: String,
    pub image: String,
    pub ssh_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Verbosity {
    #[default]
    Quiet,
    Verbose,
}

#[derive(Debug, Clone)]
pub(crate) struct RunRequest {
    pub command: Command,
    pub project: ProjectRef,
    pub base_branch: String,
    /// Branch dev runs commit to. Ignored by ask and review.
    pub working_branch: Option<String>,
    pub timeout: Duration,
    pub verbosity: Verbosity,
}

impl RunRequest {
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    /// Checks that need no workspace. Nothing is provisioned or mutated
    /// when these fail.
    pub fn validate(&self, git: &GitConfig) -> Result<(), PipelineError> {
        if self.project.repo_url.trim().is_empty() {
            return Err(PipelineError::configuration("repository URL is empty"));
        }
        validate_branch_name(&self.base_branch)
            .map_err(|e| PipelineError::configuration(format!("base branch: {e}")))?;
        if self.timeout.is_zero() {
            return Err(PipelineError::configuration("timeout must be positive"));
        }

        match &self.command {
            Command::Ask { question } if question.trim().is_empty() => {
                Err(PipelineError::configuration("question is empty"))
            }
            Command::Dev { task, .. } => {
                if task.trim().is_empty() {
                    return Err(PipelineError::configuration("task is empty"));
                }
                let branch = self.working_branch.as_deref().unwrap_or("");
                validate_branch_name(branch)
                    .map_err(|e| PipelineError::configuration(format!("working branch: {e}")))?;
                if git.is_protected(branch) {
                    return Err(PipelineError::configuration(format!(
                        "working branch '{branch}' is protected; dev runs never push to it"
                    )));
                }
                Ok(())
            }
            Command::Review { branch } => validate_branch_name(branch)
                .map_err(|e| PipelineError::configuration(format!("review branch: {e}"))),
            Command::Ask { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ChangeSet {
    pub summary: String,
    pub files: Vec<String>,
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "kebab-case")]
pub(crate) enum Artifact {
    Answer(String),
    ChangeSet(ChangeSet),
    ReviewReport(String),
}

impl Artifact {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::ReviewReport(text) => text,
            Self::ChangeSet(change) => &change.summary,
        }
    }
}

/// One try at a phase: the fix work that preceded it, if any, and its
/// check. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Attempt {
    pub number: u32,
    pub passed: bool,
    pub output: String,
    /// Agent reply for the fix made before this check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(
        number: u32,
        passed: bool,
        output: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            number,
            passed,
            output: output.into(),
            fix: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn with_fix(mut self, fix: Option<String>) -> Self {
        self.fix = fix;
        self
    }
}

/// One visit to a phase and the attempts made during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PhaseRecord {
    pub phase: Phase,
    pub attempts: Vec<Attempt>,
}

/// Append-only log of every phase visit in a run.
///
/// A phase can be visited more than once (the execute check is re-run
/// after assurance fixes); each visit gets its own record, and attempt
/// numbers restart at 1 within a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RunHistory {
    records: Vec<PhaseRecord>,
}

impl RunHistory {
    /// Starts a new visit to `phase`.
    pub fn open(&mut self, phase: Phase) {
        self.records.push(PhaseRecord {
            phase,
            attempts: Vec::new(),
        });
    }

    fn current_mut(&mut self, phase: Phase) -> Option<&mut PhaseRecord> {
        self.records.iter_mut().rev().find(|r| r.phase == phase)
    }

    /// Number the next attempt at `phase` will get in its current visit.
    pub fn next_attempt(&self, phase: Phase) -> u32 {
        self.records
            .iter()
            .rev()
            .find(|r| r.phase == phase)
            .map_or(1, |r| r.attempts.len() as u32 + 1)
    }

    /// Appends `attempt` to the current visit of `phase`, opening one if needed.
    pub fn record(&mut self, phase: Phase, attempt: Attempt) {
        if self.current_mut(phase).is_none() {
            self.open(phase);
        }
        if let Some(record) = self.current_mut(phase) {
            record.attempts.push(attempt);
        }
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    /// Every attempt at `phase` across all visits.
    pub fn attempts(&self, phase: Phase) -> impl Iterator<Item = &Attempt> {
        self.records
            .iter()
            .filter(move |r| r.phase == phase)
            .flat_map(|r| r.attempts.iter())
    }

    pub fn visits(&self, phase: Phase) -> usize {
        self.records.iter().filter(|r| r.phase == phase).count()
    }

    pub fn visited(&self, phase: Phase) -> bool {
        self.visits(phase) > 0
    }
}

/// Everything a finished run reports back.
#[derive(Debug, Clone)]
pub(crate) struct RunResult {
    pub run_id: String,
    pub kind: CommandKind,
    pub succeeded: bool,
    pub artifact: Option<Artifact>,
    pub diagnostics: Vec<String>,
    /// Short machine-readable error kind, e.g. `git-conflict`.
    pub error_kind: Option<&'static str>,
    pub history: RunHistory,
    pub commit: Option<String>,
    pub pull_request: Option<PullRequestRef>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
