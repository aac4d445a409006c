//! The run state machine.
//!
//! A run walks the phases of its [`CommandKind`] in order. Check phases
//! loop through the agent until [`RetryPolicy`] says to move on or give
//! up; every try is appended to the run's [`RunHistory`]. Whatever the
//! outcome, the workspace is released exactly once before the result is
//! returned.

mod assurance;
mod error;
pub(crate) mod format;
pub(crate) mod model;
mod policy;

pub use error::PipelineError;
pub use policy::ExhaustionPolicy;

pub(crate) use model::{
    Artifact, Attempt, ChangeSet, Command, CommandKind, Phase, ProjectRef, RunHistory, RunRequest,
    RunResult, Verbosity,
};
pub(crate) use policy::{Decision, RetryPolicy};

use chrono::{DateTime, Utc};
use std::fmt::Write;
use tracing::{debug, info, warn};

use crate::agent::prompt::{
    first_line, tail_lines, truncate_chars, CHECK_FEEDBACK_LINES, CLEANUP_INPUT_CHARS,
    FINDINGS_FEEDBACK_LINES,
};
use crate::agent::{AgentInvoker, AgentReply, PromptKind};
use crate::config::Config;
use crate::forge::{ensure_pull_request, Forge, PullRequestDraft, PullRequestRef, RepoSlug};
use crate::git::{BranchTarget, GitSync, SyncedRef};
use crate::sandbox::{Sandbox, Workspace, WorkspaceHandle, WorkspaceSpec};
use crate::validator::{CheckKind, Validator};
use assurance::{has_preamble, inspection_passed};
use format::{format_attempt, format_phase_start};

/// Diagnostic left on a dev run that committed with a failing execute check.
pub(crate) const EXECUTE_CHECK_EXHAUSTED: &str = "execute-check exhausted";

/// Longest agent summary carried into a pull request body.
const PR_SUMMARY_CHARS: usize = 4_000;

/// The external systems a run talks to.
#[derive(Clone, Copy)]
pub(crate) struct Collaborators<'a> {
    pub sandbox: &'a dyn Sandbox,
    pub agent: &'a dyn AgentInvoker,
    /// Needed only by dev runs that open a pull request.
    pub forge: Option<&'a dyn Forge>,
}

/// Mutable state of one run while it is being driven.
struct RunContext<'r> {
    request: &'r RunRequest,
    policy: RetryPolicy,
    history: RunHistory,
    validator: Validator,
    synced: Option<SyncedRef>,
    artifact: Option<Artifact>,
    findings: Option<String>,
    diagnostics: Vec<String>,
    commit: Option<String>,
    pull_request: Option<PullRequestRef>,
}

impl<'r> RunContext<'r> {
    fn new(request: &'r RunRequest, policy: RetryPolicy) -> Self {
        Self {
            request,
            policy,
            history: RunHistory::default(),
            validator: Validator::default(),
            synced: None,
            artifact: None,
            findings: None,
            diagnostics: Vec::new(),
            commit: None,
            pull_request: None,
        }
    }

    fn verbose(&self) -> bool {
        self.request.verbosity == Verbosity::Verbose
    }

    fn enter(&mut self, phase: Phase) {
        self.history.open(phase);
        info!(event = "phase_start", phase = %phase);
        if self.verbose() {
            println!("{}", format_phase_start(phase));
        }
    }

    fn next_attempt(&self, phase: Phase) -> u32 {
        self.history.next_attempt(phase)
    }

    fn record(&mut self, phase: Phase, attempt: Attempt) {
        info!(
            event = "attempt_complete",
            phase = %phase,
            attempt = attempt.number,
            passed = attempt.passed,
        );
        if self.verbose() {
            print!("{}", format_attempt(phase, &attempt));
        }
        self.history.record(phase, attempt);
    }

    fn diagnose(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.diagnostics.contains(&message) {
            debug!(diagnostic = %message, "Run diagnostic");
            self.diagnostics.push(message);
        }
    }

    fn finish(
        self,
        run_id: String,
        started_at: DateTime<Utc>,
        outcome: Result<(), PipelineError>,
    ) -> RunResult {
        let kind = self.request.kind();
        let mut diagnostics = self.diagnostics;
        let mut artifact = self.artifact;

        let error_kind = match outcome {
            Ok(()) => None,
            Err(error) => {
                warn!(event = "run_failed", kind = error.kind(), error = %error);
                diagnostics.insert(0, error.to_string());
                // A failed dev run pushed nothing, so its change set is not a result.
                if kind == CommandKind::Dev {
                    artifact = None;
                }
                Some(error.kind())
            }
        };

        let result = RunResult {
            run_id,
            kind,
            succeeded: error_kind.is_none(),
            artifact,
            diagnostics,
            error_kind,
            history: self.history,
            commit: self.commit,
            pull_request: self.pull_request,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            event = "run_end",
            run_id = %result.run_id,
            kind = %kind,
            succeeded = result.succeeded,
            error_kind = result.error_kind.unwrap_or("none"),
        );
        result
    }
}

pub(crate) struct PipelineRunner<'a> {
    config: &'a Config,
    deps: Collaborators<'a>,
    git: GitSync,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(config: &'a Config, deps: Collaborators<'a>) -> Self {
        Self {
            config,
            deps,
            git: GitSync::new(&config.git),
        }
    }

    #[cfg(test)]
    pub async fn run(&self, request: &RunRequest) -> RunResult {
        self.run_until(request, std::future::pending::<()>()).await
    }

    /// Runs `request` to completion, or until `cancel` completes.
    ///
    /// Never returns without releasing a workspace it provisioned; every
    /// failure, including timeout and cancellation, ends up in the
    /// returned [`RunResult`].
    pub async fn run_until(
        &self,
        request: &RunRequest,
        cancel: impl std::future::Future<Output = ()>,
    ) -> RunResult {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let policy = RetryPolicy::for_kind(request.kind(), &self.config.pipeline);
        let mut ctx = RunContext::new(request, policy);

        info!(
            event = "run_start",
            run_id = %run_id,
            kind = %request.kind(),
            repo = %request.project.repo_url,
            base = %request.base_branch,
            sandbox = self.deps.sandbox.name(),
            agent = self.deps.agent.name(),
        );

        if let Err(error) = self.preflight(request) {
            return ctx.finish(run_id, started_at, Err(error));
        }

        let handle = WorkspaceHandle::generate();
        let outcome = {
            let ws = Workspace::new(self.deps.sandbox, &handle);
            tokio::select! {
                timed = tokio::time::timeout(request.timeout, self.drive(&ws, &mut ctx)) => {
                    timed.unwrap_or_else(|_| {
                        Err(PipelineError::Timeout {
                            secs: request.timeout.as_secs(),
                        })
                    })
                }
                () = cancel => {
                    warn!(event = "run_cancelled");
                    Err(PipelineError::Cancelled)
                }
            }
        };

        match self.deps.sandbox.release(&handle).await {
            Ok(()) => debug!(workspace = %handle, "Workspace released"),
            Err(e) => {
                warn!(workspace = %handle, error = %e, "Failed to release workspace");
                ctx.diagnose(format!("workspace {handle} was not released: {e}"));
            }
        }

        ctx.finish(run_id, started_at, outcome)
    }

    /// Rejects requests that cannot succeed before anything is provisioned.
    fn preflight(&self, request: &RunRequest) -> Result<(), PipelineError> {
        request.validate(&self.config.git)?;

        if let Command::Dev { open_pr: true, .. } = request.command {
            if self.deps.forge.is_none() {
                return Err(PipelineError::configuration(
                    "opening a pull request needs a forge access token \
                     (set github_token for the project or SMITH_GITHUB_TOKEN)",
                ));
            }
            RepoSlug::parse(&request.project.repo_url)
                .map_err(|e| PipelineError::configuration(e.to_string()))?;
        }
        Ok(())
    }

    async fn drive(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        for &phase in ctx.request.kind().phases() {
            ctx.enter(phase);
            match phase {
                Phase::Setup => self.setup(ws, ctx).await?,
                Phase::SetupCheck => self.setup_check(ws, ctx).await?,
                Phase::Execute => self.execute(ws, ctx).await?,
                Phase::ExecuteCheck => self.execute_check(ws, ctx).await?,
                Phase::Assurance => self.assurance(ws, ctx).await?,
                Phase::CommitPush => self.commit_push(ws, ctx).await?,
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        ws: &Workspace<'_>,
        kind: PromptKind,
        context: &str,
    ) -> Result<AgentReply, PipelineError> {
        Ok(self.deps.agent.invoke(ws, kind, context).await?)
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    async fn setup(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let started = Utc::now();
        let attempt = ctx.next_attempt(Phase::Setup);
        match self.prepare(ws, ctx).await {
            Ok(transcript) => {
                ctx.record(Phase::Setup, Attempt::new(attempt, true, transcript, started));
                Ok(())
            }
            Err(error) => {
                ctx.record(
                    Phase::Setup,
                    Attempt::new(attempt, false, error.to_string(), started),
                );
                Err(error)
            }
        }
    }

    /// Provisions the workspace, puts it on the right branch and installs
    /// dependencies.
    async fn prepare(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<String, PipelineError> {
        let request = ctx.request;
        let spec = WorkspaceSpec {
            image: request.project.image.clone(),
            repo_url: request.project.repo_url.clone(),
            clone_branch: request.base_branch.clone(),
            ssh_key: request.project.ssh_key.clone(),
        };
        self.deps
            .sandbox
            .provision(ws.handle(), &spec)
            .await
            .map_err(|e| PipelineError::Provisioning(e.to_string()))?;

        let mut transcript = format!("provisioned {} from {}\n", ws.handle(), spec.repo_url);

        // Ask runs stay on the freshly cloned base and never touch git again.
        let target = match &request.command {
            Command::Ask { .. } => None,
            Command::Dev { .. } => Some(BranchTarget::Working(
                request.working_branch.as_deref().unwrap_or_default(),
            )),
            Command::Review { branch } => Some(BranchTarget::Existing(branch)),
        };
        if let Some(target) = target {
            let synced = self
                .git
                .sync_base(ws, &request.base_branch, target)
                .await
                .map_err(PipelineError::from_setup)?;
            writeln!(&mut transcript, "on {} at {}", synced.branch, synced.commit).unwrap();
            ctx.synced = Some(synced);
        }

        let kind = Validator::detect(ws).await?;
        ctx.validator = Validator::new(kind, &self.config.validation);
        writeln!(&mut transcript, "project kind: {kind}").unwrap();

        let install = ctx.validator.check(ws, CheckKind::Install).await?;
        transcript.push_str(&install.output);
        if !install.passed {
            return Err(PipelineError::Provisioning(format!(
                "dependency installation failed:\n{}",
                tail_lines(&install.output, CHECK_FEEDBACK_LINES)
            )));
        }
        Ok(transcript)
    }

    async fn setup_check(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let mut fix: Option<String> = None;
        let mut started = Utc::now();

        loop {
            let attempt = ctx.next_attempt(Phase::SetupCheck);
            // After a fix, dependencies are installed again before the check.
            let report = if fix.is_some() {
                let install = ctx.validator.check(ws, CheckKind::Install).await?;
                if install.passed {
                    ctx.validator.check(ws, CheckKind::Setup).await?
                } else {
                    install
                }
            } else {
                ctx.validator.check(ws, CheckKind::Setup).await?
            };

            ctx.record(
                Phase::SetupCheck,
                Attempt::new(attempt, report.passed, report.output.clone(), started)
                    .with_fix(fix.take()),
            );

            match ctx.policy.decide(Phase::SetupCheck, attempt, report.passed) {
                Decision::Proceed => return Ok(()),
                Decision::Fail => {
                    return Err(PipelineError::SetupCheckExhausted {
                        attempts: attempt,
                        output: tail_lines(&report.output, CHECK_FEEDBACK_LINES),
                    })
                }
                Decision::Retry => {
                    started = Utc::now();
                    let feedback = tail_lines(&report.output, CHECK_FEEDBACK_LINES);
                    let reply = self.invoke(ws, PromptKind::FixSetup, &feedback).await?;
                    fix = Some(reply.text);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    async fn execute(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let request = ctx.request;
        let started = Utc::now();
        let attempt = ctx.next_attempt(Phase::Execute);

        let (kind, context) = match &request.command {
            Command::Ask { question } => (PromptKind::Question, question.clone()),
            Command::Dev { task, .. } => (PromptKind::Task, task.clone()),
            Command::Review { branch } => (
                PromptKind::Review,
                self.review_context(branch, &request.base_branch),
            ),
        };

        let reply = match self.invoke(ws, kind, &context).await {
            Ok(reply) => reply,
            Err(error) => {
                ctx.record(
                    Phase::Execute,
                    Attempt::new(attempt, false, error.to_string(), started),
                );
                return Err(error);
            }
        };
        ctx.record(
            Phase::Execute,
            Attempt::new(attempt, reply.succeeded, reply.text.clone(), started),
        );
        if !reply.succeeded {
            ctx.diagnose(format!(
                "{} did not complete the {kind} prompt: {}",
                self.deps.agent.name(),
                first_line(&reply.text, 200)
            ));
        }

        ctx.artifact = Some(match &request.command {
            Command::Ask { .. } => Artifact::Answer(reply.text),
            Command::Dev { .. } => Artifact::ChangeSet(ChangeSet {
                summary: reply.text,
                files: Vec::new(),
            }),
            Command::Review { .. } => Artifact::ReviewReport(reply.text),
        });
        if request.kind() == CommandKind::Dev {
            self.refresh_changes(ws, ctx).await;
        }
        Ok(())
    }

    fn review_context(&self, branch: &str, base: &str) -> String {
        let remote = &self.config.git.remote;
        format!(
            "Review the changes on branch '{branch}' compared to base '{base}'.\n\
             The workspace is checked out on '{branch}'. Use `git log {remote}/{base}..HEAD` \
             and `git diff {remote}/{base}...HEAD` to see what changed."
        )
    }

    /// Updates the change set's file list from the workspace.
    async fn refresh_changes(&self, ws: &Workspace<'_>, ctx: &mut RunContext<'_>) {
        let Some(since) = ctx.synced.as_ref().map(|s| s.commit.clone()) else {
            return;
        };
        match self.git.changed_files(ws, &since).await {
            Ok(files) => {
                if let Some(Artifact::ChangeSet(change)) = ctx.artifact.as_mut() {
                    change.files = files;
                }
            }
            Err(e) => warn!(error = %e, "Could not list changed files"),
        }
    }

    async fn execute_check(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let task = task_text(ctx.request);
        let mut fix: Option<String> = None;
        let mut started = Utc::now();

        loop {
            let attempt = ctx.next_attempt(Phase::ExecuteCheck);
            let report = ctx.validator.check(ws, CheckKind::Execute).await?;
            ctx.record(
                Phase::ExecuteCheck,
                Attempt::new(attempt, report.passed, report.output.clone(), started)
                    .with_fix(fix.take()),
            );

            match ctx.policy.decide(Phase::ExecuteCheck, attempt, report.passed) {
                Decision::Proceed => {
                    if !report.passed {
                        warn!(attempts = attempt, "Execute check exhausted, continuing");
                        ctx.diagnose(format!(
                            "{EXECUTE_CHECK_EXHAUSTED} after {attempt} attempts:\n{}",
                            tail_lines(&report.output, 20)
                        ));
                    }
                    self.refresh_changes(ws, ctx).await;
                    return Ok(());
                }
                Decision::Fail => {
                    return Err(PipelineError::ExecuteCheckExhausted {
                        attempts: attempt,
                        output: tail_lines(&report.output, CHECK_FEEDBACK_LINES),
                    })
                }
                Decision::Retry => {
                    started = Utc::now();
                    let feedback = format!(
                        "Task:\n{task}\n\nCheck output:\n{}",
                        tail_lines(&report.output, CHECK_FEEDBACK_LINES)
                    );
                    let reply = self.invoke(ws, PromptKind::FixExecute, &feedback).await?;
                    fix = Some(reply.text);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Assurance
    // ------------------------------------------------------------------

    async fn assurance(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        match ctx.request.kind() {
            CommandKind::Ask => self.clean_answer(ws, ctx).await,
            CommandKind::Dev => self.inspect_changes(ws, ctx).await,
            CommandKind::Review => Ok(()),
        }
    }

    /// Strips conversational filler from an ask answer.
    ///
    /// Cleanup is best effort: any failure keeps the previous answer.
    async fn clean_answer(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        loop {
            let started = Utc::now();
            let attempt = ctx.next_attempt(Phase::Assurance);
            let current = ctx
                .artifact
                .as_ref()
                .map(|a| a.text().to_string())
                .unwrap_or_default();
            if current.trim().is_empty() {
                ctx.record(
                    Phase::Assurance,
                    Attempt::new(attempt, false, "empty answer, nothing to clean", started),
                );
                return Ok(());
            }

            let input = truncate_chars(&current, CLEANUP_INPUT_CHARS);
            if input.len() < current.len() {
                ctx.diagnose(format!(
                    "answer was cut to {CLEANUP_INPUT_CHARS} characters for cleanup"
                ));
            }

            let reply = match self.deps.agent.invoke(ws, PromptKind::CleanupFilter, input).await {
                Ok(reply) => reply,
                Err(e) => {
                    ctx.record(
                        Phase::Assurance,
                        Attempt::new(attempt, false, e.to_string(), started),
                    );
                    ctx.diagnose(format!("answer cleanup skipped: {e}"));
                    return Ok(());
                }
            };

            let cleaned = reply.text.trim();
            if !reply.succeeded || cleaned.is_empty() {
                ctx.record(
                    Phase::Assurance,
                    Attempt::new(attempt, false, reply.text.clone(), started),
                );
                ctx.diagnose("answer cleanup produced nothing usable; kept the previous answer");
                return Ok(());
            }

            let clean = !has_preamble(cleaned);
            ctx.artifact = Some(Artifact::Answer(cleaned.to_string()));
            ctx.record(
                Phase::Assurance,
                Attempt::new(attempt, clean, cleaned, started),
            );

            match ctx.policy.decide(Phase::Assurance, attempt, clean) {
                Decision::Retry => continue,
                Decision::Proceed | Decision::Fail => return Ok(()),
            }
        }
    }

    /// Has the agent inspect its own changes and address what it finds.
    ///
    /// Each fix sends the run back through the execute check before the
    /// next inspection. Findings still open when the budget runs out are
    /// reported, not fatal.
    async fn inspect_changes(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let task = task_text(ctx.request);
        let mut fix: Option<String> = None;
        let mut started = Utc::now();

        loop {
            let attempt = ctx.next_attempt(Phase::Assurance);
            let context = inspection_context(task, ctx.artifact.as_ref());
            let reply = self.invoke(ws, PromptKind::Inspect, &context).await?;

            if !reply.succeeded {
                ctx.record(
                    Phase::Assurance,
                    Attempt::new(attempt, false, reply.text.clone(), started).with_fix(fix.take()),
                );
                ctx.diagnose(format!(
                    "assurance inspection did not complete: {}",
                    first_line(&reply.text, 200)
                ));
                return Ok(());
            }

            let passed = inspection_passed(&reply.text);
            ctx.record(
                Phase::Assurance,
                Attempt::new(attempt, passed, reply.text.clone(), started).with_fix(fix.take()),
            );

            match ctx.policy.decide(Phase::Assurance, attempt, passed) {
                Decision::Retry => {
                    started = Utc::now();
                    let feedback = format!(
                        "Task:\n{task}\n\nFindings:\n{}",
                        tail_lines(&reply.text, FINDINGS_FEEDBACK_LINES)
                    );
                    let fixed = self.invoke(ws, PromptKind::AddressFindings, &feedback).await?;
                    fix = Some(fixed.text);

                    ctx.enter(Phase::ExecuteCheck);
                    self.execute_check(ws, ctx).await?;
                    debug!(phase = %Phase::Assurance, "Resuming after execute check");
                }
                Decision::Proceed | Decision::Fail => {
                    if passed {
                        ctx.findings = None;
                    } else {
                        ctx.findings = Some(reply.text.clone());
                        ctx.diagnose(format!(
                            "assurance findings unresolved after {attempt} attempts:\n{}",
                            tail_lines(&reply.text, FINDINGS_FEEDBACK_LINES)
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Commit and push
    // ------------------------------------------------------------------

    /// Commits and pushes once. A rejected push is never retried.
    async fn commit_push(
        &self,
        ws: &Workspace<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let request = ctx.request;
        let Command::Dev { task, open_pr } = &request.command else {
            return Ok(());
        };
        let branch = request.working_branch.as_deref().unwrap_or_default();
        let since = ctx
            .synced
            .as_ref()
            .map(|s| s.commit.clone())
            .unwrap_or_default();

        let started = Utc::now();
        let attempt = ctx.next_attempt(Phase::CommitPush);
        let pushed = self
            .git
            .commit_and_push(ws, &commit_message(task), branch, &since)
            .await;
        let output = match &pushed {
            Ok(report) if report.rebased => {
                format!(
                    "rebased onto {}/{branch} and pushed {}",
                    self.config.git.remote, report.commit
                )
            }
            Ok(report) => format!("pushed {} to {branch}", report.commit),
            Err(e) => e.to_string(),
        };
        ctx.record(
            Phase::CommitPush,
            Attempt::new(attempt, pushed.is_ok(), output, started),
        );
        let report = pushed?;
        ctx.commit = Some(report.commit);

        if *open_pr {
            if let Some(forge) = self.deps.forge {
                let draft = PullRequestDraft {
                    head: branch.to_string(),
                    base: request.base_branch.clone(),
                    title: first_line(task, 72),
                    body: pull_request_body(task, ctx),
                };
                match ensure_pull_request(forge, &request.project.repo_url, &draft).await {
                    Ok(pr) => {
                        info!(event = "pull_request", number = pr.number, url = %pr.url);
                        ctx.pull_request = Some(pr);
                    }
                    Err(e) => {
                        warn!(error = %e, "Pull request not created or updated");
                        ctx.diagnose(format!("pull request not created or updated: {e}"));
                    }
                }
            }
        }
        Ok(())
    }
}

fn task_text(request: &RunRequest) -> &str {
    match &request.command {
        Command::Dev { task, .. } => task,
        Command::Ask { question } => question,
        Command::Review { branch } => branch,
    }
}

fn inspection_context(task: &str, artifact: Option<&Artifact>) -> String {
    let mut context = format!("Task:\n{task}\n");
    if let Some(Artifact::ChangeSet(change)) = artifact {
        if !change.files.is_empty() {
            context.push_str("\nChanged files:\n");
            for file in &change.files {
                writeln!(&mut context, "- {file}").unwrap();
            }
        }
    }
    context
}

fn commit_message(task: &str) -> String {
    let subject = first_line(task, 72);
    let body = task.trim();
    if body == subject {
        subject
    } else {
        format!("{subject}\n\n{body}")
    }
}

fn pull_request_body(task: &str, ctx: &RunContext<'_>) -> String {
    let mut body = String::new();
    writeln!(&mut body, "## Task\n\n{}\n", task.trim()).unwrap();

    if let Some(Artifact::ChangeSet(change)) = &ctx.artifact {
        let summary = change.summary.trim();
        if !summary.is_empty() {
            writeln!(
                &mut body,
                "## Summary\n\n{}\n",
                truncate_chars(summary, PR_SUMMARY_CHARS)
            )
            .unwrap();
        }
        if !change.files.is_empty() {
            writeln!(&mut body, "## Changed files\n").unwrap();
            for file in &change.files {
                writeln!(&mut body, "- `{file}`").unwrap();
            }
            body.push('\n');
        }
    }

    if ctx
        .diagnostics
        .iter()
        .any(|d| d.starts_with(EXECUTE_CHECK_EXHAUSTED))
    {
        writeln!(
            &mut body,
            "## Checks\n\nThe project checks were still failing when this was pushed.\n"
        )
        .unwrap();
    }
    if let Some(findings) = &ctx.findings {
        writeln!(
            &mut body,
            "## Unresolved findings\n\n{}\n",
            tail_lines(findings.trim(), FINDINGS_FEEDBACK_LINES)
        )
        .unwrap();
    }

    body.push_str("---\n*Automated by smith*\n");
    body
}
