//! Git operations run inside a pipeline workspace.
//!
//! Every command goes through the workspace, so the same code drives a
//! container clone and a host scratch clone. Pushes never force: a remote
//! branch that moved underneath the run is reported as a conflict and
//! the remote is left untouched.

use std::fmt;
use tracing::{debug, info, warn};

use crate::config::GitConfig;
use crate::sandbox::{ExecOutput, SandboxError, Workspace};

/// Which branch the workspace should end up on after syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BranchTarget<'a> {
    /// A working branch that is created from the base when it does not
    /// exist on the remote yet.
    Working(&'a str),
    /// A branch that must already exist on the remote.
    Existing(&'a str),
}

/// Where the workspace ended up after [`GitSync::sync_base`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncedRef {
    pub branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PushReport {
    pub commit: String,
    pub rebased: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictKind {
    /// Local commits do not rebase cleanly onto the remote branch.
    Rebase,
    /// The remote refused a non-fast-forward update.
    NonFastForward,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rebase => write!(f, "rebase conflict"),
            Self::NonFastForward => write!(f, "non-fast-forward"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum GitError {
    #[error("git {stage} failed: {diagnostics}")]
    Command {
        stage: &'static str,
        diagnostics: String,
    },

    #[error("Branch '{branch}' does not exist on {remote}")]
    MissingBranch { remote: String, branch: String },

    #[error("{kind} on '{branch}' against {remote_ref}: {diagnostics}")]
    Conflict {
        kind: ConflictKind,
        branch: String,
        remote_ref: String,
        diagnostics: String,
    },

    #[error("push of '{branch}' was rejected: {diagnostics}")]
    Rejected { branch: String, diagnostics: String },

    #[error("no changes to commit")]
    NothingToCommit,

    #[error(transparent)]
    Workspace(#[from] SandboxError),
}

/// Rejects names git would refuse or that could be read as an option.
pub(crate) fn validate_branch_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("branch name is empty".to_string());
    }
    if name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return Err(format!("invalid branch name '{name}'"));
    }
    if name.contains("..")
        || name.contains("@{")
        || name.ends_with(".lock")
        || name.ends_with('.')
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
    {
        return Err(format!("invalid branch name '{name}'"));
    }
    Ok(())
}

/// Whether a failed push was refused because the remote moved.
fn is_non_fast_forward(diagnostics: &str) -> bool {
    diagnostics.contains("non-fast-forward")
        || diagnostics.contains("fetch first")
        || diagnostics.contains("[rejected]")
}

pub(crate) struct GitSync {
    remote: String,
    author_name: String,
    author_email: String,
}

impl GitSync {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            remote: config.remote.clone(),
            author_name: config.commit_name.clone(),
            author_email: config.commit_email.clone(),
        }
    }

    fn remote_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.remote, branch)
    }

    async fn git(&self, ws: &Workspace<'_>, args: &str) -> Result<ExecOutput, GitError> {
        Ok(ws.run(&format!("git {args}")).await?)
    }

    async fn git_ok(
        &self,
        ws: &Workspace<'_>,
        stage: &'static str,
        args: &str,
    ) -> Result<ExecOutput, GitError> {
        let output = self.git(ws, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(GitError::Command {
                stage,
                diagnostics: output.combined(),
            })
        }
    }

    async fn remote_branch_exists(
        &self,
        ws: &Workspace<'_>,
        branch: &str,
    ) -> Result<bool, GitError> {
        let reference = shell_words::quote(&format!("{}^{{commit}}", self.remote_ref(branch)))
            .into_owned();
        let output = self
            .git(ws, &format!("rev-parse --verify --quiet {reference}"))
            .await?;
        Ok(output.success())
    }

    async fn head(&self, ws: &Workspace<'_>) -> Result<String, GitError> {
        let output = self.git_ok(ws, "rev-parse", "rev-parse HEAD").await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn checkout_remote(
        &self,
        ws: &Workspace<'_>,
        branch: &str,
    ) -> Result<(), GitError> {
        self.git_ok(
            ws,
            "checkout",
            &format!(
                "checkout -q -B {} {}",
                shell_words::quote(branch),
                shell_words::quote(&self.remote_ref(branch))
            ),
        )
        .await?;
        Ok(())
    }

    /// Brings the workspace to the latest remote base and then onto `target`.
    pub async fn sync_base(
        &self,
        ws: &Workspace<'_>,
        base: &str,
        target: BranchTarget<'_>,
    ) -> Result<SyncedRef, GitError> {
        let remote = shell_words::quote(&self.remote).into_owned();
        self.git_ok(ws, "fetch", &format!("fetch --prune {remote}"))
            .await?;

        if !self.remote_branch_exists(ws, base).await? {
            return Err(GitError::MissingBranch {
                remote: self.remote.clone(),
                branch: base.to_string(),
            });
        }
        self.checkout_remote(ws, base).await?;

        let branch = match target {
            BranchTarget::Working(name) => {
                if self.remote_branch_exists(ws, name).await? {
                    debug!(branch = name, "Continuing existing remote branch");
                    self.checkout_remote(ws, name).await?;
                } else {
                    debug!(branch = name, base, "Creating working branch from base");
                    self.git_ok(
                        ws,
                        "checkout",
                        &format!("checkout -q -B {}", shell_words::quote(name)),
                    )
                    .await?;
                }
                name.to_string()
            }
            BranchTarget::Existing(name) => {
                if !self.remote_branch_exists(ws, name).await? {
                    return Err(GitError::MissingBranch {
                        remote: self.remote.clone(),
                        branch: name.to_string(),
                    });
                }
                self.checkout_remote(ws, name).await?;
                name.to_string()
            }
        };

        self.git_ok(
            ws,
            "config",
            &format!(
                "config user.name {} && git config user.email {}",
                shell_words::quote(&self.author_name),
                shell_words::quote(&self.author_email)
            ),
        )
        .await?;

        let commit = self.head(ws).await?;
        info!(branch = %branch, commit = %commit, "Workspace synced");
        Ok(SyncedRef { branch, commit })
    }

    /// Files changed since `since`, committed or not.
    pub async fn changed_files(
        &self,
        ws: &Workspace<'_>,
        since: &str,
    ) -> Result<Vec<String>, GitError> {
        let committed = self
            .git_ok(
                ws,
                "diff",
                &format!("diff --name-only {}", shell_words::quote(since)),
            )
            .await?;
        let untracked = self
            .git_ok(ws, "ls-files", "ls-files --others --exclude-standard")
            .await?;

        let mut files: Vec<String> = committed
            .stdout
            .lines()
            .chain(untracked.stdout.lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Commits everything in the workspace and pushes it to `branch`.
    ///
    /// `since` is the commit the run started from; if HEAD still points
    /// at it after staging and committing, there is nothing to push.
    pub async fn commit_and_push(
        &self,
        ws: &Workspace<'_>,
        message: &str,
        branch: &str,
        since: &str,
    ) -> Result<PushReport, GitError> {
        self.git_ok(ws, "add", "add -A").await?;

        let status = self.git_ok(ws, "status", "status --porcelain").await?;
        if !status.stdout.trim().is_empty() {
            self.git_ok(
                ws,
                "commit",
                &format!("commit -q -m {}", shell_words::quote(message)),
            )
            .await?;
        }

        if self.head(ws).await? == since {
            return Err(GitError::NothingToCommit);
        }

        let remote = shell_words::quote(&self.remote).into_owned();
        self.git_ok(ws, "fetch", &format!("fetch {remote}")).await?;

        let remote_ref = self.remote_ref(branch);
        let mut rebased = false;
        if self.remote_branch_exists(ws, branch).await? {
            let rebase = self
                .git(ws, &format!("rebase {}", shell_words::quote(&remote_ref)))
                .await?;
            if !rebase.success() {
                warn!(branch, "Rebase onto remote branch failed, aborting");
                let mut diagnostics = rebase.combined();
                let abort_failure = match self.git(ws, "rebase --abort").await {
                    Ok(abort) if abort.success() => None,
                    Ok(abort) => Some(abort.combined()),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(failure) = abort_failure {
                    warn!(branch, failure = %failure, "Rebase abort failed, workspace may be mid-rebase");
                    diagnostics.push_str(&format!("\nrebase --abort failed: {failure}"));
                }
                return Err(GitError::Conflict {
                    kind: ConflictKind::Rebase,
                    branch: branch.to_string(),
                    remote_ref,
                    diagnostics,
                });
            }
            rebased = true;
        }

        let push = self
            .git(
                ws,
                &format!(
                    "push {remote} {}",
                    shell_words::quote(&format!("HEAD:refs/heads/{branch}"))
                ),
            )
            .await?;
        if !push.success() {
            let diagnostics = push.combined();
            return Err(if is_non_fast_forward(&diagnostics) {
                GitError::Conflict {
                    kind: ConflictKind::NonFastForward,
                    branch: branch.to_string(),
                    remote_ref,
                    diagnostics,
                }
            } else {
                GitError::Rejected {
                    branch: branch.to_string(),
                    diagnostics,
                }
            });
        }

        let commit = self.head(ws).await?;
        info!(branch, commit = %commit, rebased, "Pushed working branch");
        Ok(PushReport { commit, rebased })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{Reply, ScriptedSandbox};
    use crate::sandbox::{HostSandbox, Sandbox, WorkspaceHandle, WorkspaceSpec};
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    #[test]
    fn test_validate_branch_name() {
        assert!(validate_branch_name("feature/login").is_ok());
        assert!(validate_branch_name("fix-123").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("  ").is_err());
        assert!(validate_branch_name("-f").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("topic.lock").is_err());
        assert!(validate_branch_name("x~1").is_err());
    }

    #[test]
    fn test_non_fast_forward_classification() {
        assert!(is_non_fast_forward(
            " ! [rejected]        HEAD -> feature (fetch first)"
        ));
        assert!(is_non_fast_forward("error: failed to push some refs (non-fast-forward)"));
        assert!(!is_non_fast_forward("remote: Permission to acme/widgets.git denied"));
    }

    #[tokio::test]
    async fn test_rejected_push_is_classified_without_retry() {
        let sandbox = ScriptedSandbox::new()
            .on("status --porcelain", vec![Reply::ok(" M src/lib.rs\n")])
            .on("rev-parse HEAD", vec![Reply::ok("bbb\n")])
            .on("rev-parse --verify", vec![Reply::fail("")])
            .on(
                "git push",
                vec![Reply::fail(" ! [rejected]  HEAD -> feature (fetch first)")],
            );
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let err = git
            .commit_and_push(&ws, "Add feature", "feature", "aaa")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GitError::Conflict {
                kind: ConflictKind::NonFastForward,
                ..
            }
        ));
        assert_eq!(sandbox.count_matching("git push"), 1);
        assert_eq!(sandbox.count_matching("--force"), 0);
    }

    #[tokio::test]
    async fn test_failed_rebase_abort_is_reported() {
        let sandbox = ScriptedSandbox::new()
            .on("status --porcelain", vec![Reply::ok(" M src/lib.rs\n")])
            .on("rev-parse HEAD", vec![Reply::ok("bbb\n")])
            .on("rev-parse --verify", vec![Reply::ok("ccc\n")])
            .on("rebase --abort", vec![Reply::fail("fatal: no rebase in progress?")])
            .on("git rebase", vec![Reply::fail("CONFLICT (content): src/lib.rs")]);
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let err = git
            .commit_and_push(&ws, "Add feature", "feature", "aaa")
            .await
            .unwrap_err();

        let GitError::Conflict {
            kind, diagnostics, ..
        } = err
        else {
            panic!("expected a rebase conflict, got {err:?}");
        };
        assert_eq!(kind, ConflictKind::Rebase);
        assert!(diagnostics.contains("CONFLICT (content)"));
        assert!(diagnostics.contains("rebase --abort failed: fatal: no rebase in progress?"));
        assert_eq!(sandbox.count_matching("git push"), 0);
    }

    #[tokio::test]
    async fn test_permission_failure_is_rejected() {
        let sandbox = ScriptedSandbox::new()
            .on("status --porcelain", vec![Reply::ok(" M a\n")])
            .on("rev-parse HEAD", vec![Reply::ok("bbb\n")])
            .on("rev-parse --verify", vec![Reply::fail("")])
            .on("git push", vec![Reply::fail("remote: Permission denied")]);
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let err = git
            .commit_and_push(&ws, "msg", "feature", "aaa")
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Rejected { .. }));
    }

    // -------------------------------------------------------------------------
    // Against real repositories. Skipped when git is not installed.
    // -------------------------------------------------------------------------

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn git_stdout(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git").current_dir(dir).args(args).output().unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A bare remote with `main` and a seed clone used to push to it.
    struct Fixture {
        root: TempDir,
        remote: PathBuf,
        seed: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let remote = root.path().join("remote.git");
            let seed = root.path().join("seed");

            run_git(root.path(), &["init", "-q", "--bare", "remote.git"]);
            run_git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);
            run_git(root.path(), &["init", "-q", "seed"]);
            run_git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
            std::fs::write(seed.join("README.md"), "line one\n").unwrap();
            run_git(&seed, &["add", "README.md"]);
            run_git(&seed, &["commit", "-q", "-m", "initial"]);
            run_git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
            run_git(&seed, &["push", "-q", "origin", "main"]);

            Self { root, remote, seed }
        }

        fn spec(&self) -> WorkspaceSpec {
            WorkspaceSpec {
                image: String::new(),
                repo_url: self.remote.to_string_lossy().into_owned(),
                clone_branch: "main".to_string(),
                ssh_key: None,
            }
        }

        fn remote_ref(&self, branch: &str) -> String {
            git_stdout(
                &self.remote,
                &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            )
        }
    }

    #[tokio::test]
    async fn test_sync_and_push_new_working_branch() {
        if !git_available() {
            return;
        }
        let fixture = Fixture::new();
        let sandbox = HostSandbox::new(fixture.root.path().join("ws"));
        let handle = WorkspaceHandle::named("run");
        sandbox.provision(&handle, &fixture.spec()).await.unwrap();
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let synced = git
            .sync_base(&ws, "main", BranchTarget::Working("feature/notes"))
            .await
            .unwrap();
        assert_eq!(synced.branch, "feature/notes");
        assert_eq!(synced.commit, fixture.remote_ref("main"));

        ws.run("echo notes > NOTES.md").await.unwrap();
        let files = git.changed_files(&ws, &synced.commit).await.unwrap();
        assert_eq!(files, vec!["NOTES.md".to_string()]);

        let report = git
            .commit_and_push(&ws, "Add notes", "feature/notes", &synced.commit)
            .await
            .unwrap();
        assert!(!report.rebased);
        assert_eq!(fixture.remote_ref("feature/notes"), report.commit);

        sandbox.release(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_to_commit() {
        if !git_available() {
            return;
        }
        let fixture = Fixture::new();
        let sandbox = HostSandbox::new(fixture.root.path().join("ws"));
        let handle = WorkspaceHandle::named("run");
        sandbox.provision(&handle, &fixture.spec()).await.unwrap();
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let synced = git
            .sync_base(&ws, "main", BranchTarget::Working("feature/empty"))
            .await
            .unwrap();
        let err = git
            .commit_and_push(&ws, "Nothing", "feature/empty", &synced.commit)
            .await
            .unwrap_err();

        assert!(matches!(err, GitError::NothingToCommit));
        assert!(fixture.remote_ref("feature/empty").is_empty());
    }

    #[tokio::test]
    async fn test_missing_review_branch() {
        if !git_available() {
            return;
        }
        let fixture = Fixture::new();
        let sandbox = HostSandbox::new(fixture.root.path().join("ws"));
        let handle = WorkspaceHandle::named("run");
        sandbox.provision(&handle, &fixture.spec()).await.unwrap();
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let err = git
            .sync_base(&ws, "main", BranchTarget::Existing("feature/ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::MissingBranch { .. }));
    }

    #[tokio::test]
    async fn test_conflicting_remote_update_leaves_remote_untouched() {
        if !git_available() {
            return;
        }
        let fixture = Fixture::new();
        run_git(&fixture.seed, &["checkout", "-q", "-b", "feature/readme"]);
        std::fs::write(fixture.seed.join("README.md"), "line one, theirs\n").unwrap();
        run_git(&fixture.seed, &["commit", "-q", "-am", "theirs v1"]);
        run_git(&fixture.seed, &["push", "-q", "origin", "feature/readme"]);

        let sandbox = HostSandbox::new(fixture.root.path().join("ws"));
        let handle = WorkspaceHandle::named("run");
        sandbox.provision(&handle, &fixture.spec()).await.unwrap();
        let ws = Workspace::new(&sandbox, &handle);
        let git = GitSync::new(&GitConfig::default());

        let synced = git
            .sync_base(&ws, "main", BranchTarget::Working("feature/readme"))
            .await
            .unwrap();

        // Someone else pushes to the branch while the run is working.
        std::fs::write(fixture.seed.join("README.md"), "line one, theirs v2\n").unwrap();
        run_git(&fixture.seed, &["commit", "-q", "-am", "theirs v2"]);
        run_git(&fixture.seed, &["push", "-q", "origin", "feature/readme"]);
        let before = fixture.remote_ref("feature/readme");

        ws.run("echo 'line one, ours' > README.md").await.unwrap();
        let err = git
            .commit_and_push(&ws, "Ours", "feature/readme", &synced.commit)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GitError::Conflict {
                kind: ConflictKind::Rebase,
                ..
            }
        ));
        assert_eq!(fixture.remote_ref("feature/readme"), before);
        // The aborted rebase leaves the workspace on the branch, not mid-rebase.
        let status = ws.run("git status").await.unwrap();
        assert!(!status.stdout.contains("rebase in progress"));
    }
}
