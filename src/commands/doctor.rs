//! Check that runs can actually start from here.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::process::Command;

use crate::config::Config;
use crate::sandbox::DockerSandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Check {
    name: &'static str,
    status: Status,
    detail: String,
}

impl Check {
    fn new(name: &'static str, status: Status, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

/// Entry point. Returns whether every required check passed.
pub(crate) async fn run() -> Result<bool> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut checks = Vec::new();

    let config = match Config::load(&cwd) {
        Ok(config) => {
            checks.push(Check::new("config", Status::Ok, "loaded"));
            config
        }
        Err(e) => {
            checks.push(Check::new("config", Status::Fail, format!("{e:#}")));
            print!("{}", format_checks(&checks));
            return Ok(false);
        }
    };

    checks.push(match config.agent.get_provider() {
        Ok(provider) => Check::new("agent", Status::Ok, provider.to_string()),
        Err(e) => Check::new("agent", Status::Fail, e.to_string()),
    });

    checks.push(git_check());

    if config.sandbox.enabled {
        checks.push(docker_check(&config).await);
    } else {
        checks.push(Check::new(
            "docker",
            Status::Warn,
            "sandbox disabled, workspaces run on the host",
        ));
    }

    let has_token = std::env::var("SMITH_GITHUB_TOKEN").is_ok_and(|t| !t.trim().is_empty())
        || config.projects.iter().any(|p| p.github_token.is_some());
    checks.push(if has_token {
        Check::new("github", Status::Ok, "token configured")
    } else {
        Check::new(
            "github",
            Status::Warn,
            "no token, dev runs cannot open pull requests",
        )
    });

    print!("{}", format_checks(&checks));
    Ok(all_passed(&checks))
}

fn git_check() -> Check {
    match Command::new("git").arg("--version").output() {
        Ok(output) if output.status.success() => Check::new(
            "git",
            Status::Ok,
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ),
        Ok(output) => Check::new(
            "git",
            Status::Fail,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ),
        Err(e) => Check::new("git", Status::Fail, format!("not found on PATH: {e}")),
    }
}

async fn docker_check(config: &Config) -> Check {
    let sandbox = match DockerSandbox::connect(config.sandbox.clone()) {
        Ok(sandbox) => sandbox,
        Err(e) => return Check::new("docker", Status::Fail, e.to_string()),
    };
    if let Err(e) = sandbox.ping().await {
        return Check::new("docker", Status::Fail, e.to_string());
    }
    match sandbox.version().await {
        Ok(version) => Check::new("docker", Status::Ok, format!("daemon {version}")),
        Err(e) => Check::new("docker", Status::Warn, e.to_string()),
    }
}

fn all_passed(checks: &[Check]) -> bool {
    checks.iter().all(|c| c.status != Status::Fail)
}

fn format_checks(checks: &[Check]) -> String {
    let mut out = String::new();
    writeln!(&mut out).unwrap();
    for check in checks {
        let mark = match check.status {
            Status::Ok => "✓".green().bold(),
            Status::Warn => "!".yellow().bold(),
            Status::Fail => "✗".red().bold(),
        };
        writeln!(&mut out, "  {} {:<8} {}", mark, check.name, check.detail.dimmed()).unwrap();
    }
    out
}
