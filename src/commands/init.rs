//! Write a starter `smith.toml` into the current directory.
//!
//! Planning is pure: it decides per file whether to create, overwrite or
//! leave it alone. Applying the plan takes a writer closure so tests never
//! touch the filesystem.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::CONFIG_FILE;
use crate::templates;

/// Runs the init command.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    info!("Initializing smith in {}", cwd.display());

    let plan = plan(&scaffold(), force, |path| cwd.join(path).exists());
    apply(&plan, |path, content| {
        let target = cwd.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("Failed to write {}", path.display()))
    })?;

    print!("{}", format_plan(&plan));
    Ok(())
}

/// A file `smith init` knows how to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scaffold {
    path: &'static str,
    content: &'static str,
    purpose: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Overwrite,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedFile {
    path: PathBuf,
    content: &'static str,
    purpose: &'static str,
    action: Action,
}

fn scaffold() -> Vec<Scaffold> {
    vec![
        Scaffold {
            path: CONFIG_FILE,
            content: templates::SMITH_TOML,
            purpose: "agent, sandbox, pipeline and project settings",
        },
        Scaffold {
            path: ".smith/.gitignore",
            content: templates::SMITH_GITIGNORE,
            purpose: "keeps run records out of git",
        },
    ]
}

/// Decides what happens to each file. Existing files are kept unless
/// `force` is set.
fn plan<E>(files: &[Scaffold], force: bool, exists: E) -> Vec<PlannedFile>
where
    E: Fn(&Path) -> bool,
{
    files
        .iter()
        .map(|file| {
            let path = PathBuf::from(file.path);
            let action = match (exists(&path), force) {
                (false, _) => Action::Create,
                (true, true) => Action::Overwrite,
                (true, false) => Action::Keep,
            };
            PlannedFile {
                path,
                content: file.content,
                purpose: file.purpose,
                action,
            }
        })
        .collect()
}

/// Writes every planned file that is not kept.
fn apply<W>(plan: &[PlannedFile], mut write: W) -> Result<()>
where
    W: FnMut(&Path, &str) -> Result<()>,
{
    for file in plan.iter().filter(|f| f.action != Action::Keep) {
        write(&file.path, file.content)?;
    }
    Ok(())
}

fn format_plan(plan: &[PlannedFile]) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{} smith initialized\n", "✓".green().bold()).unwrap();
    for file in plan {
        let path = file.path.display().to_string();
        match file.action {
            Action::Create => {
                writeln!(&mut out, "  {} {} - {}", "+".green(), path.cyan(), file.purpose).unwrap();
            }
            Action::Overwrite => {
                writeln!(&mut out, "  {} {} (overwritten)", "↻".blue(), path).unwrap();
            }
            Action::Keep => {
                writeln!(
                    &mut out,
                    "  {} {} (already exists, use --force to overwrite)",
                    "⊘".yellow(),
                    path
                )
                .unwrap();
            }
        }
    }

    writeln!(&mut out, "\n{}", "Next steps:".yellow().bold()).unwrap();
    writeln!(
        &mut out,
        "  1. Add your repositories under {} in {}",
        "[[projects]]".cyan(),
        CONFIG_FILE.cyan()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  2. Run {} to check the container runtime",
        "smith doctor".green()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  3. Try {}",
        "smith ask \"How is this project structured?\"".green()
    )
    .unwrap();

    out
}
