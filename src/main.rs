use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod commands;
mod config;
mod detection;
mod forge;
mod git;
mod notifications;
mod pipeline;
mod record;
mod sandbox;
mod templates;
mod validator;

use commands::run::RunOptions;
use pipeline::Command;

#[derive(Parser)]
#[command(name = "smith")]
#[command(
    author,
    version,
    about = "Run coding agents against a repository in an isolated workspace"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and print each phase as it runs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question about the repository
    Ask {
        /// The question
        question: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Make a change on a working branch and push it
    Dev {
        /// What to change
        task: String,

        /// Branch to commit to (created from the base when missing)
        #[arg(short, long)]
        branch: String,

        /// Open or update a pull request after pushing
        #[arg(long)]
        pr: bool,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Review an existing branch against the base
    Review {
        /// Branch to review
        branch: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Write a starter smith.toml in the current directory
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Show recent runs
    Status {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Remove run records
    Clean {
        /// Also remove workspace containers left behind by interrupted runs
        #[arg(long)]
        containers: bool,
    },

    /// Check the container runtime, git and configuration
    Doctor,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(cli.verbose);

    let succeeded = match cli.command {
        Commands::Ask { question, options } => {
            commands::run::run(Command::Ask { question }, None, options, cli.verbose).await?
        }
        Commands::Dev {
            task,
            branch,
            pr,
            options,
        } => {
            commands::run::run(
                Command::Dev { task, open_pr: pr },
                Some(branch),
                options,
                cli.verbose,
            )
            .await?
        }
        Commands::Review { branch, options } => {
            commands::run::run(Command::Review { branch }, None, options, cli.verbose).await?
        }
        Commands::Init { force } => {
            commands::init::run(force)?;
            true
        }
        Commands::Status { limit } => {
            commands::status::run(limit)?;
            true
        }
        Commands::Clean { containers } => {
            commands::clean::run(containers).await?;
            true
        }
        Commands::Doctor => commands::doctor::run().await?,
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Human logs on stderr, plus JSON lines in `[logging] file` when set.
fn init_logging(verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Without --verbose only problems reach stderr next to the banner and result
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("smith=debug")
        } else {
            EnvFilter::new("smith=warn")
        }
    });

    // A broken config is reported by the command itself
    let log_file = std::env::current_dir()
        .ok()
        .and_then(|cwd| config::Config::load(&cwd).ok())
        .and_then(|config| config.logging.file);

    let appender = log_file.and_then(|path| {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let name = path
            .file_name()
            .map_or_else(|| "smith.log".to_string(), |n| n.to_string_lossy().into_owned());
        match RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(&dir)
        {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!("Failed to open log file in {}: {e}", dir.display());
                None
            }
        }
    });

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}
