mod cli;
mod commands;
mod config;
mod display;
mod interrupt;
mod paths;
mod progress;
mod provider;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::Status;
use declarative::ValidationError;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Some actions failed or were skipped
const EXIT_PARTIAL: u8 = 3;
/// The manifest or plan was rejected before any provider call
const EXIT_VALIDATION: u8 = 4;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Selected environment
    pub env: String,
    /// Manifest path
    pub file: PathBuf,
    pub state_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        env: cli.env,
        file: cli.file,
        state_dir: cli.state_dir,
    };
    log::trace!("verbosity {}", ctx.verbose);

    match dispatch(&ctx, cli.command) {
        Ok(Status::Success | Status::Aborted) => ExitCode::SUCCESS,
        Ok(Status::Partial) => ExitCode::from(EXIT_PARTIAL),
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<Status> {
    match command {
        Command::Plan(args) => commands::deploy::plan(ctx, args),
        Command::Apply(args) => commands::deploy::apply(ctx, &args),
        Command::Destroy(args) => commands::deploy::destroy(ctx, &args),
        Command::Validate => commands::validate::run(ctx),
        Command::State(cmd) => commands::state::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "strata", &mut io::stdout());
            Ok(Status::Success)
        }
    }
}

/// Validation failures anywhere in the chain exit with 4, everything else with 1
fn exit_code(err: &anyhow::Error) -> u8 {
    let validation = err.chain().any(|cause| {
        cause.downcast_ref::<ValidationError>().is_some()
            || cause
                .downcast_ref::<declarative::Error>()
                .is_some_and(declarative::Error::is_validation)
    });
    if validation { EXIT_VALIDATION } else { 1 }
}
