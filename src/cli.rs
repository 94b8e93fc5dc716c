use crate::config::DEFAULT_ENVIRONMENT;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Declarative infrastructure provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Target environment
    #[arg(short, long, global = true, env = "STRATA_ENV", default_value = DEFAULT_ENVIRONMENT)]
    pub env: String,

    /// Manifest file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true, env = "STRATA_FILE", default_value = "strata.toml")]
    pub file: PathBuf,

    /// State directory (defaults to $STRATA_STATE_DIR or ~/.local/state/strata)
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Create, update and delete resources to match the manifest
    Apply(ApplyArgs),

    /// Delete every resource recorded for the environment
    Destroy(ApplyArgs),

    /// Check the manifest and dependency graph without touching state
    Validate,

    /// Inspect or edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,

    /// Plan a destroy instead of a converge
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ApplyArgs {
    /// Number of parallel provider calls
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-attempt timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Attempts per action, including the first
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Stop dispatching new actions after the first failure
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one recorded resource
    Show {
        /// Resource name
        name: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget a resource without deleting it
    Rm {
        /// Resource name
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Release the environment lock left by an interrupted run
    Unlock {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "strata", "-e", "prod", "apply", "-j", "8", "--timeout", "30", "--max-attempts", "5", "-y",
            "--fail-fast",
        ])
        .unwrap();
        assert_eq!(cli.env, "prod");
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.jobs, Some(8));
        assert_eq!(args.timeout, Some(30));
        assert_eq!(args.max_attempts, Some(5));
        assert!(args.yes && args.fail_fast);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["strata", "plan", "--destroy", "-f", "infra.json", "--env", "dev"]).unwrap();
        assert_eq!(cli.file, PathBuf::from("infra.json"));
        assert_eq!(cli.env, "dev");
        assert!(matches!(cli.command, Command::Plan(PlanArgs { destroy: true, json: false })));
    }

    #[test]
    fn test_state_unlock() {
        let cli = Cli::try_parse_from(["strata", "-e", "prod", "state", "unlock", "--yes"]).unwrap();
        assert!(matches!(cli.command, Command::State(StateCommand::Unlock { yes: true })));
    }
}
