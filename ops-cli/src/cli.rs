use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Approval workflow operations
#[derive(Parser, Debug)]
#[command(name = "approvals", version)]
#[command(about = "Validate approval flows, manage the schema and run escalation sweeps")]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "APPROVALS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Work with flow definition files
    Flows {
        #[command(subcommand)]
        command: FlowsCommand,
    },
    /// Database administration
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Escalate overdue approval steps
    Sweep {
        /// Run a single sweep and exit instead of scheduling
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum FlowsCommand {
    /// Parse and validate a YAML or JSON file of flow definitions
    Validate { file: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Install or upgrade the approval schema
    Migrate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_nested_subcommands_and_globals() {
        let cli = Cli::try_parse_from(["approvals", "flows", "validate", "flows.yaml", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Flows { command: FlowsCommand::Validate { ref file } } if file == &PathBuf::from("flows.yaml")
        ));

        let cli = Cli::try_parse_from(["approvals", "--config", "prod.yaml", "sweep", "--once"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("prod.yaml")));
        assert!(matches!(cli.command, Command::Sweep { once: true }));

        assert!(Cli::try_parse_from(["approvals", "db"]).is_err());
    }
}
