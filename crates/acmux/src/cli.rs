use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "acmux",
    about = "Run an interactive CLI across a pool of rate-limited accounts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the supervised child under the best available account
    Run {
        /// Pin a specific account instead of letting the scheduler pick
        #[arg(long)]
        account: Option<String>,

        /// Disable automatic account switching on rate limits
        #[arg(long)]
        no_failover: bool,

        /// Extra arguments passed through to the child
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        child_args: Vec<String>,
    },

    /// Show the account pool with current usage and scores
    Accounts,

    /// Inspect or validate the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration for structural errors
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_child_args() {
        let cli = Cli::parse_from(["acmux", "run", "--account", "work", "--", "--model", "opus"]);
        match cli.command {
            Commands::Run {
                account,
                no_failover,
                child_args,
            } => {
                assert_eq!(account.as_deref(), Some("work"));
                assert!(!no_failover);
                assert_eq!(child_args, vec!["--model", "opus"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_no_failover_flag() {
        let cli = Cli::parse_from(["acmux", "run", "--no-failover"]);
        match cli.command {
            Commands::Run { no_failover, .. } => assert!(no_failover),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_config_validate_parses() {
        let cli = Cli::parse_from(["acmux", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Validate
            }
        ));
    }
}
