use anyhow::Result;
use clap::Parser;

mod accounts_cmd;
mod cli;
mod config_cmds;
mod overlay;
mod run_cmd;

use cli::{Cli, Commands, ConfigCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the supervised child.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = acmux_config::GlobalConfig::load()?;

    match cli.command {
        Commands::Run {
            account,
            no_failover,
            child_args,
        } => {
            let code = run_cmd::run(config, account, no_failover, child_args).await?;
            std::process::exit(code);
        }
        Commands::Accounts => accounts_cmd::list(config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmds::show(&config),
            ConfigCommands::Validate => config_cmds::validate(&config),
        },
    }
}
