//! `acmux config`: show and validate the configuration.

use acmux_config::GlobalConfig;
use anyhow::{Context, Result};

pub fn show(config: &GlobalConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render config")?;
    print!("{rendered}");
    Ok(())
}

pub fn validate(config: &GlobalConfig) -> Result<()> {
    config.validate()?;

    if config.accounts.is_empty() {
        println!("warning: no accounts configured");
    }
    for account in &config.accounts {
        if !account.config_dir.exists() {
            println!(
                "warning: account '{}': config_dir {} does not exist",
                account.id,
                account.config_dir.display()
            );
        }
    }
    if config.usage.command.is_none() {
        println!("warning: no usage probe configured, scheduling will ignore quotas");
    }

    println!("config ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_renders_default_config() {
        assert!(show(&GlobalConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(validate(&GlobalConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = GlobalConfig::default();
        config.scoring.window_weight = 0.9;
        assert!(validate(&config).is_err());
    }
}
