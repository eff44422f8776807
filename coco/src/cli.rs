use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coco_config::Config;

use crate::setup;

/// Routes collectd metrics to tiers of backends.
#[derive(Debug, Parser)]
#[command(name = "coco", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the router.
    Run {
        /// Path to the configuration file.
        #[arg(default_value = "coco.yml")]
        config: PathBuf,
    },
    /// Manage the configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration, including defaults.
    Show {
        /// Path to the configuration file.
        #[arg(default_value = "coco.yml")]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_path(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(load_config(&config)?),
        Command::Config {
            command: ConfigCommand::Show { config },
        } => show_config(&load_config(&config)?),
    }
}

fn run(config: Config) -> Result<()> {
    coco_log::init(config.logging());
    setup::dump_spawn_infos(&config);
    setup::check_config(&config)?;

    coco_server::run(config)?;
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let yaml = config.to_yaml_string()?;
    io::stdout().write_all(yaml.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_default_config() {
        let cli = Cli::try_parse_from(["coco", "run"]).unwrap();
        assert!(matches!(cli.command, Command::Run { config } if config == Path::new("coco.yml")));
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::try_parse_from(["coco", "config", "show", "/etc/coco.yml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config {
                command: ConfigCommand::Show { config }
            } if config == Path::new("/etc/coco.yml")
        ));
    }

    #[test]
    fn test_requires_command() {
        assert!(Cli::try_parse_from(["coco"]).is_err());
    }
}
