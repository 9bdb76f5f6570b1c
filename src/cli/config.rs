use anyhow::Result;
use clap::{Args, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use super::load_config;
use crate::config::{Config, DEFAULT_CONFIG_TEMPLATE};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., delivery.url_ttl_secs)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., server.port)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, config_file: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(&load_config(config_file)?, &format),
        ConfigCommands::Get { key } => {
            println!("{}", load_config(config_file)?.get_value(&key)?);
            Ok(())
        }
        ConfigCommands::Set { key, value } => set_config(load_config(config_file)?, &key, &value),
        ConfigCommands::Path => {
            println!("{}", config_path(config_file)?.display());
            Ok(())
        }
        ConfigCommands::Init { force } => init_config(&config_path(config_file)?, force),
    }
}

fn config_path(config_file: Option<&str>) -> Result<PathBuf> {
    match config_file {
        Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).into_owned())),
        None => Config::config_path(),
    }
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    let mut shown = config.clone();
    redact(&mut shown);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&shown)?),
        _ => println!("{}", toml::to_string_pretty(&shown)?),
    }
    Ok(())
}

fn redact(config: &mut Config) {
    if !config.auth.secret.is_empty() {
        config.auth.secret = "********".to_string();
    }
    if let Some(ref mut key) = config.delivery.signing_key {
        *key = "********".to_string();
    }
}

fn set_config(mut config: Config, key: &str, value: &str) -> Result<()> {
    config.set_value(key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;

    println!("Created config file at {}", path.display());
    Ok(())
}
