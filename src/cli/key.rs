use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::delivery::ensure_signing_key;

#[derive(Args)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommands,
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Generate the URL signing key in the data directory (0600)
    Init,
}

pub fn run(args: KeyArgs, config: &Config) -> Result<()> {
    match args.command {
        KeyCommands::Init => {
            if config
                .delivery
                .signing_key
                .as_deref()
                .is_some_and(|k| !k.is_empty())
            {
                println!("Note: delivery.signing_key is set and takes precedence over the key file");
            }
            if ensure_signing_key(&config.paths.data_dir)? {
                println!("Signing key created in {}", config.paths.data_dir.display());
            } else {
                println!(
                    "Signing key already exists in {}",
                    config.paths.data_dir.display()
                );
            }
            Ok(())
        }
    }
}
