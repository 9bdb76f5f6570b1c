pub mod config;
pub mod key;
pub mod paths;
pub mod replay;
pub mod serve;
pub mod sign;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::paths::Paths;

#[derive(Parser)]
#[command(name = "docguard")]
#[command(
    author,
    version,
    about = "Identity-gated document delivery with signed URLs and a viewer security monitor"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "DOCGUARD_CONFIG")]
    pub config: Option<String>,
}

/// Config from `--config` when given, else the XDG location.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let path = shellexpand::tilde(path).into_owned();
            let mut config = Config::load_from(std::path::Path::new(&path))?;
            config.paths = Paths::resolve()?;
            Ok(config)
        }
        None => Config::load(),
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (document API and storage origin)
    Serve(serve::ServeArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// URL signing key management
    Key(key::KeyArgs),

    /// Print a signed URL for a stored document
    Sign(sign::SignArgs),

    /// Replay a recorded viewer event trace through a headless monitor
    Replay(replay::ReplayArgs),

    /// Show resolved XDG directory paths
    Paths,
}
