use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use docguard::cli::{self, Cli, Commands};
use docguard::config::LoggingConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_file = cli.config.as_deref();

    // Config commands must work even when the file is broken.
    let logging = match cli.command {
        Commands::Config(_) => LoggingConfig::default(),
        _ => cli::load_config(config_file)
            .map(|c| c.logging)
            .unwrap_or_default(),
    };
    init_logging(cli.verbose, &logging);

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args, cli::load_config(config_file)?).await,
        Commands::Config(args) => cli::config::run(args, config_file),
        Commands::Key(args) => cli::key::run(args, &cli::load_config(config_file)?),
        Commands::Sign(args) => cli::sign::run(args, &cli::load_config(config_file)?).await,
        Commands::Replay(args) => cli::replay::run(args, &cli::load_config(config_file)?),
        Commands::Paths => cli::paths::run(&cli::load_config(config_file)?),
    }
}

/// `RUST_LOG` wins, then `--verbose`, then `logging.level`. Logs go to
/// stderr so replay output on stdout stays machine-readable.
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
