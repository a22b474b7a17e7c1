use clap::Parser;
use digestcord::cli::Cli;
use digestcord::{commands, config::Config, Data};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.verbose {
        filter = filter.add_directive("digestcord=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let config = Config::from_env()?;
    debug!("Loaded configuration: {:?}", config);

    let data = Data::load(config)?;
    commands::dispatch(&data, cli.command).await
}
