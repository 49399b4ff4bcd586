use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trinitas::app;
use trinitas::cli::Cli;
use trinitas::config::TrinitasConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins; default keeps the CLI quiet below warnings.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = TrinitasConfig::load_or_default()?;

    if let Err(error) = app::dispatch::dispatch(cli, config).await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
    Ok(())
}
