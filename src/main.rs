//! editflow CLI entry point.
//!
//! Loads the config, initializes logging and hands off to the CLI module.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = editflow::cli::parse_cli();
    let config = editflow::cli::load_config(&cli)?;

    // RUST_LOG wins over --log-level and the config value
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    editflow::cli::run_with_cli(cli, config).await
}
