#![warn(missing_docs)]

//! `bmirror`: replicate one S3 notification batch to its destination buckets.

use anyhow::Result;
use bucketmirror_s3::cli::{exit_code, Cli};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    tracing::info!("bmirror {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli.run().await {
        let code = exit_code(&e);
        tracing::error!("{:#}", e);
        std::process::exit(code);
    }
    Ok(())
}
