//! Reviewlens server binary.
//!
//! Run `reviewlens --help` for usage information.

use anyhow::Result;
use reviewlens::{server, Args, Config};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    setup_logging(&args);

    let config = match Config::from_args(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if config.mock {
        info!("mock mode enabled - model endpoint will not be called");
    }

    info!(
        batch_size = config.pipeline.batch_size,
        concurrency = config.pipeline.concurrency,
        rate = config.limiter.max_per_window,
        max_attempts = config.retry.max_attempts,
        "starting reviewlens"
    );

    server::serve(Arc::new(config), args.port).await?;

    Ok(())
}

fn setup_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("reviewlens={level},tower_http=info"))
    });

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .init();
    }
}
