mod api;
mod bootstrap;
mod chain;
mod config;
mod draws;
mod earnings;
mod error;
mod http;
mod middleware;
mod payer;
mod server;
mod settlement;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

// Initialize logging and tracing
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("{},tower_http=info", level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    init_tracing(&config.log_level);
    info!("🚀 Starting lottery settlement service");

    let (state, workers) = bootstrap::initialize(&config).await?;
    let jobs = settlement::jobs(&config, &workers);

    // Create HTTP server
    let app = server::create_app(state, &config.static_path, &config.cors_origins);

    // The scheduler only returns early when no job is enabled
    let scheduler = async move {
        settlement::scheduler::run(jobs).await?;
        info!("no jobs scheduled");
        std::future::pending::<Result<(), settlement::SchedulerError>>().await
    };

    tokio::select! {
        result = scheduler => result.context("scheduler stopped")?,
        result = server::run_server(app, &config.bind_address) => result?,
    }

    info!("Shutting down");
    Ok(())
}
