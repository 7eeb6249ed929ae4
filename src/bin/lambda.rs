//! AWS Lambda entry point for feedwatch
//!
//! Deploy with `cargo lambda build --release --features lambda` and trigger
//! on a schedule; each invocation runs one monitoring cycle.

use std::sync::Arc;

use feedwatch::{
    config::RemoteConfigLoader,
    error::AppError,
    pipeline::{self, DispatchSummary},
    storage::s3::S3Storage,
    utils::HttpProber,
};
use lambda_runtime::{Error as LambdaError, LambdaEvent, service_fn};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("feedwatch Lambda starting...");
    lambda_runtime::run(service_fn(handler)).await
}

/// Handler for AWS Lambda events.
async fn handler(event: LambdaEvent<Value>) -> Result<Value, LambdaError> {
    info!("Received event: {:?}", event.payload);

    match run_cycle().await {
        Ok(summary) => {
            info!(
                "Cycle complete: {} checked, {} written, {} failed",
                summary.checked,
                summary.written(),
                summary.failed
            );
            Ok(serde_json::json!({
                "status": "success",
                "summary": summary,
            }))
        }
        Err(e) => {
            error!("Cycle failed: {}", e);
            Ok(serde_json::json!({
                "status": "error",
                "message": e.to_string()
            }))
        }
    }
}

async fn run_cycle() -> Result<DispatchSummary, AppError> {
    let storage = S3Storage::from_env().await?;
    let config_prefix = std::env::var("CONFIG_S3_PREFIX").unwrap_or_else(|_| "config".to_string());

    let loader = RemoteConfigLoader::new(storage.clone(), &config_prefix);
    let config = loader.load_config().await?;
    let catalog = loader.load_catalog(&config).await?;

    let prober = Arc::new(HttpProber::from_config(&config.monitor)?);
    pipeline::run_dispatch(&config, &catalog, Arc::new(storage), prober).await
}
