use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use keepsake_core::job::{Asset, JobInput};
use keepsake_generation::config::{GenerationConfig, StartOptions};
use keepsake_generation::orchestrator::JobOrchestrator;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Path of the required primary asset.
const PRIMARY_ASSET_VAR: &str = "KEEPSAKE_PRIMARY_ASSET";
/// Comma-separated paths of optional secondary assets.
const SECONDARY_ASSETS_VAR: &str = "KEEPSAKE_SECONDARY_ASSETS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keepsake_worker=debug,keepsake_generation=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GenerationConfig::from_env()?;
    let input = load_input().await?;
    input.validate()?;

    tracing::info!(
        api_url = %config.api_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Worker starting",
    );

    let orchestrator = Arc::new(JobOrchestrator::from_config(config)?);
    let mut updates = orchestrator.subscribe();

    let submission = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.start(input, StartOptions::default()).await }
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(state) => {
                    tracing::info!(
                        phase = %state.phase,
                        job_id = ?state.job_id,
                        results = state.result_assets.len(),
                        message = ?state.status_message,
                        error = ?state.error_message,
                        "Generation state changed",
                    );
                    if state.phase.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "State updates lagged, re-reading snapshot");
                    if orchestrator.state().phase.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, cancelling generation");
                orchestrator.cancel();
                break;
            }
        }
    }

    submission.await??;

    let state = orchestrator.state();
    for reference in &state.result_assets {
        tracing::info!(reference = %reference, "Generation result");
    }
    tracing::info!(phase = %state.phase, "Worker finished");
    Ok(())
}

/// Read the primary and secondary assets named by the environment.
async fn load_input() -> anyhow::Result<JobInput> {
    let primary_path = std::env::var(PRIMARY_ASSET_VAR)
        .with_context(|| format!("{PRIMARY_ASSET_VAR} must point at the primary asset"))?;
    let mut input = JobInput::new(read_asset(&primary_path).await?);

    if let Ok(secondary) = std::env::var(SECONDARY_ASSETS_VAR) {
        for path in secondary.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            input = input.with_secondary(read_asset(path).await?);
        }
    }

    Ok(input)
}

async fn read_asset(path: &str) -> anyhow::Result<Asset> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read asset {path}"))?;
    let file_name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    Ok(Asset::from_file_name(file_name, data))
}
