use std::sync::Arc;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use picto_studio::{
    Studio,
    clients::HttpGenerationClient,
    config::Config,
    model::StageStatus,
    observability,
    pipeline::CascadeState,
    store::ListQuery,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");
        match panic_info.location() {
            Some(location) => error!(
                file = location.file(),
                line = location.line(),
                message,
                "panic occurred"
            ),
            None => error!(message, "panic occurred without location information"),
        }
    }));

    observability::tracing::init().context("failed to initialize tracing")?;
    let config = Config::from_env().context("failed to load configuration")?;

    let generation = HttpGenerationClient::from_config(&config)
        .context("failed to build generation client")?;
    if let Err(error) = generation.health_check().await {
        warn!(error = %error, "generation service health check failed; continuing");
    }

    let studio = Studio::builder(Arc::new(generation))
        .with_config(&config)
        .build()
        .await
        .context("failed to build studio")?;

    if let Some(path) = config.import_path() {
        let summary = studio
            .import_file(path)
            .await
            .with_context(|| format!("failed to import {}", path.display()))?;
        info!(rows = summary.rows, replaced = summary.replaced, "import finished");
    }

    let pending: Vec<_> = studio
        .rows(&ListQuery::default())
        .into_iter()
        .filter(|row| row.status != StageStatus::Completed)
        .map(|row| row.id)
        .collect();
    info!(pending = pending.len(), concurrency = config.batch_concurrency(), "batch started");

    // 行ごとに独立したカスケードを並列に流す
    let reports: Vec<_> = stream::iter(pending.iter())
        .map(|id| studio.run_cascade(id))
        .buffer_unordered(config.batch_concurrency())
        .collect()
        .await;

    let mut failed = 0_usize;
    for report in &reports {
        match (&report.state, &report.error) {
            (CascadeState::Completed, _) => {
                info!(row_id = %report.row_id, durations = ?report.durations, "cascade completed");
            }
            (state, Some(error)) => {
                failed += 1;
                warn!(row_id = %report.row_id, state = %state, error = %error, "cascade did not complete");
            }
            (state, None) => {
                warn!(row_id = %report.row_id, state = %state, "cascade stopped");
            }
        }
    }

    info!(rows = reports.len(), failed, "batch finished");
    Ok(())
}
