use image_ai_renamer::{
    batch::{BatchError, BatchEvent, BatchOptions, BatchOrchestrator},
    config::AppConfig,
    models::{batch::BatchMode, job::ImageJob},
    services::{cancel::CancelToken, credentials::CredentialStore, gemini::GeminiClient},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(mode = %config.mode, source = ?config.source_folder, "Starting image-ai-renamer");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!("image_jobs_total", "Images that reached a final status");
    metrics::describe_counter!("vision_requests_total", "Vision API requests by outcome");
    metrics::describe_histogram!("vision_request_seconds", "Vision API request latency");
    metrics::describe_counter!(
        "credential_exhaustions_total",
        "Times an API key was quarantined after a quota error"
    );

    // Keys given inline replace the stored set
    let store = CredentialStore::new(&config.credentials_file);
    let inline_keys = config.inline_api_keys();
    let credentials = if inline_keys.is_empty() {
        store.load().await.expect("Failed to load API keys")
    } else {
        if let Err(e) = store.save(&inline_keys).await {
            tracing::warn!(error = %e, path = ?store.path(), "Failed to save API keys");
        }
        inline_keys
    };
    tracing::info!(keys = credentials.len(), "API keys loaded");

    let mut jobs = ImageJob::load_folder(&config.source_folder, &config.supported_extensions, false)
        .await
        .expect("Failed to list source images");
    if jobs.is_empty() {
        tracing::warn!(source = ?config.source_folder, "No supported images found");
        return;
    }

    let client = GeminiClient::new(&config.gemini_api_base, &config.gemini_model);
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = BatchOrchestrator::new(Arc::new(client)).with_events(events_tx);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if let BatchEvent::Progress { processed, total } = event {
                tracing::debug!(processed, total, "Batch progress");
            }
        }
    });

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling batch");
            on_signal.cancel();
        }
    });

    let options = BatchOptions::from_config(&config);
    match orchestrator.run(&mut jobs, credentials, &options, &cancel).await {
        Ok(summary) => {
            println!("{}", summary);
            if config.mode == BatchMode::Search && !cancel.is_cancelled() {
                let report = orchestrator
                    .copy_selected(&mut jobs, &config.output_folder)
                    .await;
                println!("Copied {} matching images ({} failed)", report.copied, report.failed);
            }
        }
        Err(BatchError::AllCredentialsExhausted) => {
            tracing::error!("All API keys exhausted, add more keys or try again later");
        }
        Err(e) => {
            tracing::error!(error = %e, "Batch failed");
        }
    }

    export_metrics(&prometheus_handle, &config).await;
}

async fn export_metrics(handle: &PrometheusHandle, config: &AppConfig) {
    let rendered = handle.render();
    match &config.metrics_textfile {
        Some(path) => {
            if let Err(e) = tokio::fs::write(path, rendered).await {
                tracing::warn!(error = %e, path = ?path, "Failed to write metrics file");
            }
        }
        None => tracing::debug!(metrics = %rendered, "Final metrics"),
    }
}
