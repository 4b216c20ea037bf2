use anyhow::{Context, Result};
use attendface_core::{AttendanceBook, FaceDetector, GalleryStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("attendfaced starting");

    let config = config::Config::load()?;
    let addr = config.bind_addr()?;

    let store = GalleryStore::open(&config.dataset_dir)
        .with_context(|| format!("opening dataset dir {}", config.dataset_dir.display()))?;
    let attendance = AttendanceBook::open(&config.attendance_dir)
        .with_context(|| format!("opening attendance dir {}", config.attendance_dir.display()))?;

    let model_path = config.model_path.clone();
    let engine = engine::spawn_engine(
        move || FaceDetector::load(&model_path),
        store,
        config.pipeline_options(),
    )?;

    let state = api::AppState {
        engine,
        attendance: Arc::new(attendance),
        config: Arc::new(config),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "attendfaced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("attendfaced shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
