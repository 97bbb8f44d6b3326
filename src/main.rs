use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use transcoder::app::create_app;
use transcoder::config::settings::AppConfig;
use transcoder::infrastructure::db::pool::connect_job_store;
use transcoder::infrastructure::staging::StagingArea;
use transcoder::infrastructure::storage::StorageService;
use transcoder::modules::transcode::repository::PgJobRepository;
use transcoder::modules::transcode::service::TranscodeService;
use transcoder::state::AppState;
use transcoder::workers::encoder::FfmpegEncoder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("transcoder=info,tower_http=info")),
        )
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("missing required environment variable")?;

    let db = connect_job_store(&config.database_url, config.database_max_connections).await?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_region,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    )
    .await;

    let staging = StagingArea::new(config.transcode.staging_dir.clone())
        .await
        .context("failed to prepare staging directory")?;

    let transcoder = TranscodeService::new(
        Arc::new(PgJobRepository::new(db)),
        Arc::new(storage),
        Arc::new(FfmpegEncoder::new(config.transcode.ffmpeg_path.clone())),
        staging,
        config.transcode.clone(),
    );
    transcoder.recover_interrupted().await?;

    let app = create_app(AppState::new(transcoder));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
