use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod ffmpeg;
mod handlers;
mod models;
mod monitor;
mod storage;
mod system_info;
mod thumbnail;

use config::Config;
use ffmpeg::FfmpegFrameSource;
use handlers::{
    download_video, generate_thumbnail, list_videos, monitor_api, monitor_page, not_found,
    preview_video, stream_video, upload_handler,
};
use models::AppState;
use thumbnail::{FrameSource, ThumbnailDeriver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vidsphere_server=debug,tower_http=debug")),
        )
        .init();

    // Load configuration
    let config = Config::from_env();

    // Detect the decoder once; without it every preview is a placeholder
    let decoder = FfmpegFrameSource::detect();
    let decoder_version = decoder.as_ref().map(|d| d.version().to_string());
    let frames = decoder.map(|d| Arc::new(d) as Arc<dyn FrameSource>);
    let deriver = ThumbnailDeriver::new(frames, config.thumbnail_quality);

    let app_state = Arc::new(AppState::new(config.clone(), deriver));

    // Ensure directories exist
    app_state.store.ensure_dirs().await?;

    system_info::print_startup_info(&config, decoder_version.as_deref());
    info!(
        "Serving videos from {:?} (decoder: {})",
        app_state.store.video_dir(),
        app_state.deriver.has_decoder()
    );

    let app = build_router(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✅ Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/videos", get(list_videos))
        .route("/video/:filename", get(stream_video))
        .route("/download/:filename", get(download_video))
        .route("/preview/:filename", get(preview_video))
        .route("/thumbnail/:filename", post(generate_thumbnail))
        .route("/monitor", get(monitor_page))
        .route("/api/monitor", get(monitor_api))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.monitor.clone(),
            monitor::track_connections,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
