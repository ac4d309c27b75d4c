use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::{config::Config, monitor::Monitor, storage::VideoStore, thumbnail::ThumbnailDeriver};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: VideoStore,
    pub deriver: Arc<ThumbnailDeriver>,
    pub monitor: Arc<Monitor>,
    /// Bounds thumbnail derivations running at once across all requests.
    pub thumbnail_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, deriver: ThumbnailDeriver) -> Self {
        Self {
            store: VideoStore::new(&config.video_dir, &config.thumbnail_dir),
            deriver: Arc::new(deriver),
            monitor: Arc::new(Monitor::new(
                config.monitor.connection_history,
                config.monitor.notification_history,
            )),
            thumbnail_permits: Arc::new(Semaphore::new(config.max_concurrent_thumbnails)),
            config,
        }
    }
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub size: u64,
    pub url: String,
    pub download_url: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Serialize)]
pub struct VideoEntry {
    pub name: String,
    pub size: u64,
    pub size_mb: f64,
    pub extension: String,
    pub url: String,
    pub download_url: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<VideoEntry>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct ThumbnailResponse {
    pub success: bool,
    pub filename: String,
    pub thumbnail_url: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn video_url(name: &str) -> String {
    format!("/video/{}", name)
}

pub fn download_url(name: &str) -> String {
    format!("/download/{}", name)
}

pub fn preview_url(name: &str) -> String {
    format!("/preview/{}", name)
}
