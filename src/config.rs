use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::thumbnail::{ThumbnailSize, DEFAULT_JPEG_QUALITY};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub video_dir: String,
    pub thumbnail_dir: String,
    pub max_file_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            video_dir: "videos".to_string(),
            thumbnail_dir: "thumbnails".to_string(),
            max_file_size: 500 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub max_concurrent: Option<usize>, // None = auto-detect
    pub generation_timeout_secs: u64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        let size = ThumbnailSize::default();
        Self {
            width: size.width,
            height: size.height,
            quality: DEFAULT_JPEG_QUALITY,
            max_concurrent: None,
            generation_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub connection_history: usize,
    pub notification_history: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection_history: 100,
            notification_history: 50,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub thumbnail: ThumbnailConfig,
    pub monitor: MonitorConfig,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub video_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub max_file_size: u64,
    pub thumbnail_size: ThumbnailSize,
    pub thumbnail_quality: u8,
    pub max_concurrent_thumbnails: usize,
    pub thumbnail_timeout_secs: u64,
    pub monitor: MonitorConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let config_path = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("config.toml"));
        let file = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<ConfigFile>(&content)?
        } else {
            ConfigFile::default()
        };

        let mut config = Self::from_file(file, &base_dir);

        // Env vars override the config file
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(dir) = std::env::var("VIDEO_DIR") {
            config.video_dir = resolve_dir(&base_dir, &dir);
        }
        if let Ok(dir) = std::env::var("THUMBNAIL_DIR") {
            config.thumbnail_dir = resolve_dir(&base_dir, &dir);
        }
        if let Some(size) = std::env::var("MAX_FILE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_file_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        Self::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    fn from_file(file: ConfigFile, base_dir: &Path) -> Self {
        let max_concurrent_thumbnails = file
            .thumbnail
            .max_concurrent
            .filter(|&v| v > 0)
            .unwrap_or_else(default_concurrency);

        Self {
            port: file.server.port,
            video_dir: resolve_dir(base_dir, &file.server.video_dir),
            thumbnail_dir: resolve_dir(base_dir, &file.server.thumbnail_dir),
            max_file_size: file.server.max_file_size,
            thumbnail_size: ThumbnailSize {
                width: file.thumbnail.width,
                height: file.thumbnail.height,
            },
            thumbnail_quality: file.thumbnail.quality,
            max_concurrent_thumbnails,
            thumbnail_timeout_secs: file.thumbnail.generation_timeout_secs,
            monitor: file.monitor,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.thumbnail_size.width == 0 || self.thumbnail_size.height == 0 {
            anyhow::bail!(
                "thumbnail size must be non-zero, got {}x{}",
                self.thumbnail_size.width,
                self.thumbnail_size.height
            );
        }
        if !(1..=100).contains(&self.thumbnail_quality) {
            anyhow::bail!("thumbnail quality must be 1-100, got {}", self.thumbnail_quality);
        }
        if self.monitor.connection_history == 0 || self.monitor.notification_history == 0 {
            anyhow::bail!("monitor history capacities must be non-zero");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_file(ConfigFile::default(), &base_dir)
    }
}

fn default_concurrency() -> usize {
    num_cpus::get().saturating_sub(1).clamp(2, 8)
}

fn resolve_dir(base_dir: &Path, dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
