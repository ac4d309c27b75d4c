use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tracing::warn;
use uuid::Uuid;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v", "flv", "wmv"];

const THUMBNAIL_SUFFIX: &str = "_thumb.jpg";
const STAGING_PREFIX: &str = ".upload-";
const MAX_NAME_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filename: {0}")]
    InvalidName(String),
    #[error("unsupported file type: .{0}")]
    UnsupportedType(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("no free filename for {0}")]
    NamesExhausted(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct VideoAsset {
    pub name: String,
    pub size: u64,
    pub extension: String,
    pub modified: SystemTime,
}

/// Upload in progress, written to a hidden file until committed.
#[derive(Debug)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub file: File,
}

/// Videos and their thumbnails on local disk.
#[derive(Clone, Debug)]
pub struct VideoStore {
    video_dir: PathBuf,
    thumbnail_dir: PathBuf,
}

impl VideoStore {
    pub fn new(video_dir: impl Into<PathBuf>, thumbnail_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_dir: video_dir.into(),
            thumbnail_dir: thumbnail_dir.into(),
        }
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.video_dir).await?;
        fs::create_dir_all(&self.thumbnail_dir).await
    }

    pub fn thumbnail_path(&self, name: &str) -> PathBuf {
        self.thumbnail_dir.join(format!("{}{}", name, THUMBNAIL_SUFFIX))
    }

    /// Path of an existing video. Names must already be in sanitized form.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        match sanitize_filename(name) {
            Ok(clean) if clean == name => {}
            Ok(_) => return Err(StorageError::InvalidName(name.to_string())),
            Err(e) => return Err(e),
        }

        let path = self.video_dir.join(name);
        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stage(&self) -> Result<StagedUpload, StorageError> {
        let path = self
            .video_dir
            .join(format!("{}{}.part", STAGING_PREFIX, Uuid::new_v4().simple()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(StagedUpload { path, file })
    }

    /// Move a staged upload to the first free name among `name`,
    /// `stem_1.ext`, `stem_2.ext`, ... Linking fails when the target exists,
    /// so two uploads can never claim the same name.
    pub async fn commit(&self, staged: &Path, name: &str) -> Result<String, StorageError> {
        let (stem, ext) = split_extension(name);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match (attempt, ext) {
                (0, _) => name.to_string(),
                (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
                (n, None) => format!("{}_{}", stem, n),
            };
            match fs::hard_link(staged, self.video_dir.join(&candidate)).await {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(staged).await {
                        warn!("[storage] Failed to remove staging file {:?}: {}", staged, e);
                    }
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::NamesExhausted(name.to_string()))
    }

    pub async fn discard(&self, staged: &Path) {
        if let Err(e) = fs::remove_file(staged).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("[storage] Failed to remove staging file {:?}: {}", staged, e);
            }
        }
    }

    /// Stored videos, newest first.
    pub async fn list(&self) -> Result<Vec<VideoAsset>, StorageError> {
        let mut assets = Vec::new();
        let mut entries = fs::read_dir(&self.video_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let extension = match split_extension(&name).1 {
                Some(ext) if is_video_extension(ext) => ext.to_ascii_lowercase(),
                _ => continue,
            };

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    warn!("[storage] Failed to get metadata for {}: {}", name, e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            assets.push(VideoAsset {
                name,
                size: metadata.len(),
                extension,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        assets.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(assets)
    }
}

pub fn is_video_extension(ext: &str) -> bool {
    VIDEO_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// Reduce a client-supplied filename to `[A-Za-z0-9._-]`, defaulting to an
/// `.mp4` extension. Unsupported extensions are rejected.
pub fn sanitize_filename(original: &str) -> Result<String, StorageError> {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_start_matches('.');

    let (stem, ext) = split_extension(cleaned);
    let stem = stem.trim_end_matches('.');
    let stem = if stem.is_empty() { "video" } else { stem };

    match ext {
        None => Ok(format!("{}.mp4", stem)),
        Some(ext) if is_video_extension(ext) => Ok(format!("{}.{}", stem, ext)),
        Some(ext) => Err(StorageError::UnsupportedType(ext.to_string())),
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext)),
        Some((stem, _)) => (stem, None),
        None => (name, None),
    }
}
