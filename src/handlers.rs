use crate::{
    error::{ApiError, ApiResult},
    models::{
        download_url, preview_url, video_url, AppState, ThumbnailResponse, UploadResponse,
        VideoEntry, VideoListResponse,
    },
    monitor::{render_page, MonitorSnapshot, NotificationLevel},
    storage::sanitize_filename,
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue,
    },
    response::{Html, IntoResponse, Json, Response},
};
use multer::{Field, Multipart};
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{fs::File, io::AsyncWriteExt};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info, warn};

// Room for the multipart envelope around the file field
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Upload a video file
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> ApiResult<Json<UploadResponse>> {
    let start_time = Instant::now();
    let max_file_size = state.config.max_file_size;

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Content-Type header".to_string()))?;

    let boundary = multer::parse_boundary(content_type).map_err(|e| {
        error!("[POST /upload] Failed to parse boundary: {}", e);
        ApiError::BadRequest(format!("Invalid multipart request: {}", e))
    })?;

    let mut multipart = Multipart::with_constraints(
        request.into_body().into_data_stream(),
        boundary,
        multer::Constraints::new().size_limit(
            multer::SizeLimit::new()
                .whole_stream(max_file_size.saturating_add(MULTIPART_OVERHEAD))
                .per_field(max_file_size),
        ),
    );

    // The video is only committed once the whole body has parsed, so a
    // failure in a later field leaves nothing stored.
    let mut pending: Option<PendingVideo> = None;
    if let Err(e) = read_fields(&state, &mut multipart, &mut pending).await {
        if let Some(video) = pending {
            state.store.discard(&video.staged).await;
        }
        return Err(e);
    }

    let video =
        pending.ok_or_else(|| ApiError::BadRequest("No video file uploaded".to_string()))?;
    let filename = match state.store.commit(&video.staged, &video.filename).await {
        Ok(name) => name,
        Err(e) => {
            state.store.discard(&video.staged).await;
            return Err(e.into());
        }
    };
    let file_size = video.size;
    let file_size_mb = file_size as f64 / 1024.0 / 1024.0;

    info!("[POST /upload] 📁 File: {}", filename);
    info!(
        "[POST /upload] 📦 Size: {:.2} MB ({} bytes)",
        file_size_mb, file_size
    );
    state.monitor.notify(
        NotificationLevel::Info,
        format!("Uploaded {} ({:.2} MB)", filename, file_size_mb),
    );

    let video_path = state.config.video_dir.join(&filename);
    let thumbnail_url = ensure_thumbnail(&state, &filename, video_path)
        .await
        .map(|_| preview_url(&filename));

    info!(
        "[POST /upload] ✅ SUCCESS - {} in {:.2}s",
        filename,
        start_time.elapsed().as_secs_f64()
    );

    Ok(Json(UploadResponse {
        success: true,
        url: video_url(&filename),
        download_url: download_url(&filename),
        thumbnail_url,
        size: file_size,
        filename,
    }))
}

/// Video field written to a staging file, waiting for the body to finish.
struct PendingVideo {
    staged: PathBuf,
    filename: String,
    size: u64,
}

async fn read_fields(
    state: &AppState,
    multipart: &mut Multipart<'_>,
    pending: &mut Option<PendingVideo>,
) -> ApiResult<()> {
    let max_file_size = state.config.max_file_size;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_file_size))?
    {
        let name = field.name().unwrap_or("").to_string();
        if pending.is_none() && (name == "video" || name == "file") {
            *pending = Some(stage_video_field(state, &mut field).await?);
        } else {
            // Drain the field
            while field
                .chunk()
                .await
                .map_err(|e| multipart_error(e, max_file_size))?
                .is_some()
            {}
        }
    }

    Ok(())
}

/// Stream the field into a staging file.
async fn stage_video_field(state: &AppState, field: &mut Field<'_>) -> ApiResult<PendingVideo> {
    if let Some(content_type) = field.content_type() {
        let is_video = content_type.type_().as_str() == "video"
            || content_type.essence_str() == "application/octet-stream";
        if !is_video {
            return Err(ApiError::BadRequest(
                "Only video files are allowed".to_string(),
            ));
        }
    }

    let original_name = field.file_name().unwrap_or("video.mp4").to_string();
    let filename = sanitize_filename(&original_name)?;

    let mut staged = state.store.stage().await?;
    let written = write_field(field, &mut staged.file, state.config.max_file_size).await;
    drop(staged.file);

    match written {
        Ok(0) => {
            state.store.discard(&staged.path).await;
            Err(ApiError::BadRequest("Uploaded file is empty".to_string()))
        }
        Ok(size) => Ok(PendingVideo {
            staged: staged.path,
            filename,
            size,
        }),
        Err(e) => {
            state.store.discard(&staged.path).await;
            Err(e)
        }
    }
}

async fn write_field(
    field: &mut Field<'_>,
    file: &mut File,
    max_file_size: u64,
) -> ApiResult<u64> {
    let mut written = 0u64;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, max_file_size))?
    {
        written += chunk.len() as u64;

        // Check file size as we read
        if written > max_file_size {
            return Err(too_large(max_file_size));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(written)
}

fn multipart_error(err: multer::Error, max_file_size: u64) -> ApiError {
    match err {
        multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
            too_large(max_file_size)
        }
        other => {
            error!("[POST /upload] Multipart parsing error: {}", other);
            ApiError::BadRequest(format!("Error parsing multipart request: {}", other))
        }
    }
}

fn too_large(max_file_size: u64) -> ApiError {
    warn!(
        "[POST /upload] File too large (max: {}MB)",
        max_file_size / 1024 / 1024
    );
    ApiError::PayloadTooLarge(format!(
        "File too large. Maximum file size is {}MB.",
        max_file_size / 1024 / 1024
    ))
}

/// List stored videos, deriving any missing thumbnails
pub async fn list_videos(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<VideoListResponse>> {
    let assets = state.store.list().await?;

    let mut handles = Vec::with_capacity(assets.len());
    for asset in assets {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let video_path = state.config.video_dir.join(&asset.name);
            let thumbnail = ensure_thumbnail(&state, &asset.name, video_path).await;
            (asset, thumbnail.is_some())
        }));
    }

    let mut videos = Vec::with_capacity(handles.len());
    for handle in handles {
        let (asset, has_thumbnail) = handle
            .await
            .map_err(|e| ApiError::Internal(format!("Listing task failed: {}", e)))?;
        videos.push(VideoEntry {
            url: video_url(&asset.name),
            download_url: download_url(&asset.name),
            thumbnail_url: has_thumbnail.then(|| preview_url(&asset.name)),
            size: asset.size,
            size_mb: asset.size as f64 / 1024.0 / 1024.0,
            extension: asset.extension,
            name: asset.name,
        });
    }

    Ok(Json(VideoListResponse {
        count: videos.len(),
        videos,
    }))
}

/// Play a video in place, with range support
pub async fn stream_video(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    request: Request<Body>,
) -> ApiResult<Response> {
    let path = state.store.resolve(&filename).await?;
    Ok(serve_file(path, request).await)
}

/// Send a video as an attachment
pub async fn download_video(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    request: Request<Body>,
) -> ApiResult<Response> {
    let path = state.store.resolve(&filename).await?;
    let mut response = serve_file(path, request).await;

    if response.status().is_success() {
        let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
            .map_err(|e| ApiError::Internal(format!("Invalid header: {}", e)))?;
        response.headers_mut().insert(CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

/// Serve the preview image, deriving it first when missing
pub async fn preview_video(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    request: Request<Body>,
) -> ApiResult<Response> {
    let video_path = state.store.resolve(&filename).await?;
    let thumbnail = ensure_thumbnail(&state, &filename, video_path)
        .await
        .ok_or_else(|| ApiError::Internal("Failed to generate thumbnail".to_string()))?;
    Ok(serve_file(thumbnail, request).await)
}

/// Explicitly generate a missing thumbnail
pub async fn generate_thumbnail(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult<Json<ThumbnailResponse>> {
    let video_path = state.store.resolve(&filename).await?;
    ensure_thumbnail(&state, &filename, video_path)
        .await
        .ok_or_else(|| ApiError::Internal("Failed to generate thumbnail".to_string()))?;

    Ok(Json(ThumbnailResponse {
        success: true,
        thumbnail_url: preview_url(&filename),
        filename,
    }))
}

pub async fn monitor_page(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_page(&state.monitor.snapshot()))
}

pub async fn monitor_api(State(state): State<Arc<AppState>>) -> Json<MonitorSnapshot> {
    Json(state.monitor.snapshot())
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

/// Path of the video's thumbnail, deriving it when missing. `None` when
/// derivation failed or missed the deadline; the next request retries.
async fn ensure_thumbnail(state: &AppState, name: &str, video_path: PathBuf) -> Option<PathBuf> {
    let thumbnail = state.store.thumbnail_path(name);
    if tokio::fs::try_exists(&thumbnail).await.unwrap_or(false) {
        return Some(thumbnail);
    }

    let permit = state.thumbnail_permits.clone().acquire_owned().await.ok()?;
    // Another request may have finished it while we waited
    if tokio::fs::try_exists(&thumbnail).await.unwrap_or(false) {
        return Some(thumbnail);
    }

    let started = Instant::now();
    let deriver = state.deriver.clone();
    let size = state.config.thumbnail_size;
    let output = thumbnail.clone();
    // The permit travels with the blocking work, so a request that gives up
    // on the deadline does not free a slot while the derivation still runs.
    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        deriver.derive_thumbnail(&video_path, &output, size)
    });

    let timeout_secs = state.config.thumbnail_timeout_secs;
    let outcome = if timeout_secs == 0 {
        Ok(task.await)
    } else {
        tokio::time::timeout(Duration::from_secs(timeout_secs), task).await
    };

    match outcome {
        Ok(Ok(true)) => {
            info!(
                "[thumbnail] ✓ {} ready in {:.2}s",
                name,
                started.elapsed().as_secs_f64()
            );
            state
                .monitor
                .notify(NotificationLevel::Info, format!("Thumbnail ready for {}", name));
            Some(thumbnail)
        }
        Ok(Ok(false)) => {
            error!("[thumbnail] ✗ No thumbnail could be written for {}", name);
            state.monitor.notify(
                NotificationLevel::Error,
                format!("Thumbnail generation failed for {}", name),
            );
            None
        }
        Ok(Err(e)) => {
            error!("[thumbnail] ✗ Derivation task for {} failed: {}", name, e);
            state.monitor.notify(
                NotificationLevel::Error,
                format!("Thumbnail generation failed for {}", name),
            );
            None
        }
        Err(_) => {
            warn!(
                "[thumbnail] Derivation for {} exceeded {}s",
                name, timeout_secs
            );
            state.monitor.notify(
                NotificationLevel::Warning,
                format!("Thumbnail generation timed out for {}", name),
            );
            None
        }
    }
}

async fn serve_file(path: PathBuf, request: Request<Body>) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
