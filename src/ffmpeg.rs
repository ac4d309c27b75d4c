use image::{ImageFormat, RgbImage};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, warn};

use crate::thumbnail::{FrameError, FrameSource};

/// Frame decoding backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Clone, Debug)]
pub struct FfmpegFrameSource {
    version: String,
}

impl FfmpegFrameSource {
    /// Look for both binaries. `None` means the capability is absent and
    /// callers should go straight to placeholders.
    pub fn detect() -> Option<Self> {
        let version = match tool_version("ffmpeg") {
            Ok(v) => v,
            Err(e) => {
                warn!("[ffmpeg] Decoder unavailable: {}", e);
                return None;
            }
        };
        if let Err(e) = tool_version("ffprobe") {
            warn!("[ffmpeg] Decoder unavailable: {}", e);
            return None;
        }

        debug!("[ffmpeg] Using {}", version);
        Some(Self { version })
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl FrameSource for FfmpegFrameSource {
    fn frame_count(&self, video: &Path) -> Result<u64, FrameError> {
        if !video.is_file() {
            return Err(FrameError::Missing(video.to_path_buf()));
        }

        let output = run(
            "ffprobe",
            Command::new("ffprobe")
                .arg("-v")
                .arg("error")
                .arg("-select_streams")
                .arg("v:0")
                .arg("-count_packets")
                .arg("-show_entries")
                .arg("stream=nb_read_packets")
                .arg("-of")
                .arg("csv=p=0")
                .arg(video),
        )?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim().trim_end_matches(',');
        // no video stream at all prints nothing
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed.parse::<u64>().map_err(|_| FrameError::Parse {
            tool: "ffprobe",
            output: stdout.to_string(),
        })
    }

    fn decode_frame(&self, video: &Path, index: u64) -> Result<RgbImage, FrameError> {
        let output = run(
            "ffmpeg",
            Command::new("ffmpeg")
                .arg("-v")
                .arg("error")
                .arg("-i")
                .arg(video)
                .arg("-vf")
                .arg(format!("select=eq(n\\,{})", index))
                .arg("-vsync")
                .arg("0")
                .arg("-frames:v")
                .arg("1")
                .arg("-f")
                .arg("image2pipe")
                .arg("-vcodec")
                .arg("png")
                .arg("-"),
        )?;

        if output.stdout.is_empty() {
            return Err(FrameError::Failed {
                tool: "ffmpeg",
                stderr: format!("no frame at index {}", index),
            });
        }

        let frame = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?;
        Ok(frame.to_rgb8())
    }
}

fn run(tool: &'static str, command: &mut Command) -> Result<Output, FrameError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|source| FrameError::Spawn { tool, source })?;

    if !output.status.success() {
        return Err(FrameError::Failed {
            tool,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

fn tool_version(tool: &'static str) -> Result<String, FrameError> {
    let output = run(tool, Command::new(tool).arg("-version"))?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("unknown")
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::{ThumbnailDeriver, ThumbnailSize, DEFAULT_JPEG_QUALITY};
    use std::sync::Arc;
    use tempfile::TempDir;

    // Renders a short test pattern; returns None when ffmpeg is not installed.
    fn test_video(dir: &TempDir, frames: u32) -> Option<(FfmpegFrameSource, std::path::PathBuf)> {
        let source = FfmpegFrameSource::detect()?;
        let path = dir.path().join("pattern.mp4");
        let status = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg("testsrc=size=640x360:rate=25")
            .arg("-frames:v")
            .arg(frames.to_string())
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-y")
            .arg(&path)
            .status()
            .ok()?;
        status.success().then_some((source, path))
    }

    #[test]
    fn missing_file_is_reported_before_spawning() {
        let source = FfmpegFrameSource {
            version: "test".to_string(),
        };
        let err = source
            .frame_count(Path::new("does/not/exist.mp4"))
            .unwrap_err();
        assert!(matches!(err, FrameError::Missing(_)));
    }

    #[test]
    fn counts_and_decodes_real_video() {
        let dir = TempDir::new().unwrap();
        let Some((source, video)) = test_video(&dir, 40) else {
            return;
        };

        assert_eq!(source.frame_count(&video).unwrap(), 40);
        let frame = source.decode_frame(&video, 2).unwrap();
        assert_eq!(frame.dimensions(), (640, 360));
    }

    #[test]
    fn derives_thumbnail_from_real_video() {
        let dir = TempDir::new().unwrap();
        let Some((source, video)) = test_video(&dir, 25) else {
            return;
        };
        let out = dir.path().join("pattern.mp4_thumb.jpg");

        let deriver = ThumbnailDeriver::new(Some(Arc::new(source)), DEFAULT_JPEG_QUALITY);
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));
        assert_eq!(image::open(&out).unwrap().to_rgb8().dimensions(), (320, 180));
    }

    #[test]
    fn garbage_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let Some(source) = FfmpegFrameSource::detect() else {
            return;
        };
        let path = dir.path().join("garbage.mp4");
        std::fs::write(&path, b"definitely not a container").unwrap();

        assert!(source.frame_count(&path).is_err());
    }
}
