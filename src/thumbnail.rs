use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, Rgb, RgbImage};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const CANVAS_COLOR: Rgb<u8> = Rgb([230, 230, 230]);
const GLYPH_COLOR: Rgb<u8> = Rgb([100, 100, 100]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
        }
    }
}

/// Failures reported by a video-decoding capability.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("video file not found: {0:?}")]
    Missing(PathBuf),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed: {stderr}")]
    Failed { tool: &'static str, stderr: String },
    #[error("unexpected {tool} output: {output:?}")]
    Parse { tool: &'static str, output: String },
    #[error("could not decode frame image: {0}")]
    Image(#[from] image::ImageError),
}

/// Video-decoding capability. Implementations block the calling thread.
pub trait FrameSource: Send + Sync {
    /// Number of decodable frames in the first video stream.
    fn frame_count(&self, video: &Path) -> Result<u64, FrameError>;

    /// Decode the frame at the zero-based `index`.
    fn decode_frame(&self, video: &Path, index: u64) -> Result<RgbImage, FrameError>;
}

#[derive(Debug, Error)]
enum ThumbnailError {
    #[error("video decoding is not available")]
    Unavailable,
    #[error("could not open video: {0}")]
    Open(#[source] FrameError),
    #[error("video reports no frames")]
    Empty,
    #[error("could not decode frame {index}: {source}")]
    Decode {
        index: u64,
        #[source]
        source: FrameError,
    },
    #[error("could not encode jpeg: {0}")]
    Encode(#[from] image::ImageError),
    #[error("could not write thumbnail: {0}")]
    Write(#[from] std::io::Error),
}

/// Produces preview images for stored videos.
///
/// Extraction problems never surface to the caller: they are logged and the
/// deriver falls back to a synthesized placeholder. Only a failure to write
/// the placeholder yields `false`.
#[derive(Clone)]
pub struct ThumbnailDeriver {
    frames: Option<Arc<dyn FrameSource>>,
    quality: u8,
}

impl ThumbnailDeriver {
    pub fn new(frames: Option<Arc<dyn FrameSource>>, quality: u8) -> Self {
        Self { frames, quality }
    }

    pub fn has_decoder(&self) -> bool {
        self.frames.is_some()
    }

    /// Write a preview of `video` to `output`. Returns `true` once a JPEG
    /// exists at `output`, either extracted or placeholder.
    pub fn derive_thumbnail(&self, video: &Path, output: &Path, size: ThumbnailSize) -> bool {
        match self.extract(video, output, size) {
            Ok(()) => {
                info!("[thumbnail] ✓ Extracted preview for {:?}", video);
                true
            }
            Err(ThumbnailError::Unavailable) => {
                debug!("[thumbnail] No decoder, using placeholder for {:?}", video);
                self.generate_placeholder(output, size)
            }
            Err(e) => {
                warn!(
                    "[thumbnail] Extraction failed for {:?}: {}. Using placeholder",
                    video, e
                );
                self.generate_placeholder(output, size)
            }
        }
    }

    /// Write the gray play-glyph placeholder to `output`.
    pub fn generate_placeholder(&self, output: &Path, size: ThumbnailSize) -> bool {
        match write_jpeg(&render_placeholder(size), output, self.quality) {
            Ok(()) => true,
            Err(e) => {
                error!("[thumbnail] ✗ Placeholder write failed for {:?}: {}", output, e);
                false
            }
        }
    }

    fn extract(
        &self,
        video: &Path,
        output: &Path,
        size: ThumbnailSize,
    ) -> Result<(), ThumbnailError> {
        let frames = self.frames.as_ref().ok_or(ThumbnailError::Unavailable)?;

        let total = frames.frame_count(video).map_err(ThumbnailError::Open)?;
        if total == 0 {
            return Err(ThumbnailError::Empty);
        }

        let index = target_frame_index(total);
        let frame = frames
            .decode_frame(video, index)
            .map_err(|source| ThumbnailError::Decode { index, source })?;
        debug!(
            "[thumbnail] Decoded frame {}/{} ({}x{}) from {:?}",
            index,
            total,
            frame.width(),
            frame.height(),
            video
        );

        let resized =
            image::imageops::resize(&frame, size.width, size.height, FilterType::Triangle);
        write_jpeg(&resized, output, self.quality)
    }
}

/// Frame 5% into the stream, skipping a likely blank first frame.
pub fn target_frame_index(total: u64) -> u64 {
    (total / 20).max(1).min(total.saturating_sub(1))
}

pub fn render_placeholder(size: ThumbnailSize) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(size.width, size.height, CANVAS_COLOR);

    let edge = (size.width.min(size.height) / 4) as i32;
    if edge >= 2 {
        let cx = (size.width / 2) as i32;
        let cy = (size.height / 2) as i32;
        let half = edge / 2;
        let glyph = [
            Point::new(cx - half, cy - half),
            Point::new(cx - half, cy + half),
            Point::new(cx + half, cy),
        ];
        draw_polygon_mut(&mut canvas, &glyph, GLYPH_COLOR);
    }

    canvas
}

// Staged in the destination directory and renamed into place, so readers
// never observe a partial file.
fn write_jpeg(img: &RgbImage, output: &Path, quality: u8) -> Result<(), ThumbnailError> {
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(img)?;

    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix(".thumb-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    staged.write_all(&encoded)?;
    staged.persist(output).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct StubFrames {
        count: u64,
        source: (u32, u32),
        fail_decode: bool,
        requested: Mutex<Vec<u64>>,
    }

    impl StubFrames {
        fn new(count: u64, source: (u32, u32)) -> Self {
            Self {
                count,
                source,
                fail_decode: false,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl FrameSource for StubFrames {
        fn frame_count(&self, video: &Path) -> Result<u64, FrameError> {
            if !video.exists() {
                return Err(FrameError::Missing(video.to_path_buf()));
            }
            Ok(self.count)
        }

        fn decode_frame(&self, _video: &Path, index: u64) -> Result<RgbImage, FrameError> {
            self.requested.lock().unwrap().push(index);
            if self.fail_decode {
                return Err(FrameError::Failed {
                    tool: "stub",
                    stderr: "corrupt packet".to_string(),
                });
            }
            Ok(RgbImage::from_pixel(self.source.0, self.source.1, Rgb([200, 30, 30])))
        }
    }

    fn fake_video(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    fn assert_near(pixel: &Rgb<u8>, expected: [u8; 3]) {
        for (got, want) in pixel.0.iter().zip(expected) {
            assert!(
                (*got as i16 - want as i16).abs() <= 8,
                "pixel {:?} not near {:?}",
                pixel,
                expected
            );
        }
    }

    #[test]
    fn placeholder_is_deterministic() {
        let size = ThumbnailSize::default();
        let first = render_placeholder(size);
        let second = render_placeholder(size);
        assert_eq!(first.dimensions(), (320, 180));
        assert_eq!(first, second);
    }

    #[test]
    fn placeholder_has_canvas_and_glyph_colors() {
        let img = render_placeholder(ThumbnailSize::default());
        assert_eq!(*img.get_pixel(0, 0), CANVAS_COLOR);
        assert_eq!(*img.get_pixel(319, 179), CANVAS_COLOR);
        assert_eq!(*img.get_pixel(160, 90), GLYPH_COLOR);
        // apex points right: left of the glyph stays canvas, inside is filled
        assert_eq!(*img.get_pixel(130, 90), CANVAS_COLOR);
        assert_eq!(*img.get_pixel(140, 90), GLYPH_COLOR);
    }

    #[test]
    fn tiny_placeholder_skips_glyph() {
        let img = render_placeholder(ThumbnailSize { width: 4, height: 4 });
        assert!(img.pixels().all(|p| *p == CANVAS_COLOR));
    }

    #[test]
    fn target_frame_skips_first_frame() {
        assert_eq!(target_frame_index(1), 0);
        assert_eq!(target_frame_index(2), 1);
        assert_eq!(target_frame_index(20), 1);
        assert_eq!(target_frame_index(100), 5);
        assert_eq!(target_frame_index(1000), 50);
    }

    #[test]
    fn no_decoder_falls_back_to_placeholder() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("clip.mp4_thumb.jpg");

        let deriver = ThumbnailDeriver::new(None, DEFAULT_JPEG_QUALITY);
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));

        let img = image::open(&out).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (320, 180));
        assert_near(img.get_pixel(5, 5), [230, 230, 230]);
    }

    #[test]
    fn missing_source_yields_placeholder() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("thumb.jpg");
        let missing = Path::new("does/not/exist.mp4");

        let without = ThumbnailDeriver::new(None, DEFAULT_JPEG_QUALITY);
        assert!(without.derive_thumbnail(missing, &out, ThumbnailSize::default()));
        assert_eq!(image::open(&out).unwrap().to_rgb8().dimensions(), (320, 180));

        std::fs::remove_file(&out).unwrap();
        let stub = Arc::new(StubFrames::new(100, (640, 480)));
        let with = ThumbnailDeriver::new(Some(stub.clone()), DEFAULT_JPEG_QUALITY);
        assert!(with.derive_thumbnail(missing, &out, ThumbnailSize::default()));
        assert_eq!(image::open(&out).unwrap().to_rgb8().dimensions(), (320, 180));
        assert!(stub.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_frame_video_yields_placeholder() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("thumb.jpg");
        let stub = Arc::new(StubFrames::new(0, (640, 480)));

        let deriver = ThumbnailDeriver::new(Some(stub.clone()), DEFAULT_JPEG_QUALITY);
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));

        let img = image::open(&out).unwrap().to_rgb8();
        assert_near(img.get_pixel(5, 5), [230, 230, 230]);
        assert!(stub.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn extracts_early_frame_at_exact_size() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("thumb.jpg");
        let stub = Arc::new(StubFrames::new(400, (1920, 1080)));

        let deriver = ThumbnailDeriver::new(Some(stub.clone()), DEFAULT_JPEG_QUALITY);
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));

        assert_eq!(*stub.requested.lock().unwrap(), vec![20]);
        let img = image::open(&out).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (320, 180));
        assert_near(img.get_pixel(160, 90), [200, 30, 30]);
    }

    #[test]
    fn portrait_source_is_stretched_to_target() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("thumb.jpg");
        let stub = Arc::new(StubFrames::new(30, (720, 1280)));

        let deriver = ThumbnailDeriver::new(Some(stub), DEFAULT_JPEG_QUALITY);
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));
        assert_eq!(image::open(&out).unwrap().to_rgb8().dimensions(), (320, 180));
    }

    #[test]
    fn decode_failure_yields_placeholder() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("thumb.jpg");
        let mut stub = StubFrames::new(50, (640, 480));
        stub.fail_decode = true;

        let deriver = ThumbnailDeriver::new(Some(Arc::new(stub)), DEFAULT_JPEG_QUALITY);
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));
        let img = image::open(&out).unwrap().to_rgb8();
        assert_near(img.get_pixel(160, 90), [100, 100, 100]);
    }

    #[test]
    fn unwritable_destination_returns_false() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("missing-dir").join("thumb.jpg");
        let deriver = ThumbnailDeriver::new(
            Some(Arc::new(StubFrames::new(100, (640, 480)))),
            DEFAULT_JPEG_QUALITY,
        );

        assert!(!deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));
        assert!(!deriver.generate_placeholder(&out, ThumbnailSize::default()));
        assert!(!out.exists());
        assert!(!dir.path().join("missing-dir").exists());
    }

    #[test]
    fn rederivation_is_structurally_stable() {
        let dir = TempDir::new().unwrap();
        let video = fake_video(&dir);
        let out = dir.path().join("thumb.jpg");
        let deriver = ThumbnailDeriver::new(
            Some(Arc::new(StubFrames::new(100, (1280, 720)))),
            DEFAULT_JPEG_QUALITY,
        );

        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));
        let first = image::open(&out).unwrap();
        assert!(deriver.derive_thumbnail(&video, &out, ThumbnailSize::default()));
        let second = image::open(&out).unwrap();

        assert_eq!(first.width(), second.width());
        assert_eq!(first.height(), second.height());
        assert_eq!(first.color(), second.color());

        // nothing but the artifact is left in the directory
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
