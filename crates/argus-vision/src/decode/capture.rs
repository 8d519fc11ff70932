//! OpenCV capture backend.
//!
//! Preferred backend for live streams when the crate is built with the
//! `opencv` feature. Without the feature, `open` reports the backend as
//! unavailable and the FFmpeg fallback takes over.

use crate::decode::BoxedFrameSource;
#[cfg(not(feature = "opencv"))]
use crate::error::VisionError;
use crate::error::VisionResult;

/// Consecutive failed reads tolerated on a live source before the stream is
/// declared ended. One false read is routine jitter on RTSP/HLS inputs.
const MAX_CONSECUTIVE_MISSES: u32 = 30;

/// Tracks a run of failed reads; a single miss is "no frame yet", only an
/// unbroken run ends the stream.
#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
#[derive(Debug, Default)]
struct MissCounter {
    misses: u32,
}

#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
impl MissCounter {
    /// Record a failed read. True once the run reaches the limit.
    fn record_miss(&mut self) -> bool {
        self.misses += 1;
        self.misses >= MAX_CONSECUTIVE_MISSES
    }

    fn reset(&mut self) {
        self.misses = 0;
    }
}

#[cfg(feature = "opencv")]
mod backend {
    use async_trait::async_trait;
    use opencv::core::Mat;
    use opencv::prelude::*;
    use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS};
    use opencv::{imgproc, videoio};
    use tracing::debug;

    use crate::decode::{BoxedFrameSource, FrameSource};
    use crate::error::{VisionError, VisionResult};
    use crate::frame::RasterFrame;
    use crate::probe::StreamInfo;

    pub struct CaptureSource {
        capture: VideoCapture,
        info: StreamInfo,
        misses: super::MissCounter,
    }

    impl CaptureSource {
        pub fn open(url: &str) -> VisionResult<Self> {
            let capture = VideoCapture::from_file(url, CAP_ANY)
                .map_err(|e| VisionError::decode_open(format!("VideoCapture error: {}", e)))?;

            let opened = capture
                .is_opened()
                .map_err(|e| VisionError::decode_open(format!("VideoCapture error: {}", e)))?;
            if !opened {
                return Err(VisionError::decode_open(format!(
                    "VideoCapture could not open {}",
                    url
                )));
            }

            let width = capture
                .get(videoio::CAP_PROP_FRAME_WIDTH)
                .unwrap_or(0.0) as u32;
            let height = capture
                .get(videoio::CAP_PROP_FRAME_HEIGHT)
                .unwrap_or(0.0) as u32;
            if width == 0 || height == 0 {
                return Err(VisionError::decode_open("Capture reports no geometry"));
            }
            let fps = match capture.get(CAP_PROP_FPS) {
                Ok(fps) if fps > 0.0 => fps,
                _ => 30.0,
            };

            debug!(url = %url, width, height, fps, "Capture backend opened");
            Ok(Self {
                capture,
                info: StreamInfo { width, height, fps },
                misses: super::MissCounter::default(),
            })
        }
    }

    #[async_trait]
    impl FrameSource for CaptureSource {
        fn info(&self) -> StreamInfo {
            self.info
        }

        async fn next_frame(&mut self) -> VisionResult<Option<RasterFrame>> {
            let mut mat = Mat::default();
            let grabbed = self
                .capture
                .read(&mut mat)
                .map_err(|e| VisionError::decode_read(format!("Capture read error: {}", e)))?;

            if !grabbed {
                if self.misses.record_miss() {
                    return Err(VisionError::StreamEnded);
                }
                // Decoder hiccup; caller retries.
                return Ok(None);
            }
            if mat.empty().unwrap_or(true) {
                return Ok(None);
            }
            self.misses.reset();

            let mut rgb = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
                .map_err(|e| VisionError::decode_read(format!("Color convert error: {}", e)))?;

            let data = rgb
                .data_bytes()
                .map_err(|e| VisionError::decode_read(format!("Mat access error: {}", e)))?
                .to_vec();

            let frame = RasterFrame::from_rgb24(self.info.width, self.info.height, data)?;
            Ok(Some(frame))
        }
    }

    pub fn open_boxed(url: &str) -> VisionResult<BoxedFrameSource> {
        Ok(Box::new(CaptureSource::open(url)?))
    }
}

/// Open a stream with the OpenCV capture backend.
#[cfg(feature = "opencv")]
pub async fn open(url: &str) -> VisionResult<BoxedFrameSource> {
    backend::open_boxed(url)
}

/// Capture backend stub for builds without OpenCV.
#[cfg(not(feature = "opencv"))]
pub async fn open(_url: &str) -> VisionResult<BoxedFrameSource> {
    Err(VisionError::decode_open(
        "OpenCV capture backend not compiled in",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_failed_read_is_not_terminal() {
        let mut misses = MissCounter::default();
        assert!(!misses.record_miss());
    }

    #[test]
    fn test_miss_run_is_bounded() {
        let mut misses = MissCounter::default();
        for _ in 0..MAX_CONSECUTIVE_MISSES - 1 {
            assert!(!misses.record_miss());
        }
        assert!(misses.record_miss());
    }

    #[test]
    fn test_successful_read_resets_the_run() {
        let mut misses = MissCounter::default();
        for _ in 0..MAX_CONSECUTIVE_MISSES - 1 {
            misses.record_miss();
        }
        misses.reset();
        assert!(!misses.record_miss());
    }
}
