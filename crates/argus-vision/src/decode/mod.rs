//! Frame acquisition from live streams.
//!
//! Two backends produce [`RasterFrame`]s: an OpenCV capture backend (compiled
//! in behind the `opencv` feature) and an FFmpeg rawvideo pipe that is always
//! available. [`open_stream`] tries the capture backend first and falls back
//! to FFmpeg when it cannot open the source.

pub mod capture;
pub mod ffmpeg;

use std::future::Future;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::VisionResult;
use crate::frame::RasterFrame;
use crate::probe::StreamInfo;

/// A source of decoded frames from an open stream.
///
/// `next_frame` returns `Ok(None)` when no frame is available yet (the caller
/// retries shortly), `Err(StreamEnded)` when the source is exhausted, and
/// `Err(DecodeRead)` for a transient read failure.
#[async_trait]
pub trait FrameSource: Send {
    /// Geometry of the frames this source produces.
    fn info(&self) -> StreamInfo;

    /// Pull the next frame.
    async fn next_frame(&mut self) -> VisionResult<Option<RasterFrame>>;
}

pub type BoxedFrameSource = Box<dyn FrameSource>;

/// Which backend ended up serving a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Capture,
    Ffmpeg,
}

/// Open a resolved stream URL, preferring the capture backend.
///
/// The capture backend's open failure is logged and swallowed; only the
/// fallback's error surfaces to the caller.
pub async fn open_stream(url: &str) -> VisionResult<BoxedFrameSource> {
    let url_owned = url.to_string();
    let (backend, source) = select_source(
        capture::open(url),
        async move { ffmpeg::open(&url_owned).await },
    )
    .await?;

    info!(?backend, "Stream opened");
    Ok(source)
}

/// Run the primary open attempt and fall back to the secondary on failure.
///
/// Generic so the policy is testable without a real decoder.
async fn select_source<T, P, F>(primary: P, fallback: F) -> VisionResult<(Backend, T)>
where
    P: Future<Output = VisionResult<T>>,
    F: Future<Output = VisionResult<T>>,
{
    match primary.await {
        Ok(source) => Ok((Backend::Capture, source)),
        Err(e) => {
            warn!(error = %e, "Capture backend unavailable, falling back to FFmpeg");
            let source = fallback.await?;
            Ok((Backend::Ffmpeg, source))
        }
    }
}
