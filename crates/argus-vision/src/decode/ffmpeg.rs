//! FFmpeg rawvideo pipe backend.
//!
//! Spawns `ffmpeg` decoding the stream to tightly packed rgb24 on stdout and
//! slices the pipe into frames using the probed geometry. Works for any input
//! FFmpeg can demux, so it doubles as the universal fallback.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::decode::{BoxedFrameSource, FrameSource};
use crate::error::{VisionError, VisionResult};
use crate::frame::RasterFrame;
use crate::probe::{probe_stream, StreamInfo};

/// Frame source backed by an FFmpeg child process.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    info: StreamInfo,
    frame_len: usize,
}

/// Open a stream through an FFmpeg rawvideo pipe.
pub async fn open(url: &str) -> VisionResult<BoxedFrameSource> {
    let source = FfmpegSource::open(url).await?;
    Ok(Box::new(source))
}

impl FfmpegSource {
    pub async fn open(url: &str) -> VisionResult<Self> {
        which::which("ffmpeg").map_err(|_| VisionError::FfmpegNotFound)?;

        let info = probe_stream(url).await?;
        let frame_len = RasterFrame::byte_len(info.width, info.height);

        debug!(
            url = %url,
            width = info.width,
            height = info.height,
            fps = info.fps,
            "Spawning FFmpeg decode pipe"
        );

        let mut child = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-i"])
            .arg(url)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VisionError::decode_open(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VisionError::decode_open("FFmpeg stdout not captured"))?;

        Ok(Self {
            child,
            stdout,
            info,
            frame_len,
        })
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    async fn next_frame(&mut self) -> VisionResult<Option<RasterFrame>> {
        let mut buf = vec![0u8; self.frame_len];

        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {
                let frame = RasterFrame::from_rgb24(self.info.width, self.info.height, buf)?;
                Ok(Some(frame))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Pipe closed: the stream finished or the decoder exited.
                let _ = self.child.start_kill();
                Err(VisionError::StreamEnded)
            }
            Err(e) => Err(VisionError::decode_read(format!("Pipe read failed: {}", e))),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // kill_on_drop covers process teardown; this silences the
        // still-running child warning on abrupt session aborts.
        let _ = self.child.start_kill();
    }
}
