//! Stream URL resolution.
//!
//! Page URLs (YouTube, Twitch, ...) cannot be fed to a decoder directly; they
//! resolve to a direct media URL through yt-dlp. URLs that already point at
//! media pass through untouched.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::error::{VisionError, VisionResult};

/// Extensions that mark a URL as directly decodable.
const DIRECT_EXTENSIONS: &[&str] = &[
    "m3u8", "mpd", "mp4", "ts", "flv", "webm", "mkv", "avi", "mov",
];

/// Maps a user-supplied URL to a direct media URL.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> VisionResult<String>;
}

/// Whether a URL can be handed to a decoder without resolution.
///
/// Non-HTTP schemes (rtsp, rtmp, udp, local files) are always direct; HTTP
/// URLs are direct when their path carries a media extension.
pub fn looks_direct(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return true;
            }
            let path = parsed.path().to_ascii_lowercase();
            DIRECT_EXTENSIONS
                .iter()
                .any(|ext| path.ends_with(&format!(".{}", ext)))
        }
        // Not a URL at all; treat as a local path and let the decoder decide.
        Err(_) => true,
    }
}

/// Resolver backed by the yt-dlp CLI.
pub struct YtDlpResolver {
    /// yt-dlp format selector
    format: String,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self {
            format: "best[ext=mp4]/best".to_string(),
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> VisionResult<String> {
        if looks_direct(url) {
            debug!(url = %url, "URL is directly decodable");
            return Ok(url.to_string());
        }

        which::which("yt-dlp").map_err(|_| VisionError::YtDlpNotFound)?;

        let output = Command::new("yt-dlp")
            .args(["-g", "-f", &self.format, "--no-playlist"])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(VisionError::resolve(format!(
                "yt-dlp failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let resolved = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| VisionError::resolve("yt-dlp returned no stream URL"))?;

        info!(url = %url, "Resolved stream URL");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_http_schemes_are_direct() {
        assert!(looks_direct("rtsp://camera.local/stream1"));
        assert!(looks_direct("rtmp://ingest.example.com/live"));
        assert!(looks_direct("udp://239.0.0.1:1234"));
    }

    #[test]
    fn test_http_media_extensions_are_direct() {
        assert!(looks_direct("https://cdn.example.com/live/index.m3u8"));
        assert!(looks_direct("http://host/video.MP4"));
        assert!(looks_direct("https://host/path/seg.ts?token=abc"));
    }

    #[test]
    fn test_page_urls_need_resolution() {
        assert!(!looks_direct("https://www.youtube.com/watch?v=abc123"));
        assert!(!looks_direct("https://www.twitch.tv/somechannel"));
    }

    #[test]
    fn test_local_paths_pass_through() {
        assert!(looks_direct("/data/recordings/cam0.mp4"));
    }

    #[tokio::test]
    async fn test_resolver_passes_direct_urls_through() {
        let resolver = YtDlpResolver::new();
        let url = "rtsp://camera.local/stream1";
        assert_eq!(resolver.resolve(url).await.unwrap(), url);
    }
}
