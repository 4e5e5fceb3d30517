//! Frame grabbers
//!
//! A grabber produces one JPEG frame per call from whatever transport the
//! configured camera input uses. ffmpeg does the device work; the engine
//! never links against camera SDKs.

use crate::error::{Error, Result};
use crate::models::Frame;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::process::Command;

/// Capability interface over the physical frame source
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    /// Grab a single frame. The returned frame's encoding is JPEG.
    async fn grab_frame(&self) -> Result<Frame>;
}

/// ffmpeg-backed grabber for V4L2 devices and RTSP/HTTP inputs
pub struct FfmpegGrabber {
    /// Camera input: `/dev/video0`, an `rtsp://` URL, or an `http://` URL
    input: String,
    timeout: Duration,
}

impl FfmpegGrabber {
    pub fn new(input: String) -> Self {
        Self::with_timeout(input, Duration::from_secs(10))
    }

    pub fn with_timeout(input: String, timeout: Duration) -> Self {
        Self { input, timeout }
    }

    fn input_args(&self) -> Vec<&str> {
        if self.input.starts_with("rtsp://") {
            // TCP for RTSP (more reliable)
            vec!["-rtsp_transport", "tcp", "-i", &self.input]
        } else if self.input.starts_with('/') {
            vec!["-f", "v4l2", "-i", &self.input]
        } else {
            vec!["-i", &self.input]
        }
    }
}

#[async_trait]
impl FrameGrabber for FfmpegGrabber {
    /// Grab one frame via ffmpeg.
    ///
    /// kill_on_drop ensures the process is killed when the timeout fires
    /// and the Child is dropped, so unresponsive cameras cannot leak
    /// ffmpeg processes.
    async fn grab_frame(&self) -> Result<Frame> {
        use std::process::Stdio;

        let mut args = self.input_args();
        args.extend_from_slice(&[
            "-frames:v", "1",
            "-f", "image2pipe",
            "-vcodec", "mjpeg",
            "-loglevel", "error",
            "-y",
            "-",
        ]);

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::DeviceUnavailable(format!("ffmpeg spawn failed: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::DeviceUnavailable(format!(
                    "ffmpeg execution failed: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_sec = self.timeout.as_secs(),
                    input = %self.input,
                    "ffmpeg timeout, process killed via kill_on_drop"
                );
                return Err(Error::DeviceUnavailable(format!(
                    "ffmpeg timeout ({}s)",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::DeviceUnavailable(format!(
                "ffmpeg failed: {}",
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(Error::DeviceUnavailable(
                "ffmpeg returned empty output".to_string(),
            ));
        }

        let (width, height) = image::load_from_memory(&output.stdout)
            .map(|img| (img.width(), img.height()))
            .map_err(|e| Error::Parse(format!("Grabbed frame is not a decodable image: {}", e)))?;

        Ok(Frame {
            jpeg: output.stdout,
            width,
            height,
            grabbed_at: Utc::now(),
        })
    }
}
