//! Capture source
//!
//! ## Responsibilities
//!
//! - Exclusive ownership of the camera device
//! - Frame pump: keep the latest frame available on demand
//! - Start/stop lifecycle (one acquisition per start, idempotent stop)

mod grabber;

pub use grabber::{FfmpegGrabber, FrameGrabber};

use crate::error::{Error, Result};
use crate::models::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Running frame pump
struct Pump {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the live camera feed. `start` acquires the device and begins
/// producing frames; `current_frame` returns the latest one; `stop`
/// releases the device. Exactly one acquisition is active at a time.
pub struct CaptureSource {
    grabber: Arc<dyn FrameGrabber>,
    interval: Duration,
    pump: Mutex<Option<Pump>>,
    latest: Arc<RwLock<Option<Frame>>>,
}

impl CaptureSource {
    pub fn new(grabber: Arc<dyn FrameGrabber>, interval: Duration) -> Self {
        Self {
            grabber,
            interval,
            pump: Mutex::new(None),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Acquire the camera and start the frame pump.
    ///
    /// The device is probed with one grab before the pump spawns, so a
    /// missing device or denied permission fails here with
    /// `DeviceUnavailable` and nothing is left running. Starting while
    /// already started is a no-op, not a second acquisition.
    pub async fn start(&self) -> Result<()> {
        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            tracing::debug!("Capture source already active, start ignored");
            return Ok(());
        }

        let first = self.grabber.grab_frame().await.map_err(|e| match e {
            Error::DeviceUnavailable(msg) => Error::DeviceUnavailable(msg),
            other => Error::DeviceUnavailable(other.to_string()),
        })?;
        *self.latest.write().await = Some(first);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let grabber = self.grabber.clone();
        let latest = self.latest.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The probe grab already populated the latest frame; skip the
            // immediate first tick.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match grabber.grab_frame().await {
                            Ok(frame) => {
                                *latest.write().await = Some(frame);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Frame grab failed");
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::debug!("Frame pump shutting down");
                        break;
                    }
                }
            }
        });

        *pump = Some(Pump { handle, cancel });
        tracing::info!("Capture source started");
        Ok(())
    }

    /// Latest frame, or `NoFrameYet` if the pump has not produced one
    pub async fn current_frame(&self) -> Result<Frame> {
        self.latest
            .read()
            .await
            .clone()
            .ok_or(Error::NoFrameYet)
    }

    /// Release the camera. Idempotent; safe to call in any state,
    /// including while a classification of an earlier frame is in flight.
    pub async fn stop(&self) {
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            pump.cancel.cancel();
            if let Err(e) = pump.handle.await {
                tracing::warn!(error = %e, "Frame pump task failed to join");
            }
            *self.latest.write().await = None;
            tracing::info!("Capture source stopped");
        }
    }

    /// Whether a pump is currently running
    pub async fn is_active(&self) -> bool {
        self.pump.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGrabber {
        grabs: AtomicUsize,
    }

    impl CountingGrabber {
        fn new() -> Self {
            Self {
                grabs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameGrabber for CountingGrabber {
        async fn grab_frame(&self) -> Result<Frame> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(Frame {
                jpeg: vec![n as u8],
                width: 2,
                height: 2,
                grabbed_at: Utc::now(),
            })
        }
    }

    struct DeadGrabber;

    #[async_trait]
    impl FrameGrabber for DeadGrabber {
        async fn grab_frame(&self) -> Result<Frame> {
            Err(Error::DeviceUnavailable("no such device".to_string()))
        }
    }

    #[tokio::test]
    async fn current_frame_before_start_is_no_frame_yet() {
        let source = CaptureSource::new(Arc::new(CountingGrabber::new()), Duration::from_secs(60));
        assert!(matches!(
            source.current_frame().await,
            Err(Error::NoFrameYet)
        ));
    }

    #[tokio::test]
    async fn start_probes_device_and_serves_frames() {
        let source = CaptureSource::new(Arc::new(CountingGrabber::new()), Duration::from_secs(60));
        source.start().await.unwrap();
        let frame = source.current_frame().await.unwrap();
        assert_eq!(frame.width, 2);
        source.stop().await;
    }

    #[tokio::test]
    async fn start_fails_when_device_unavailable() {
        let source = CaptureSource::new(Arc::new(DeadGrabber), Duration::from_secs(60));
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
        assert!(!source.is_active().await);
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let grabber = Arc::new(CountingGrabber::new());
        let source = CaptureSource::new(grabber.clone(), Duration::from_secs(60));
        source.start().await.unwrap();
        let after_first = grabber.grabs.load(Ordering::SeqCst);
        source.start().await.unwrap();
        // A second acquisition would re-probe the device.
        assert_eq!(grabber.grabs.load(Ordering::SeqCst), after_first);
        source.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_clears_frames() {
        let source = CaptureSource::new(Arc::new(CountingGrabber::new()), Duration::from_secs(60));
        source.start().await.unwrap();
        source.stop().await;
        source.stop().await;
        assert!(!source.is_active().await);
        assert!(matches!(
            source.current_frame().await,
            Err(Error::NoFrameYet)
        ));
    }
}
