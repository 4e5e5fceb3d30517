//! Detection loop
//!
//! ## Responsibilities
//!
//! - Confidence/label acceptance policy
//! - Single-shot classification of a frozen capture
//! - Live loop: classify frames until one is accepted
//!
//! At most one detection is emitted per capture-confirm cycle; the loop
//! halts on acceptance and does not classify again until the scan machine
//! re-enters analyzing.

use crate::capture::CaptureSource;
use crate::classifier::Classifier;
use crate::error::Error;
use crate::models::{Capture, Classification, Detection, DEFAULT_CONFIDENCE_THRESHOLD, SENTINEL_NONE};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Acceptance policy for classifications.
///
/// The best entry is accepted iff its probability is strictly greater
/// than the threshold and its label is not the reserved background class.
#[derive(Debug, Clone)]
pub struct AcceptancePolicy {
    pub threshold: f32,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl AcceptancePolicy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Best entry of the classification if it passes the policy.
    /// Ties keep the first entry in response order.
    pub fn accept<'a>(&self, classification: &'a Classification) -> Option<&'a crate::models::ScoredLabel> {
        let best = classification.best()?;
        if best.probability <= self.threshold {
            return None;
        }
        if best.label.eq_ignore_ascii_case(SENTINEL_NONE) {
            return None;
        }
        Some(best)
    }
}

/// Outcome of one analyzing phase
#[derive(Debug, Clone)]
pub enum DetectionOutcome {
    Accepted(Detection),
    NoDetection,
}

impl DetectionOutcome {
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            DetectionOutcome::Accepted(d) => Some(d),
            DetectionOutcome::NoDetection => None,
        }
    }
}

/// Runs classifications against the acceptance policy
pub struct DetectionLoop {
    classifier: Arc<dyn Classifier>,
    policy: AcceptancePolicy,
}

impl DetectionLoop {
    pub fn new(classifier: Arc<dyn Classifier>, policy: AcceptancePolicy) -> Self {
        Self { classifier, policy }
    }

    /// Single-shot mode: classify a frozen capture once.
    ///
    /// Failures (model not ready, classification or transport errors) end
    /// the analyzing phase with `NoDetection`; nothing propagates — the
    /// user returns to live preview and may retry the shutter.
    pub async fn classify_capture(&self, capture: &Capture) -> DetectionOutcome {
        let classification = match self.classifier.classify(&capture.jpeg).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, cycle = capture.cycle, "Classification failed, no detection");
                return DetectionOutcome::NoDetection;
            }
        };

        match self.policy.accept(&classification) {
            Some(best) => {
                tracing::info!(
                    label = %best.label,
                    confidence = best.probability,
                    cycle = capture.cycle,
                    "Detection accepted"
                );
                DetectionOutcome::Accepted(Detection {
                    label: best.label.clone(),
                    confidence: best.probability,
                    capture_id: capture.id,
                    cycle: capture.cycle,
                })
            }
            None => {
                tracing::debug!(cycle = capture.cycle, "Classification below policy, no detection");
                DetectionOutcome::NoDetection
            }
        }
    }

    /// Live mode: classify the current frame on an interval until one is
    /// accepted, then freeze that exact frame and halt.
    ///
    /// Returns `None` when cancelled or when the capture source shuts
    /// down mid-loop; a stale detection is never emitted.
    pub async fn run_live(
        &self,
        source: &CaptureSource,
        cycle: u64,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Option<(Capture, Detection)> {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    tracing::debug!(cycle, "Live detection cancelled");
                    return None;
                }
            }

            let frame = match source.current_frame().await {
                Ok(frame) => frame,
                Err(Error::NoFrameYet) => {
                    if !source.is_active().await {
                        tracing::debug!(cycle, "Capture source stopped, aborting live detection");
                        return None;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, cycle, "Frame read failed in live detection");
                    continue;
                }
            };

            let classification = match self.classifier.classify(&frame.jpeg).await {
                Ok(c) => c,
                Err(e) if e.is_model_error() => {
                    tracing::debug!(error = %e, cycle, "Live classification failed, continuing");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, cycle, "Live classification error, continuing");
                    continue;
                }
            };

            if cancel.is_cancelled() || !source.is_active().await {
                // Result arrived after shutdown; discard it.
                return None;
            }

            if let Some(best) = self.policy.accept(&classification) {
                let detection_label = best.label.clone();
                let confidence = best.probability;
                let capture = Capture::freeze(frame, cycle);
                let detection = Detection {
                    label: detection_label,
                    confidence,
                    capture_id: capture.id,
                    cycle,
                };
                tracing::info!(
                    label = %detection.label,
                    confidence = detection.confidence,
                    cycle,
                    "Live detection accepted, halting loop"
                );
                return Some((capture, detection));
            }
        }
    }
}
