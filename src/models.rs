//! Shared models for the scanner engine
//!
//! This module contains the value types that flow between components
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default confidence threshold for accepting a classification.
/// Acceptance is strictly greater than this value.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.85;

/// Reserved background class. A top-ranked entry with this label never
/// becomes a detection, regardless of confidence.
pub const SENTINEL_NONE: &str = "None";

/// One raw image sample from the capture source.
///
/// The grabber's native encoding is JPEG, so freezing a frame into a
/// [`Capture`] moves the same bytes; the reviewed image is byte-identical
/// to the classified one.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG-encoded image data
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub grabbed_at: DateTime<Utc>,
}

/// Image format of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Jpeg,
}

impl CaptureFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "jpeg",
        }
    }
}

/// A frozen, encoded snapshot of a frame, created exactly once per
/// detect-review cycle and owned by the scan machine until submission
/// or discard.
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: Uuid,
    /// Cycle id of the capture-confirm cycle this capture belongs to.
    /// Late asynchronous results are matched against the machine's
    /// current cycle and discarded on mismatch.
    pub cycle: u64,
    pub jpeg: Vec<u8>,
    pub format: CaptureFormat,
    pub width: u32,
    pub height: u32,
    pub frozen_at: DateTime<Utc>,
}

impl Capture {
    /// Freeze a frame into a capture for the given cycle
    pub fn freeze(frame: Frame, cycle: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            cycle,
            jpeg: frame.jpeg,
            format: CaptureFormat::Jpeg,
            width: frame.width,
            height: frame.height,
            frozen_at: Utc::now(),
        }
    }
}

/// One (label, probability) entry of a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    pub label: String,
    /// Probability in [0, 1]
    pub probability: f32,
}

/// Ranked label set produced per classifier call.
///
/// Entries keep the classifier's response order verbatim so tie-breaking
/// is deterministic: on equal top probability the first entry wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub entries: Vec<ScoredLabel>,
}

impl Classification {
    /// Best entry: highest probability, first-encountered on ties
    pub fn best(&self) -> Option<&ScoredLabel> {
        let mut best: Option<&ScoredLabel> = None;
        for entry in &self.entries {
            match best {
                Some(b) if entry.probability <= b.probability => {}
                _ => best = Some(entry),
            }
        }
        best
    }
}

/// An accepted classification result tied to a capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0, 1], strictly above the acceptance threshold
    pub confidence: f32,
    pub capture_id: Uuid,
    pub cycle: u64,
}

/// Review state of a submitted record, as the backend reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewState {
    /// Backend wire value "aprobado"
    #[serde(rename = "aprobado")]
    Approved,
    /// Backend wire value "rechazado"
    #[serde(rename = "rechazado")]
    Rejected,
    /// Any other state an admin may set
    #[serde(untagged)]
    Other(String),
}

impl ReviewState {
    pub fn as_str(&self) -> &str {
        match self {
            ReviewState::Approved => "aprobado",
            ReviewState::Rejected => "rechazado",
            ReviewState::Other(s) => s,
        }
    }
}
