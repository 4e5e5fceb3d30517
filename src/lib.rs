//! Bucle Scanner Engine
//!
//! Point a camera at a container, have it classified in real time, and
//! submit the confirmed detection — label, confidence, photographic
//! evidence — to the Bucle backend for human review.
//!
//! ## Architecture
//!
//! 1. CaptureSource - exclusive camera ownership, latest-frame pump
//! 2. Classifier - external model adapter (load gate + scoring)
//! 3. DetectionLoop - confidence-gated acceptance, one detection per cycle
//! 4. ScanMachine - capture/classify/confirm phase machine
//! 5. SessionGate - session token lifecycle, auth-gated submission
//! 6. TokenStore - persisted session token (get/set/clear)
//! 7. Backend - Bucle backend HTTP adapter
//!
//! ## Design principles
//!
//! - One writer per shared value (the gate owns the session)
//! - Every asynchronous result is checked against the current cycle
//!   before it is applied; stale results are discarded silently
//! - Collaborators are capability interfaces; the engine sees only
//!   `Ok(value) | Err(kind)`

pub mod backend;
pub mod capture;
pub mod classifier;
pub mod detection;
pub mod error;
pub mod models;
pub mod scan_machine;
pub mod session_gate;
pub mod state;
pub mod token_store;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
