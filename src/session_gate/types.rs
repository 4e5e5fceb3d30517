//! Session gate type definitions

use crate::backend::SubmitReceipt;
use crate::models::{Capture, Detection};
use chrono::{DateTime, Utc};

/// Authenticated identity plus its access token and expiry.
///
/// A session is valid iff `now < expires_at`; an expired session is
/// equivalent to no session. Only the session gate writes this value.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque bearer token
    pub token: String,
    /// Backend account id (`id` claim)
    pub subject_id: String,
    /// Account email (`sub` claim)
    pub email: String,
    /// Account role (`rol` claim)
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// A capture+detection pair parked while authentication completes.
///
/// At most one exists at a time; a new confirm before resolution
/// replaces it.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub capture: Capture,
    pub detection: Detection,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a submit request through the gate
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Submission reached the backend; record created
    Submitted(SubmitReceipt),
    /// No valid session: the payload is parked and the caller should
    /// present an authentication prompt. Not an error.
    AwaitingAuth,
}
