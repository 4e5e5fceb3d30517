//! Session/Auth gate
//!
//! ## Responsibilities
//!
//! - Own the session value (single writer) and its token lifecycle
//! - Decide at confirm time: submit now, or park the payload until
//!   authentication completes
//! - Resolve a parked submission exactly once after login
//!
//! The gate is the single source of truth for the authorization header:
//! every submission carries the bearer token of the session that
//! authorized it.

mod jwt;
mod types;

pub use jwt::{decode_claims, session_from_token, TokenClaims};
pub use types::{PendingSubmission, Session, SubmitOutcome};

#[cfg(test)]
pub(crate) use jwt::encode_token as encode_test_token;

use crate::backend::{BackendApi, RegisterPayload, ScanSubmission, SubmitReceipt};
use crate::error::{Error, Result};
use crate::models::{Capture, Detection};
use crate::token_store::TokenStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default role for self-registered accounts
const DEFAULT_ROLE: &str = "cliente";

/// Authentication-gated submission front
pub struct SessionGate {
    backend: Arc<dyn BackendApi>,
    store: Arc<dyn TokenStore>,
    session: RwLock<Option<Session>>,
    pending: RwLock<Option<PendingSubmission>>,
}

impl SessionGate {
    pub fn new(backend: Arc<dyn BackendApi>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            backend,
            store,
            session: RwLock::new(None),
            pending: RwLock::new(None),
        }
    }

    /// Restore a persisted session on startup.
    ///
    /// The stored token is accepted only if its expiry is in the future;
    /// otherwise (expired or undecodable) the stale entry is cleared and
    /// the gate starts unauthenticated.
    pub async fn load_persisted(&self) -> Result<()> {
        let Some(token) = self.store.load().await? else {
            return Ok(());
        };

        match jwt::session_from_token(&token) {
            Ok(session) if session.is_valid() => {
                tracing::info!(
                    subject_id = %session.subject_id,
                    expires_at = %session.expires_at,
                    "Persisted session restored"
                );
                *self.session.write().await = Some(session);
            }
            Ok(session) => {
                tracing::info!(
                    expires_at = %session.expires_at,
                    "Persisted session expired, clearing"
                );
                self.store.clear().await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Persisted token undecodable, clearing");
                self.store.clear().await?;
            }
        }

        Ok(())
    }

    /// Submit a confirmed detection, or park it until authentication.
    ///
    /// With a valid session the backend is called immediately; without
    /// one the payload becomes the pending submission (replacing any
    /// previous one) and `AwaitingAuth` asks the caller to present an
    /// authentication prompt.
    pub async fn submit(&self, capture: Capture, detection: Detection) -> Result<SubmitOutcome> {
        if let Some(session) = self.current_session().await {
            let receipt = self.submit_with_session(&capture, &detection, &session).await?;
            return Ok(SubmitOutcome::Submitted(receipt));
        }

        let replaced = {
            let mut pending = self.pending.write().await;
            let replaced = pending.is_some();
            *pending = Some(PendingSubmission {
                capture,
                detection,
                created_at: Utc::now(),
            });
            replaced
        };

        tracing::info!(replaced, "No valid session, submission parked");
        Ok(SubmitOutcome::AwaitingAuth)
    }

    async fn submit_with_session(
        &self,
        capture: &Capture,
        detection: &Detection,
        session: &Session,
    ) -> Result<SubmitReceipt> {
        let submission = ScanSubmission {
            jpeg: capture.jpeg.clone(),
            label: detection.label.clone(),
            confidence: detection.confidence,
            subject_id: session.subject_id.clone(),
            token: session.token.clone(),
        };
        self.backend.submit_scan(&submission).await
    }

    /// Authenticate and replace any existing session.
    ///
    /// A parked submission is left untouched: a failed login can be
    /// retried and still complete the original submission.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let token = self.backend.authenticate(email, password).await?;
        let session = jwt::session_from_token(&token.access_token)?;

        self.store.save(&session.token).await?;
        *self.session.write().await = Some(session.clone());

        tracing::info!(subject_id = %session.subject_id, "Logged in");
        Ok(session)
    }

    /// Register a new account, then log in with the same credentials
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Session> {
        let payload = RegisterPayload {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: DEFAULT_ROLE.to_string(),
        };
        self.backend.register(&payload).await?;
        self.login(email, password).await
    }

    /// Submit the parked payload after authentication succeeded.
    ///
    /// At most one automatic attempt: the pending entry is consumed
    /// before the call, so a failure returns control to the caller for a
    /// manual retry instead of looping.
    pub async fn resolve_pending(&self) -> Result<Option<SubmitReceipt>> {
        let Some(parked) = self.pending.write().await.take() else {
            return Ok(None);
        };

        let Some(session) = self.current_session().await else {
            // Auth did not actually produce a usable session; drop the
            // attempt and surface it.
            return Err(Error::Auth("No valid session to resolve pending submission".to_string()));
        };

        tracing::info!(
            label = %parked.detection.label,
            cycle = parked.detection.cycle,
            "Resolving parked submission"
        );

        let receipt = self
            .submit_with_session(&parked.capture, &parked.detection, &session)
            .await?;
        Ok(Some(receipt))
    }

    /// Discard the parked submission without submitting (authentication
    /// cancelled)
    pub async fn cancel_pending(&self) {
        if self.pending.write().await.take().is_some() {
            tracing::info!("Parked submission discarded");
        }
    }

    pub async fn has_pending(&self) -> bool {
        self.pending.read().await.is_some()
    }

    /// Clear session, persisted token, and any parked submission
    pub async fn logout(&self) -> Result<()> {
        *self.session.write().await = None;
        self.store.clear().await?;
        self.cancel_pending().await;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Current session if one exists and has not expired.
    ///
    /// Expiry detection destroys the session: the in-memory value and the
    /// persisted token are cleared on first read past the expiry.
    pub async fn current_session(&self) -> Option<Session> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                Some(s) if s.is_valid() => return Some(s.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        // Expired: upgrade to a write lock and destroy it.
        let mut session = self.session.write().await;
        if let Some(s) = session.as_ref() {
            if !s.is_valid() {
                tracing::info!(expires_at = %s.expires_at, "Session expired");
                *session = None;
                if let Err(e) = self.store.clear().await {
                    tracing::warn!(error = %e, "Failed to clear expired token");
                }
            }
        }
        session.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current_session().await.is_some()
    }
}
