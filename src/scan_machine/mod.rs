//! Capture/Confirm state machine
//!
//! ## Responsibilities
//!
//! - Phase transitions Idle → LivePreview → Analyzing → Reviewing →
//!   Submitting → Idle (retake back to LivePreview, hard reset to Idle)
//! - Freezing the reviewed capture before any suspension point
//! - Consulting the session gate at confirm time
//! - Discarding late asynchronous results via the cycle id
//!
//! Transition requests are explicit methods; an illegal request for the
//! current phase is silently ignored, never queued. Only one analyzing
//! run is in flight per machine instance.

use crate::backend::SubmitReceipt;
use crate::capture::CaptureSource;
use crate::detection::{DetectionLoop, DetectionOutcome};
use crate::error::{Error, Result};
use crate::models::{Capture, Detection};
use crate::session_gate::{SessionGate, SubmitOutcome};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Camera off, nothing held
    Idle,
    /// Camera running, frames flowing
    LivePreview,
    /// One frozen capture being classified
    Analyzing,
    /// Frozen capture shown; detection present iff one was accepted
    Reviewing,
    /// Submission in flight or parked awaiting authentication
    Submitting,
}

/// Broadcast on every applied transition
#[derive(Debug, Clone)]
pub struct PhaseChange {
    pub from: ScanPhase,
    pub to: ScanPhase,
    pub cycle: u64,
}

/// Outcome of a confirm request (or of resolving a parked submission)
#[derive(Debug)]
pub enum ConfirmResult {
    /// Request was illegal for the current phase; nothing happened
    Ignored,
    /// Record created; machine back to Idle
    Submitted(SubmitReceipt),
    /// No valid session; payload parked, authentication prompt due
    AwaitingAuth,
    /// Submission failed; machine back to Reviewing with the payload
    /// retained for a manual retry
    Failed(Error),
}

struct MachineState {
    phase: ScanPhase,
    /// Monotonic capture-confirm cycle counter; results from earlier
    /// cycles are discarded on arrival.
    cycle: u64,
    capture: Option<Capture>,
    detection: Option<Detection>,
}

/// The capture/classify/confirm coordinator
pub struct ScanMachine {
    source: Arc<CaptureSource>,
    detector: Arc<DetectionLoop>,
    gate: Arc<SessionGate>,
    state: RwLock<MachineState>,
    events: broadcast::Sender<PhaseChange>,
}

impl ScanMachine {
    pub fn new(
        source: Arc<CaptureSource>,
        detector: Arc<DetectionLoop>,
        gate: Arc<SessionGate>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            source,
            detector,
            gate,
            state: RwLock::new(MachineState {
                phase: ScanPhase::Idle,
                cycle: 0,
                capture: None,
                detection: None,
            }),
            events,
        }
    }

    /// Observe phase changes (presentation layers subscribe here)
    pub fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> ScanPhase {
        self.state.read().await.phase
    }

    /// Frozen capture under review, if any
    pub async fn current_capture(&self) -> Option<Capture> {
        self.state.read().await.capture.clone()
    }

    /// Accepted detection of the current cycle, if any
    pub async fn current_detection(&self) -> Option<Detection> {
        self.state.read().await.detection.clone()
    }

    fn apply(&self, state: &mut MachineState, to: ScanPhase) {
        let from = state.phase;
        state.phase = to;
        tracing::info!(?from, ?to, cycle = state.cycle, "Phase transition");
        let _ = self.events.send(PhaseChange {
            from,
            to,
            cycle: state.cycle,
        });
    }

    /// Idle → LivePreview: acquire the camera.
    ///
    /// A device failure is surfaced and the machine stays Idle.
    pub async fn activate(&self) -> Result<ScanPhase> {
        let mut state = self.state.write().await;
        if state.phase != ScanPhase::Idle {
            tracing::debug!(phase = ?state.phase, "activate ignored");
            return Ok(state.phase);
        }

        self.source.start().await?;
        self.apply(&mut state, ScanPhase::LivePreview);
        Ok(state.phase)
    }

    /// LivePreview → Analyzing → Reviewing: freeze the current frame and
    /// classify it.
    ///
    /// The frame is frozen and encoded before the first suspension point,
    /// so the reviewed image is exactly what was classified. A shutter
    /// while Analyzing is a no-op. `NoFrameYet` keeps LivePreview.
    pub async fn shutter(&self) -> Result<ScanPhase> {
        let capture = {
            let mut state = self.state.write().await;
            if state.phase != ScanPhase::LivePreview {
                tracing::debug!(phase = ?state.phase, "shutter ignored");
                return Ok(state.phase);
            }

            let frame = self.source.current_frame().await?;
            state.cycle += 1;
            let capture = Capture::freeze(frame, state.cycle);
            state.capture = Some(capture.clone());
            state.detection = None;
            self.apply(&mut state, ScanPhase::Analyzing);
            capture
        };

        // Suspension point: classification runs without the state lock so
        // user actions stay responsive.
        let outcome = self.detector.classify_capture(&capture).await;

        let mut state = self.state.write().await;
        if state.cycle != capture.cycle || state.phase != ScanPhase::Analyzing {
            tracing::debug!(
                result_cycle = capture.cycle,
                current_cycle = state.cycle,
                "Stale classification result discarded"
            );
            return Ok(state.phase);
        }

        if let DetectionOutcome::Accepted(detection) = outcome {
            state.detection = Some(detection);
        }
        self.apply(&mut state, ScanPhase::Reviewing);
        Ok(state.phase)
    }

    /// Reviewing → LivePreview: discard capture and detection, no network
    /// effect. The cycle bump invalidates any still-in-flight result.
    pub async fn retake(&self) -> ScanPhase {
        let mut state = self.state.write().await;
        if state.phase != ScanPhase::Reviewing {
            tracing::debug!(phase = ?state.phase, "retake ignored");
            return state.phase;
        }

        state.capture = None;
        state.detection = None;
        state.cycle += 1;
        self.apply(&mut state, ScanPhase::LivePreview);
        state.phase
    }

    /// Reviewing → Submitting: hand the payload to the session gate.
    ///
    /// Only reachable with an accepted detection; confirming without one
    /// is a no-op. Success clears everything and stops the camera;
    /// failure returns to Reviewing with the payload retained.
    pub async fn confirm(&self) -> ConfirmResult {
        let (capture, detection) = {
            let mut state = self.state.write().await;
            if state.phase != ScanPhase::Reviewing {
                tracing::debug!(phase = ?state.phase, "confirm ignored");
                return ConfirmResult::Ignored;
            }
            let (Some(capture), Some(detection)) = (state.capture.clone(), state.detection.clone())
            else {
                tracing::debug!("confirm ignored: no accepted detection");
                return ConfirmResult::Ignored;
            };
            self.apply(&mut state, ScanPhase::Submitting);
            (capture, detection)
        };

        let cycle = capture.cycle;
        let outcome = self.gate.submit(capture, detection).await;

        let mut state = self.state.write().await;
        if state.cycle != cycle || state.phase != ScanPhase::Submitting {
            tracing::debug!(
                result_cycle = cycle,
                current_cycle = state.cycle,
                "Stale submission result discarded"
            );
            return ConfirmResult::Ignored;
        }

        match outcome {
            Ok(SubmitOutcome::Submitted(receipt)) => {
                self.finish_cycle(&mut state).await;
                ConfirmResult::Submitted(receipt)
            }
            Ok(SubmitOutcome::AwaitingAuth) => {
                // Stay in Submitting; the driver presents the auth prompt
                // and reports back via auth_succeeded/auth_cancelled.
                ConfirmResult::AwaitingAuth
            }
            Err(e) => {
                tracing::warn!(error = %e, "Submission failed, returning to review");
                self.apply(&mut state, ScanPhase::Reviewing);
                ConfirmResult::Failed(e)
            }
        }
    }

    /// Authentication completed while a submission was parked: resolve it.
    ///
    /// The gate attempts the parked payload exactly once. Success behaves
    /// like the valid-session confirm path; failure returns to Reviewing
    /// for a manual retry.
    pub async fn auth_succeeded(&self) -> ConfirmResult {
        let resolved = self.gate.resolve_pending().await;

        let mut state = self.state.write().await;
        if state.phase != ScanPhase::Submitting {
            tracing::debug!(phase = ?state.phase, "auth_succeeded with no submission in flight");
            return ConfirmResult::Ignored;
        }

        match resolved {
            Ok(Some(receipt)) => {
                self.finish_cycle(&mut state).await;
                ConfirmResult::Submitted(receipt)
            }
            Ok(None) => {
                // Nothing was parked (logout raced the prompt); back to
                // review so the user can decide again.
                self.apply(&mut state, ScanPhase::Reviewing);
                ConfirmResult::Ignored
            }
            Err(e) => {
                tracing::warn!(error = %e, "Parked submission failed, returning to review");
                self.apply(&mut state, ScanPhase::Reviewing);
                ConfirmResult::Failed(e)
            }
        }
    }

    /// Authentication prompt dismissed: discard the parked payload and
    /// return to Reviewing with capture and detection intact.
    pub async fn auth_cancelled(&self) -> ScanPhase {
        self.gate.cancel_pending().await;

        let mut state = self.state.write().await;
        if state.phase == ScanPhase::Submitting {
            self.apply(&mut state, ScanPhase::Reviewing);
        }
        state.phase
    }

    /// Hard reset from any state: camera released, everything cleared.
    pub async fn reset(&self) {
        self.gate.cancel_pending().await;

        let mut state = self.state.write().await;
        state.capture = None;
        state.detection = None;
        state.cycle += 1;
        if state.phase != ScanPhase::Idle {
            self.apply(&mut state, ScanPhase::Idle);
        }
        drop(state);

        self.source.stop().await;
    }

    /// Successful submission: clear the cycle and release the camera
    async fn finish_cycle(&self, state: &mut MachineState) {
        state.capture = None;
        state.detection = None;
        state.cycle += 1;
        self.apply(state, ScanPhase::Idle);
        self.source.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendApi, CreatedAccount, RegisterPayload, ScanRecord, ScanSubmission, StateUpdate,
        SubmitReceipt, TokenResponse,
    };
    use crate::capture::FrameGrabber;
    use crate::classifier::Classifier;
    use crate::detection::AcceptancePolicy;
    use crate::models::{Classification, Frame, ReviewState, ScoredLabel};
    use crate::session_gate::encode_test_token;
    use crate::token_store::MemoryTokenStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct StaticGrabber;

    #[async_trait]
    impl FrameGrabber for StaticGrabber {
        async fn grab_frame(&self) -> Result<Frame> {
            Ok(Frame {
                jpeg: vec![0xFF, 0xD8, 0x42],
                width: 8,
                height: 8,
                grabbed_at: Utc::now(),
            })
        }
    }

    /// Classifier answering a fixed classification
    struct FixedClassifier {
        entries: Vec<(String, f32)>,
    }

    impl FixedClassifier {
        fn answering(entries: &[(&str, f32)]) -> Arc<Self> {
            Arc::new(Self {
                entries: entries
                    .iter()
                    .map(|(l, p)| (l.to_string(), *p))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn classify(&self, _jpeg: &[u8]) -> Result<Classification> {
            Ok(Classification {
                entries: self
                    .entries
                    .iter()
                    .map(|(label, probability)| ScoredLabel {
                        label: label.clone(),
                        probability: *probability,
                    })
                    .collect(),
            })
        }
    }

    struct FakeBackend {
        submit_calls: AtomicUsize,
        fail_submit: AtomicBool,
        last_submission: tokio::sync::Mutex<Option<ScanSubmission>>,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                submit_calls: AtomicUsize::new(0),
                fail_submit: AtomicBool::new(false),
                last_submission: tokio::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl BackendApi for FakeBackend {
        async fn authenticate(&self, email: &str, _password: &str) -> Result<TokenResponse> {
            Ok(TokenResponse {
                access_token: encode_test_token(email, "u-1", "cliente", 4_102_444_800),
                token_type: "bearer".to_string(),
            })
        }

        async fn register(&self, payload: &RegisterPayload) -> Result<CreatedAccount> {
            Ok(CreatedAccount {
                id: Uuid::new_v4(),
                email: payload.email.clone(),
                username: payload.username.clone(),
                role: payload.role.clone(),
                is_active: true,
            })
        }

        async fn submit_scan(&self, submission: &ScanSubmission) -> Result<SubmitReceipt> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_submission.lock().await = Some(submission.clone());
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(Error::Submission("temporarily unavailable".to_string()));
            }
            Ok(SubmitReceipt {
                record_id: "r-1".to_string(),
                label: submission.label.clone(),
                assigned_sku: "AUTO-BOT-0001".to_string(),
                review_state: ReviewState::Approved,
            })
        }

        async fn list_records(&self) -> Result<Vec<ScanRecord>> {
            Ok(Vec::new())
        }

        async fn set_record_state(&self, _record_id: &str, _state: &str) -> Result<StateUpdate> {
            Ok(StateUpdate {
                new_state: ReviewState::Approved,
            })
        }
    }

    struct Rig {
        machine: ScanMachine,
        gate: Arc<SessionGate>,
        backend: Arc<FakeBackend>,
    }

    fn rig(classifier: Arc<dyn Classifier>) -> Rig {
        let backend = FakeBackend::new();
        let gate = Arc::new(SessionGate::new(
            backend.clone(),
            Arc::new(MemoryTokenStore::new()),
        ));
        let source = Arc::new(CaptureSource::new(
            Arc::new(StaticGrabber),
            Duration::from_secs(60),
        ));
        let detector = Arc::new(DetectionLoop::new(classifier, AcceptancePolicy::default()));
        let machine = ScanMachine::new(source, detector, gate.clone());
        Rig {
            machine,
            gate,
            backend,
        }
    }

    fn confident() -> Arc<FixedClassifier> {
        FixedClassifier::answering(&[("Bottle", 0.92), ("None", 0.08)])
    }

    fn background_only() -> Arc<FixedClassifier> {
        FixedClassifier::answering(&[("None", 0.99)])
    }

    #[tokio::test]
    async fn activate_then_shutter_reaches_reviewing_with_detection() {
        let r = rig(confident());
        assert_eq!(r.machine.activate().await.unwrap(), ScanPhase::LivePreview);
        assert_eq!(r.machine.shutter().await.unwrap(), ScanPhase::Reviewing);

        let detection = r.machine.current_detection().await.unwrap();
        assert_eq!(detection.label, "Bottle");
        assert!((detection.confidence - 0.92).abs() < f32::EPSILON);
        assert!(r.machine.current_capture().await.is_some());
    }

    #[tokio::test]
    async fn background_classification_reviews_without_detection() {
        let r = rig(background_only());
        r.machine.activate().await.unwrap();
        assert_eq!(r.machine.shutter().await.unwrap(), ScanPhase::Reviewing);
        assert!(r.machine.current_detection().await.is_none());
        // Confirm is disabled without a detection.
        assert!(matches!(r.machine.confirm().await, ConfirmResult::Ignored));
        assert_eq!(r.machine.phase().await, ScanPhase::Reviewing);
    }

    #[tokio::test]
    async fn shutter_is_ignored_outside_live_preview() {
        let r = rig(confident());
        assert_eq!(r.machine.shutter().await.unwrap(), ScanPhase::Idle);
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();
        // Reviewing: a second shutter does nothing.
        assert_eq!(r.machine.shutter().await.unwrap(), ScanPhase::Reviewing);
    }

    #[tokio::test]
    async fn retake_clears_and_returns_to_live_preview() {
        let r = rig(confident());
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();

        assert_eq!(r.machine.retake().await, ScanPhase::LivePreview);
        assert!(r.machine.current_capture().await.is_none());
        assert!(r.machine.current_detection().await.is_none());
    }

    #[tokio::test]
    async fn retake_is_unreachable_outside_reviewing() {
        let r = rig(confident());
        assert_eq!(r.machine.retake().await, ScanPhase::Idle);
        r.machine.activate().await.unwrap();
        assert_eq!(r.machine.retake().await, ScanPhase::LivePreview);
    }

    #[tokio::test]
    async fn confirm_with_session_submits_and_returns_to_idle() {
        let r = rig(confident());
        r.gate.login("maria@example.com", "secret").await.unwrap();

        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();

        let result = r.machine.confirm().await;
        let ConfirmResult::Submitted(receipt) = result else {
            panic!("expected submission, got {:?}", result);
        };
        assert_eq!(receipt.label, "Bottle");
        assert_eq!(r.machine.phase().await, ScanPhase::Idle);
        assert!(r.machine.current_capture().await.is_none());
        assert_eq!(r.backend.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthenticated_confirm_waits_then_submits_once_after_login() {
        let r = rig(confident());
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();

        let result = r.machine.confirm().await;
        assert!(matches!(result, ConfirmResult::AwaitingAuth));
        assert_eq!(r.machine.phase().await, ScanPhase::Submitting);
        assert_eq!(r.backend.submit_calls.load(Ordering::SeqCst), 0);

        r.gate.login("maria@example.com", "secret").await.unwrap();
        let result = r.machine.auth_succeeded().await;
        let ConfirmResult::Submitted(receipt) = result else {
            panic!("expected submission, got {:?}", result);
        };
        assert_eq!(receipt.label, "Bottle");
        assert_eq!(r.backend.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.machine.phase().await, ScanPhase::Idle);

        let sent = r.backend.last_submission.lock().await.clone().unwrap();
        assert_eq!(sent.label, "Bottle");
        assert!((sent.confidence - 0.92).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn auth_cancel_returns_to_reviewing_with_payload_intact() {
        let r = rig(confident());
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();
        r.machine.confirm().await;

        assert_eq!(r.machine.auth_cancelled().await, ScanPhase::Reviewing);
        assert!(!r.gate.has_pending().await);
        assert!(r.machine.current_capture().await.is_some());
        assert!(r.machine.current_detection().await.is_some());
    }

    #[tokio::test]
    async fn failed_submission_returns_to_reviewing_for_identical_retry() {
        let r = rig(confident());
        r.gate.login("maria@example.com", "secret").await.unwrap();
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();

        r.backend.fail_submit.store(true, Ordering::SeqCst);
        let result = r.machine.confirm().await;
        assert!(matches!(result, ConfirmResult::Failed(Error::Submission(_))));
        assert_eq!(r.machine.phase().await, ScanPhase::Reviewing);

        let first = r.backend.last_submission.lock().await.clone().unwrap();

        // Manual retry with the same payload once the backend recovers.
        r.backend.fail_submit.store(false, Ordering::SeqCst);
        let result = r.machine.confirm().await;
        assert!(matches!(result, ConfirmResult::Submitted(_)));

        let second = r.backend.last_submission.lock().await.clone().unwrap();
        assert_eq!(first.label, second.label);
        assert_eq!(first.jpeg, second.jpeg);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(r.backend.submit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn logout_while_awaiting_auth_never_submits_old_capture() {
        let r = rig(confident());
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();
        r.machine.confirm().await;
        assert!(r.gate.has_pending().await);

        r.gate.logout().await.unwrap();
        assert!(!r.gate.has_pending().await);

        r.gate.login("maria@example.com", "secret").await.unwrap();
        let result = r.machine.auth_succeeded().await;
        assert!(matches!(result, ConfirmResult::Ignored));
        assert_eq!(r.backend.submit_calls.load(Ordering::SeqCst), 0);
        // The user decides again from review.
        assert_eq!(r.machine.phase().await, ScanPhase::Reviewing);
    }

    /// Confident classifier that takes a while, so a reset can land
    /// mid-classification
    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn classify(&self, _jpeg: &[u8]) -> Result<Classification> {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(Classification {
                entries: vec![ScoredLabel {
                    label: "Bottle".to_string(),
                    probability: 0.95,
                }],
            })
        }
    }

    #[tokio::test]
    async fn classification_arriving_after_reset_is_discarded() {
        let r = Arc::new(rig(Arc::new(SlowClassifier)));
        r.machine.activate().await.unwrap();

        let racer = r.clone();
        let shutter = tokio::spawn(async move { racer.machine.shutter().await });

        // Let the shutter freeze its capture and suspend in classify.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(r.machine.phase().await, ScanPhase::Analyzing);
        r.machine.reset().await;

        let final_phase = shutter.await.unwrap().unwrap();
        assert_eq!(final_phase, ScanPhase::Idle);
        assert!(r.machine.current_detection().await.is_none());
        assert!(r.machine.current_capture().await.is_none());
    }

    #[tokio::test]
    async fn reset_returns_to_idle_from_any_state() {
        let r = rig(confident());
        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();
        r.machine.reset().await;

        assert_eq!(r.machine.phase().await, ScanPhase::Idle);
        assert!(r.machine.current_capture().await.is_none());
        assert!(r.machine.current_detection().await.is_none());
    }

    #[tokio::test]
    async fn phase_changes_are_broadcast() {
        let r = rig(confident());
        let mut events = r.machine.subscribe();

        r.machine.activate().await.unwrap();
        r.machine.shutter().await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.from, ScanPhase::Idle);
        assert_eq!(first.to, ScanPhase::LivePreview);

        let second = events.recv().await.unwrap();
        assert_eq!(second.to, ScanPhase::Analyzing);

        let third = events.recv().await.unwrap();
        assert_eq!(third.to, ScanPhase::Reviewing);
    }
}
