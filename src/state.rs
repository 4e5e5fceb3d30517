//! Application state
//!
//! Holds configuration and the wired engine components

use crate::backend::HttpBackendClient;
use crate::capture::{CaptureSource, FfmpegGrabber};
use crate::classifier::HttpClassifier;
use crate::detection::{AcceptancePolicy, DetectionLoop};
use crate::models::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::scan_machine::ScanMachine;
use crate::session_gate::SessionGate;
use crate::token_store::SqliteTokenStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bucle backend URL
    pub backend_url: String,
    /// Model artifact base URL (serves metadata.json)
    pub model_url: String,
    /// Scoring endpoint URL
    pub score_url: String,
    /// Camera input: /dev/videoN, rtsp:// or http:// URL
    pub camera_input: String,
    /// Settings database path (session token persistence)
    pub settings_db: PathBuf,
    /// Frame pump interval in milliseconds
    pub frame_interval_ms: u64,
    /// Detection acceptance threshold
    pub confidence_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:7860".to_string()),
            model_url: std::env::var("MODEL_URL").unwrap_or_else(|_| {
                "https://teachablemachine.withgoogle.com/models/psvxCV8fo".to_string()
            }),
            score_url: std::env::var("SCORE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000/score".to_string()),
            camera_input: std::env::var("CAMERA_INPUT")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            settings_db: std::env::var("SETTINGS_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("scanner-settings.db")),
            frame_interval_ms: std::env::var("FRAME_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
            confidence_threshold: std::env::var("CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        }
    }
}

/// Wired engine components
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<HttpBackendClient>,
    pub classifier: Arc<HttpClassifier>,
    pub source: Arc<CaptureSource>,
    pub gate: Arc<SessionGate>,
    pub machine: Arc<ScanMachine>,
}

impl AppState {
    /// Wire all components from configuration.
    ///
    /// The persisted session is restored here; the classifier is NOT
    /// initialized (callers decide when to load the model).
    pub async fn build(config: AppConfig) -> crate::Result<Self> {
        let token_store = Arc::new(SqliteTokenStore::open(&config.settings_db).await?);

        let backend = Arc::new(HttpBackendClient::new(config.backend_url.clone()));
        let classifier = Arc::new(HttpClassifier::new(
            config.model_url.clone(),
            config.score_url.clone(),
        ));

        let grabber = Arc::new(FfmpegGrabber::new(config.camera_input.clone()));
        let source = Arc::new(CaptureSource::new(
            grabber,
            Duration::from_millis(config.frame_interval_ms),
        ));

        let detector = Arc::new(DetectionLoop::new(
            classifier.clone(),
            AcceptancePolicy::new(config.confidence_threshold),
        ));

        let gate = Arc::new(SessionGate::new(backend.clone(), token_store));
        gate.load_persisted().await?;

        let machine = Arc::new(ScanMachine::new(source.clone(), detector, gate.clone()));

        Ok(Self {
            config,
            backend,
            classifier,
            source,
            gate,
            machine,
        })
    }
}
