//! Classifier adapter
//!
//! ## Responsibilities
//!
//! - Capability interface over the external image classifier
//! - Model artifact loading (ready gate)
//! - Scoring requests and response parsing
//!
//! The engine depends on no specifics of the bound model beyond the
//! reserved `"None"` background class.

use crate::error::{Error, Result};
use crate::models::{Classification, ScoredLabel};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;

/// Classifier capability interface.
///
/// One implementation is bound at startup from configuration (model URL).
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Load model artifacts. Until this resolves, `classify` fails with
    /// `ModelNotReady`.
    async fn initialize(&self) -> Result<()>;

    /// Classify one JPEG image into a ranked, non-empty label set.
    async fn classify(&self, jpeg: &[u8]) -> Result<Classification>;
}

/// Model metadata fetched at initialization (`metadata.json` next to the
/// model artifacts, Teachable Machine layout)
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One prediction entry from the scoring endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    #[serde(rename = "className")]
    pub class_name: String,
    pub probability: f32,
}

/// Scoring endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreResponse {
    pub predictions: Vec<Prediction>,
}

/// HTTP classifier bound to a hosted model
pub struct HttpClassifier {
    client: reqwest::Client,
    /// Base URL of the model artifacts (serves `metadata.json`)
    model_url: String,
    /// Scoring endpoint (accepts a multipart JPEG, answers ranked predictions)
    score_url: String,
    /// Loaded metadata; `None` until `initialize` resolves
    metadata: RwLock<Option<ModelMetadata>>,
}

impl HttpClassifier {
    pub fn new(model_url: String, score_url: String) -> Self {
        Self::with_timeout(model_url, score_url, Duration::from_secs(30))
    }

    pub fn with_timeout(model_url: String, score_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            model_url,
            score_url,
            metadata: RwLock::new(None),
        }
    }

    /// Labels of the bound model, if initialized
    pub async fn labels(&self) -> Option<Vec<String>> {
        self.metadata.read().await.as_ref().map(|m| m.labels.clone())
    }

    fn metadata_url(&self) -> String {
        format!("{}/metadata.json", self.model_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn initialize(&self) -> Result<()> {
        let url = self.metadata_url();
        let resp = self.client.get(&url).send().await.map_err(|e| {
            Error::Network(format!("Model metadata fetch failed: {}", e))
        })?;

        if !resp.status().is_success() {
            return Err(Error::Network(format!(
                "Model metadata fetch failed: {}",
                resp.status()
            )));
        }

        let meta: ModelMetadata = resp.json().await?;
        tracing::info!(
            model_url = %self.model_url,
            labels = meta.labels.len(),
            "Classifier model loaded"
        );

        *self.metadata.write().await = Some(meta);
        Ok(())
    }

    async fn classify(&self, jpeg: &[u8]) -> Result<Classification> {
        if self.metadata.read().await.is_none() {
            return Err(Error::ModelNotReady);
        }

        let form = Form::new().part(
            "image",
            Part::bytes(jpeg.to_vec())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self
            .client
            .post(&self.score_url)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Classification(format!(
                "Scoring failed: {} - {}",
                status, body
            )));
        }

        let result: ScoreResponse = resp
            .json()
            .await
            .map_err(|e| Error::Classification(format!("Malformed score response: {}", e)))?;

        if result.predictions.is_empty() {
            return Err(Error::Classification(
                "Scoring returned an empty prediction set".to_string(),
            ));
        }

        // Response order is preserved verbatim: tie-breaking downstream is
        // first-encountered-wins.
        Ok(Classification {
            entries: result
                .predictions
                .into_iter()
                .map(|p| ScoredLabel {
                    label: p.class_name,
                    probability: p.probability,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_response_parses_prediction_order() {
        let json = r#"{"predictions":[
            {"className":"None","probability":0.03},
            {"className":"Bottle","probability":0.92},
            {"className":"Can","probability":0.05}
        ]}"#;
        let resp: ScoreResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.predictions.len(), 3);
        assert_eq!(resp.predictions[0].class_name, "None");
        assert_eq!(resp.predictions[1].class_name, "Bottle");
    }

    #[test]
    fn metadata_parses_labels() {
        let json = r#"{"labels":["Bottle","Can","None"],"modelName":"bucle"}"#;
        let meta: ModelMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.labels, vec!["Bottle", "Can", "None"]);
    }

    #[tokio::test]
    async fn classify_before_initialize_is_not_ready() {
        let classifier = HttpClassifier::new(
            "http://localhost:9/model".to_string(),
            "http://localhost:9/score".to_string(),
        );
        let err = classifier.classify(&[0xFF, 0xD8]).await.unwrap_err();
        assert!(matches!(err, Error::ModelNotReady));
    }
}
