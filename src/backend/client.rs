//! Bucle backend HTTP client

use super::types::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

/// Backend capability interface consumed by the session gate (and, for
/// the review endpoints, by external admin tooling).
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Exchange credentials for an access token
    async fn authenticate(&self, email: &str, password: &str) -> Result<TokenResponse>;

    /// Create an account
    async fn register(&self, payload: &RegisterPayload) -> Result<CreatedAccount>;

    /// Submit one confirmed scan for review
    async fn submit_scan(&self, submission: &ScanSubmission) -> Result<SubmitReceipt>;

    /// List submitted records (review collaborator)
    async fn list_records(&self) -> Result<Vec<ScanRecord>>;

    /// Update a record's review state (review collaborator)
    async fn set_record_state(&self, record_id: &str, state: &str) -> Result<StateUpdate>;
}

/// HTTP client for the Bucle backend
#[derive(Clone)]
pub struct HttpBackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackendClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            // Redirects would turn POST into GET on some proxies.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Extract the FastAPI `detail` field from an error body, falling back
    /// to the raw text.
    async fn error_detail(resp: reqwest::Response) -> String {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody { detail: Some(d) }) => d,
            _ => format!("{} - {}", status, text),
        }
    }
}

#[async_trait]
impl BackendApi for HttpBackendClient {
    async fn authenticate(&self, email: &str, password: &str) -> Result<TokenResponse> {
        let url = self.url("/token");
        let form = [("username", email), ("password", password)];

        let resp = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Authentication request failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth(Self::error_detail(resp).await));
        }
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "Authentication failed: {}",
                Self::error_detail(resp).await
            )));
        }

        let token: TokenResponse = resp.json().await?;
        tracing::info!("Authentication succeeded");
        Ok(token)
    }

    async fn register(&self, payload: &RegisterPayload) -> Result<CreatedAccount> {
        let url = self.url("/register");

        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Registration request failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::CONFLICT {
            // Duplicate email and validation problems come back here.
            return Err(Error::Auth(Self::error_detail(resp).await));
        }
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "Registration failed: {}",
                Self::error_detail(resp).await
            )));
        }

        let account: CreatedAccount = resp.json().await?;
        tracing::info!(email = %account.email, "Account created");
        Ok(account)
    }

    async fn submit_scan(&self, submission: &ScanSubmission) -> Result<SubmitReceipt> {
        let url = self.url("/registrar-escaneo");

        let form = Form::new()
            .text("producto", submission.label.clone())
            .text("confianza", format!("{}", submission.confidence))
            .text("usuario_id", submission.subject_id.clone())
            .part(
                "archivo",
                Part::bytes(submission.jpeg.clone())
                    .file_name("captura.jpg")
                    .mime_str("image/jpeg")?,
            );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&submission.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Submission request failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth(Self::error_detail(resp).await));
        }
        if !status.is_success() {
            return Err(Error::Submission(Self::error_detail(resp).await));
        }

        let receipt: SubmitReceipt = resp.json().await?;
        tracing::info!(
            record_id = %receipt.record_id,
            label = %receipt.label,
            review_state = %receipt.review_state.as_str(),
            "Scan submitted"
        );
        Ok(receipt)
    }

    async fn list_records(&self) -> Result<Vec<ScanRecord>> {
        let url = self.url("/historial");
        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Network(format!(
                "Record listing failed: {}",
                resp.status()
            )));
        }

        let records: Vec<ScanRecord> = resp.json().await?;
        Ok(records)
    }

    async fn set_record_state(&self, record_id: &str, state: &str) -> Result<StateUpdate> {
        let url = self.url(&format!("/actualizar/{}", record_id));

        let resp = self
            .http
            .put(&url)
            .json(&serde_json::json!({ "estado": state }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("Record {}", record_id)));
        }
        if !status.is_success() {
            return Err(Error::Network(format!(
                "Record update failed: {}",
                status
            )));
        }

        let update: StateUpdate = resp.json().await?;
        Ok(update)
    }
}
