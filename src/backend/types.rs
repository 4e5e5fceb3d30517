//! Bucle backend wire types
//!
//! Field names follow the backend's wire protocol (Spanish keys); the
//! Rust side uses engine vocabulary and maps via serde renames.

use crate::models::ReviewState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response of `POST /token`
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Payload of `POST /register`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterPayload {
    #[serde(rename = "usuario")]
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "rol")]
    pub role: String,
}

/// Response of `POST /register`
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedAccount {
    pub id: Uuid,
    pub email: String,
    #[serde(rename = "usuario")]
    pub username: String,
    #[serde(rename = "rol")]
    pub role: String,
    #[serde(default)]
    pub is_active: bool,
}

/// Submission payload for `POST /registrar-escaneo`
#[derive(Debug, Clone)]
pub struct ScanSubmission {
    /// JPEG evidence bytes, uploaded as `archivo` (`captura.jpg`)
    pub jpeg: Vec<u8>,
    pub label: String,
    pub confidence: f32,
    pub subject_id: String,
    /// Bearer token of the authorizing session
    pub token: String,
}

/// Response of `POST /registrar-escaneo`
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReceipt {
    #[serde(rename = "id")]
    pub record_id: String,
    #[serde(rename = "producto")]
    pub label: String,
    #[serde(rename = "sku_asignado")]
    pub assigned_sku: String,
    /// Review state the backend computed for the record
    #[serde(rename = "estado")]
    pub review_state: ReviewState,
}

/// Product reference nested in a scan record
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRef {
    pub id: Uuid,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
}

/// One record of `GET /historial`
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRecord {
    pub id: Uuid,
    #[serde(rename = "producto_id")]
    pub product_id: Uuid,
    #[serde(rename = "cant_devuelta")]
    pub quantity_returned: i32,
    #[serde(rename = "foto_url")]
    pub photo_url: Option<String>,
    #[serde(rename = "confianza")]
    pub confidence: f32,
    #[serde(rename = "fecha_hora")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "estado")]
    pub review_state: ReviewState,
    #[serde(rename = "producto")]
    pub product: Option<ProductRef>,
}

/// Response of `PUT /actualizar/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct StateUpdate {
    #[serde(rename = "nuevo_estado")]
    pub new_state: ReviewState,
}

/// FastAPI error body
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}
