//! Access-token claim decoding
//!
//! The backend issues JWTs; the engine only reads the payload claims to
//! derive identity and expiry. Signature verification stays on the
//! backend — possession of an unexpired token is what gates submission
//! here, the backend rejects forged ones.

use crate::error::{Error, Result};
use crate::session_gate::Session;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

/// Claims the backend puts in its access tokens
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Account email
    pub sub: String,
    /// Account id
    pub id: String,
    /// Account role
    pub rol: String,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

/// Decode the payload segment of a JWT without verifying the signature
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::Parse("Token has no payload segment".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Parse(format!("Token payload is not base64: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Parse(format!("Token claims malformed: {}", e)))
}

/// Build a session from a raw token by decoding its claims
pub fn session_from_token(token: &str) -> Result<Session> {
    let claims = decode_claims(token)?;
    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| Error::Parse(format!("Token exp out of range: {}", claims.exp)))?;

    Ok(Session {
        token: token.to_string(),
        subject_id: claims.id,
        email: claims.sub,
        role: claims.rol,
        expires_at,
    })
}

#[cfg(test)]
pub(crate) fn encode_token(sub: &str, id: &str, rol: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({"sub": sub, "id": id, "rol": rol, "exp": exp}).to_string(),
    );
    format!("{}.{}.sig", header, payload)
}
