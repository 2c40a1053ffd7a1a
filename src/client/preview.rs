//! Unverified token preview
//!
//! Reads the claims segment of a token WITHOUT checking its signature. The
//! client has no secret, so nothing here may be used to authorize anything:
//! it only lets the client skip requests that would certainly be rejected.

use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A token with less than this much validity left is treated as expired.
pub const EXPIRY_BUFFER_MS: i64 = 60_000;

/// Claims as read from the payload segment. Only `exp` is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreviewClaims {
    pub sub: Option<i32>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub iat: Option<i64>,
    /// Seconds since the epoch.
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("token has no payload segment")]
    MissingPayload,

    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not a claims object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes the middle segment of `header.payload.signature`.
pub fn preview_claims(token: &str) -> Result<PreviewClaims, PreviewError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(PreviewError::MissingPayload),
    };

    // Issuers differ on padding.
    let bytes = if payload.ends_with('=') {
        URL_SAFE.decode(payload)?
    } else {
        URL_SAFE_NO_PAD.decode(payload)?
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Milliseconds from `now` until `exp`. `None` when the claim is out of range.
fn remaining_ms(exp: i64, now: DateTime<Utc>) -> Option<i64> {
    exp.checked_mul(1000)?.checked_sub(now.timestamp_millis())
}

/// True when fewer than [`EXPIRY_BUFFER_MS`] of validity remain at `now`, or
/// when the token cannot be decoded at all.
pub fn is_near_expiry(token: &str, now: DateTime<Utc>) -> bool {
    match preview_claims(token) {
        Ok(claims) => remaining_ms(claims.exp, now).is_none_or(|ms| ms < EXPIRY_BUFFER_MS),
        Err(e) => {
            tracing::debug!("token preview failed, treating as expired: {}", e);
            true
        }
    }
}

/// TokenInfo
///
/// What the client can tell about its token without the secret.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub claims: PreviewClaims,
    pub expires_at: DateTime<Utc>,
    /// Whole minutes left, rounded down. Negative once expired.
    pub remaining_minutes: i64,
}

pub fn token_info(token: &str, now: DateTime<Utc>) -> Option<TokenInfo> {
    let claims = preview_claims(token).ok()?;
    let expires_at = DateTime::from_timestamp(claims.exp, 0)?;
    let remaining_ms = remaining_ms(claims.exp, now)?;
    Some(TokenInfo {
        remaining_minutes: remaining_ms.div_euclid(60_000),
        expires_at,
        claims,
    })
}
