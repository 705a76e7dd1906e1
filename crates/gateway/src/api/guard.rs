//! Admin auth guard — an Axum extractor so handlers opt in with
//! `_guard: AdminGuard` in their parameter list instead of a manual token
//! check repeated in every admin handler (§6 ambient: admin token).

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Enforces the admin bearer token. SHA-256 + constant-time compare so the
/// check doesn't leak the token length or contents through timing.
///
/// If no admin token is configured (neither `ADMIN_TOKEN` nor
/// `admin.token`), every request passes — this is the documented dev-mode
/// fallback, not an oversight.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.admin_token_hash {
            Some(h) => h,
            None => return Ok(AdminGuard),
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err((StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "invalid admin token" }))));
        }
        Ok(AdminGuard)
    }
}
