use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
    body::Body,
};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::context::ClinicContext;
use shared_models::error::AppError;
use shared_config::AppConfig;

use crate::jwt::validate_token;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

// Staff requests: Bearer JWT, user stored in request extensions
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    let token = auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

    let user = validate_token(token, &config.supabase_jwt_secret)
        .map_err(AppError::Auth)?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

// Machine-to-machine requests from the telephony / automation side
pub async fn webhook_secret_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !has_valid_webhook_secret(request.headers(), &config.webhook_secret) {
        return Err(AppError::Auth("Unauthorized".to_string()));
    }

    Ok(next.run(request).await)
}

pub fn has_valid_webhook_secret(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|provided| provided.as_bytes().ct_eq(expected.as_bytes()).into())
        .unwrap_or(false)
}

/// Tenant for a staff request: the clinic on the token, else the configured default.
pub fn staff_clinic(user: &User, config: &AppConfig) -> Result<ClinicContext, AppError> {
    ClinicContext::resolve(user.clinic_id, config.default_clinic_id)
}

/// Tenant for a webhook payload carrying an optional `clinic_id`.
pub fn webhook_clinic(payload_clinic: Option<Uuid>, config: &AppConfig) -> Result<ClinicContext, AppError> {
    ClinicContext::resolve(payload_clinic, config.default_clinic_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn webhook_secret_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(!has_valid_webhook_secret(&headers, "s3cret"));

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(has_valid_webhook_secret(&headers, "s3cret"));
        assert!(!has_valid_webhook_secret(&headers, "s3cret2"));
    }

    #[test]
    fn webhook_secret_rejects_prefix_and_same_length_mismatch() {
        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cre"));
        assert!(!has_valid_webhook_secret(&headers, "s3cret"));

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3creT"));
        assert!(!has_valid_webhook_secret(&headers, "s3cret"));
    }

    #[test]
    fn empty_configured_secret_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static(""));
        assert!(!has_valid_webhook_secret(&headers, ""));
    }
}
