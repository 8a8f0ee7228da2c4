use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Non-success reply from PostgREST, kept typed so stores can tell
/// constraint violations and serialization failures apart.
#[derive(Debug, Clone, Error)]
#[error("API error ({status}): {message}")]
pub struct SupabaseApiError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

impl SupabaseApiError {
    fn from_body(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let code = parsed
            .as_ref()
            .and_then(|v| v.get("code"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());

        Self { status, code, message }
    }

    /// Unique (23505) or exclusion (23P01) constraint hit.
    pub fn is_constraint_conflict(&self) -> bool {
        self.status == 409 || matches!(self.code.as_deref(), Some("23505") | Some("23P01"))
    }

    pub fn is_serialization_failure(&self) -> bool {
        matches!(self.code.as_deref(), Some("40001") | Some("40P01"))
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// Returns the typed API error behind an `anyhow::Error`, if any.
pub fn api_error(err: &anyhow::Error) -> Option<&SupabaseApiError> {
    err.downcast_ref::<SupabaseApiError>()
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_api_key().to_string(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.api_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let bearer = auth_token.unwrap_or(&self.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", bearer))?,
        );

        Ok(headers)
    }

    async fn send(&self, method: Method, path: &str,
                  auth_token: Option<&str>, body: Option<Value>,
                  extra_headers: Option<HeaderMap>) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);
            return Err(anyhow!(SupabaseApiError::from_body(status.as_u16(), &error_text)));
        }

        Ok(response)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         headers: Option<HeaderMap>) -> Result<T>
    where T: DeserializeOwned {
        let response = self.send(method, path, auth_token, body, headers).await?;
        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Write that does not need the affected rows back.
    pub async fn execute(&self, method: Method, path: &str,
                         body: Option<Value>, headers: Option<HeaderMap>) -> Result<()> {
        self.send(method, path, None, body, headers).await?;
        Ok(())
    }

    /// Call a Postgres function exposed through `/rest/v1/rpc`.
    pub async fn rpc<T>(&self, function: &str, params: Value) -> Result<T>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/rpc/{}", function);
        self.request(Method::POST, &path, None, Some(params)).await
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// `Prefer: return=representation`, plus an optional upsert resolution.
pub fn representation_headers(merge_duplicates: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let prefer = if merge_duplicates {
        "return=representation,resolution=merge-duplicates"
    } else {
        "return=representation"
    };
    headers.insert("Prefer", HeaderValue::from_static(prefer));
    headers
}

/// Upsert that leaves existing rows untouched.
pub fn ignore_duplicates_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Prefer",
        HeaderValue::from_static("return=representation,resolution=ignore-duplicates"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgrest_error_body() {
        let err = SupabaseApiError::from_body(
            409,
            r#"{"code":"23P01","message":"conflicting key value violates exclusion constraint"}"#,
        );
        assert_eq!(err.code.as_deref(), Some("23P01"));
        assert!(err.is_constraint_conflict());
        assert!(!err.is_serialization_failure());
    }

    #[test]
    fn keeps_raw_text_when_body_is_not_json() {
        let err = SupabaseApiError::from_body(502, "bad gateway");
        assert_eq!(err.message, "bad gateway");
        assert!(err.code.is_none());
    }

    #[test]
    fn api_error_downcasts_through_anyhow() {
        let err = anyhow!(SupabaseApiError::from_body(500, r#"{"code":"40001","message":"could not serialize access"}"#));
        let api = api_error(&err).unwrap();
        assert!(api.is_serialization_failure());
    }
}
