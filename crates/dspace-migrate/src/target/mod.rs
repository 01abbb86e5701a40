//! Target repository REST backend client.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::{MigrateError, Result};
use crate::pump::EntityRecord;

/// Connect timeout for backend requests.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall request timeout; imports of large payloads can be slow.
const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum response-body length carried into error messages.
const BODY_SNIPPET_LEN: usize = 200;

/// Create/update operations the pump submits records through.
///
/// A trait seam so tests can substitute a scripted client for the real
/// backend.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Submit one record to the target. Success is 2xx; a permanent
    /// rejection comes back as `Validation`/`Conflict`, anything
    /// retryable as `Transient`.
    async fn submit(&self, record: &EntityRecord) -> Result<()>;
}

/// reqwest-backed client for the target repository API.
pub struct HttpApiClient {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
    authentication: bool,
    token: RwLock<Option<String>>,
}

impl HttpApiClient {
    pub fn new(backend: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_READ_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: backend.endpoint.trim_end_matches('/').to_string(),
            user: backend.user.clone(),
            password: backend.password.clone(),
            authentication: backend.authentication,
            token: RwLock::new(None),
        })
    }

    /// Authenticate against the backend and keep the bearer token for
    /// subsequent imports. A no-op when authentication is disabled.
    pub async fn login(&self) -> Result<()> {
        if !self.authentication {
            debug!("backend authentication disabled, skipping login");
            return Ok(());
        }

        let url = format!("{}/authn/login", self.endpoint);
        let response = self
            .http
            .post(&url)
            .form(&[("user", self.user.as_str()), ("password", self.password.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MigrateError::Connection(format!(
                "login to backend [{}] failed with status {}",
                self.endpoint,
                response.status()
            )));
        }

        let token = response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        *self.token.write().await = token;
        info!("backend is available at [{}]", self.endpoint);
        Ok(())
    }

    /// Cheap reachability probe for health checks.
    pub async fn health(&self) -> Result<()> {
        let response = self.http.get(&self.endpoint).send().await?;
        if response.status().is_server_error() {
            return Err(MigrateError::Connection(format!(
                "backend [{}] answered {}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn submit(&self, record: &EntityRecord) -> Result<()> {
        let url = format!("{}/clarin/import/{}", self.endpoint, record.entity_type);
        let mut request = self.http.post(&url).json(&record.payload());
        if let Some(token) = self.token.read().await.as_ref() {
            request = request.header(AUTHORIZATION, token.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_response(&record.describe(), status, &body))
    }
}

/// Map a non-2xx backend response onto the error taxonomy.
///
/// 409 is a conflict; 408/429 and all 5xx are transient and retried;
/// remaining 4xx are validation rejections, never retried.
fn classify_response(entity: &str, status: StatusCode, body: &str) -> MigrateError {
    let snippet = sanitize_body(body);
    match status {
        StatusCode::CONFLICT => MigrateError::Conflict {
            entity: entity.to_string(),
            message: format!("{}: {}", status, snippet),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            MigrateError::Transient(format!("{} for {}: {}", status, entity, snippet))
        }
        s if s.is_server_error() => {
            MigrateError::Transient(format!("{} for {}: {}", status, entity, snippet))
        }
        s if s.is_client_error() => MigrateError::Validation {
            entity: entity.to_string(),
            message: format!("{}: {}", status, snippet),
        },
        s => MigrateError::Transient(format!("unexpected {} for {}: {}", s, entity, snippet)),
    }
}

/// Truncate and flatten a response body so it is safe to log.
fn sanitize_body(body: &str) -> String {
    if body.is_empty() {
        return "no content".to_string();
    }
    let flat = body.replace(['\n', '\r', '\t'], " ");
    let mut snippet: String = flat.chars().take(BODY_SNIPPET_LEN).collect();
    if flat.chars().count() > BODY_SNIPPET_LEN {
        snippet.push_str("...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_permanent() {
        let err = classify_response("item/3", StatusCode::CONFLICT, "duplicate handle");
        assert!(matches!(err, MigrateError::Conflict { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_client_errors_are_validation() {
        let err = classify_response("item/3", StatusCode::BAD_REQUEST, "missing field");
        match &err {
            MigrateError::Validation { entity, message } => {
                assert_eq!(entity, "item/3");
                assert!(message.contains("missing field"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_transient());
    }

    #[test]
    fn test_server_errors_and_throttling_are_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            let err = classify_response("item/3", status, "");
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn test_body_snippet_is_truncated_and_flattened() {
        let body = format!("line one\nline two\t{}", "x".repeat(500));
        let snippet = sanitize_body(&body);
        assert!(snippet.len() <= BODY_SNIPPET_LEN + 3);
        assert!(snippet.ends_with("..."));
        assert!(!snippet.contains('\n'));
        assert_eq!(sanitize_body(""), "no content");
    }
}
