//! Shared JSON-over-HTTP plumbing for the provider adapters.
//!
//! Each backend family only supplies a URL, a [`RequestAuth`] header strategy
//! and a body; status handling and error mapping live here.

use agent_core::error::{AgentError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Longest body excerpt carried in an error message
const ERROR_SNIPPET_CHARS: usize = 300;

/// Default request timeout; tool loops can send large contexts
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Header-building strategy applied to every request
pub trait RequestAuth: Send + Sync {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder;
}

/// No authentication (local OpenAI-compatible servers)
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuth;

impl RequestAuth for NoAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }
}

/// `Authorization: Bearer <token>`
#[derive(Clone)]
pub struct BearerAuth(pub String);

impl RequestAuth for BearerAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.0)
    }
}

/// Arbitrary fixed headers, e.g. `x-api-key` plus a version header
#[derive(Clone, Debug, Default)]
pub struct HeaderAuth {
    headers: Vec<(&'static str, String)>,
}

impl HeaderAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl RequestAuth for HeaderAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        self.headers
            .iter()
            .fold(request, |req, (name, value)| req.header(*name, value))
    }
}

/// Build the client shared by an adapter
pub fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Raw status and body of a finished request
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    /// Decode a successful body, or map the status to an error
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        if !self.status.is_success() {
            return Err(status_error(self.status, &self.body));
        }
        serde_json::from_str(&self.body).map_err(|e| {
            AgentError::Provider(format!("invalid response body: {} ({})", e, snippet(&self.body)))
        })
    }
}

/// POST a JSON body
pub async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    auth: &dyn RequestAuth,
    body: &B,
) -> Result<RawResponse> {
    let request = auth.apply(client.post(url)).json(body);
    send(request, url).await
}

/// GET with `Accept: application/json`
pub async fn get_json(client: &Client, url: &str, auth: &dyn RequestAuth) -> Result<RawResponse> {
    let request = auth
        .apply(client.get(url))
        .header(reqwest::header::ACCEPT, "application/json");
    send(request, url).await
}

async fn send(request: RequestBuilder, url: &str) -> Result<RawResponse> {
    let response = request.send().await.map_err(|e| {
        tracing::debug!(url, error = %e, "request failed");
        AgentError::Transport(e.to_string())
    })?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))?;
    tracing::trace!(url, status = status.as_u16(), bytes = body.len(), "response");
    Ok(RawResponse { status, body })
}

/// Non-success status → error; 401/403 mean the credential is bad
pub fn status_error(status: StatusCode, body: &str) -> AgentError {
    let detail = error_message(body).unwrap_or_else(|| snippet(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AgentError::Auth(format!("{}: {}", status.as_u16(), detail))
        }
        _ => AgentError::Provider(format!("{}: {}", status.as_u16(), detail)),
    }
}

/// `error.message` from the usual `{"error": {...}}` envelope
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn snippet(body: &str) -> String {
    body.chars().take(ERROR_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let auth = status_error(StatusCode::UNAUTHORIZED, "nope");
        assert!(matches!(auth, AgentError::Auth(msg) if msg == "401: nope"));

        let provider = status_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#,
        );
        assert!(matches!(provider, AgentError::Provider(msg) if msg == "400: model not found"));
    }

    #[test]
    fn test_json_decode_error_is_provider_error() {
        let raw = RawResponse {
            status: StatusCode::OK,
            body: "<html>".into(),
        };
        let result: Result<serde_json::Value> = raw.json();
        assert!(matches!(result, Err(AgentError::Provider(_))));
    }
}
