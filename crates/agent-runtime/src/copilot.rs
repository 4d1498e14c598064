//! GitHub Copilot Provider
//!
//! Chat-completion backend behind a short-lived session credential. The
//! long-lived OAuth token from the login file is exchanged for a session
//! token, which is refreshed before any send that falls within 60 seconds
//! of its expiry.

use std::path::{Path, PathBuf};

use agent_core::{
    error::{AgentError, Result},
    message::Message,
    provider::{GenerationOptions, LlmProvider, Output},
    tool::ToolDefinition,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::http::{self, HeaderAuth};
use crate::openai::request_body;

pub const TOKEN_ENDPOINT: &str = "https://api.github.com/copilot_internal/v2/token";
pub const CHAT_ENDPOINT: &str = "https://api.githubcopilot.com/chat/completions";
pub const EDITOR_VERSION: &str = "vscode/1.95.0";

/// File name of the saved OAuth login under the config directory
pub const TOKEN_FILE: &str = "copilot_token.json";

/// Refresh this long before the credential expires
const REFRESH_WINDOW_SECS: i64 = 60;

/// Saved OAuth login
#[derive(Clone, Debug, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// Read the login file written by the device-flow login
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::Auth(format!(
                    "no Copilot login found at {}, please login first",
                    path.display()
                ))
            } else {
                AgentError::Io(e)
            }
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("invalid Copilot token file: {}", e)))
    }
}

/// Session credential returned by the token endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True once `now` is inside the refresh window
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at - Duration::seconds(REFRESH_WINDOW_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    /// Unix seconds
    expires_at: i64,
}

/// Copilot chat provider
pub struct CopilotProvider {
    name: String,
    oauth: OAuthToken,
    credential: Mutex<Option<Credential>>,
    token_endpoint: String,
    chat_endpoint: String,
    options: GenerationOptions,
    client: reqwest::Client,
}

impl CopilotProvider {
    pub fn new(oauth: OAuthToken, options: GenerationOptions) -> Result<Self> {
        Ok(Self {
            name: "copilot".into(),
            oauth,
            credential: Mutex::new(None),
            token_endpoint: TOKEN_ENDPOINT.into(),
            chat_endpoint: CHAT_ENDPOINT.into(),
            options,
            client: http::client(http::DEFAULT_TIMEOUT)?,
        })
    }

    /// Provider from the login file in `config_dir`
    pub async fn from_config_dir(config_dir: &Path, options: GenerationOptions) -> Result<Self> {
        let oauth = OAuthToken::load(&token_path(config_dir)).await?;
        Self::new(oauth, options)
    }

    /// Rename (used for log lines and audit records)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override both endpoints (tests, enterprise proxies)
    pub fn with_endpoints(
        mut self,
        token_endpoint: impl Into<String>,
        chat_endpoint: impl Into<String>,
    ) -> Self {
        self.token_endpoint = token_endpoint.into();
        self.chat_endpoint = chat_endpoint.into();
        self
    }

    /// Current session token, refreshing first when missing or expiring
    async fn session_token(&self) -> Result<String> {
        let mut credential = self.credential.lock().await;
        match credential.as_ref() {
            Some(current) if !current.needs_refresh(Utc::now()) => Ok(current.value.clone()),
            _ => {
                let fresh = self.refresh().await?;
                let value = fresh.value.clone();
                *credential = Some(fresh);
                Ok(value)
            }
        }
    }

    async fn refresh(&self) -> Result<Credential> {
        tracing::debug!("refreshing Copilot session token");
        let auth = HeaderAuth::new()
            .header("authorization", format!("token {}", self.oauth.access_token))
            .header("editor-version", EDITOR_VERSION);
        let raw = http::get_json(&self.client, &self.token_endpoint, &auth).await?;

        match raw.status {
            StatusCode::UNAUTHORIZED => {
                return Err(AgentError::Auth("token expired, please login again".into()));
            }
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                return Err(AgentError::Auth(
                    "token refresh failed, please login again".into(),
                ));
            }
            _ => {}
        }

        let response: TokenResponse = raw.json()?;
        let expires_at = Utc
            .timestamp_opt(response.expires_at, 0)
            .single()
            .ok_or_else(|| {
                AgentError::Provider(format!("invalid token expiry: {}", response.expires_at))
            })?;
        tracing::info!(%expires_at, "Copilot session token refreshed");

        Ok(Credential {
            value: response.token,
            expires_at,
        })
    }
}

/// Location of the login file under a config directory
pub fn token_path(config_dir: &Path) -> PathBuf {
    config_dir.join(TOKEN_FILE)
}

#[async_trait]
impl LlmProvider for CopilotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Output> {
        let token = self.session_token().await?;
        let body = request_body(messages, tools, &self.options);

        // chat calls are rejected without the editor header
        let auth = HeaderAuth::new()
            .header("authorization", format!("Bearer {}", token))
            .header("editor-version", EDITOR_VERSION);

        let output: Output = http::post_json(&self.client, &self.chat_endpoint, &auth, &body)
            .await?
            .json()?;
        output.into_result()
    }
}
