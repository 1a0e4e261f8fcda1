//! Authenticated brokerage session: token acquisition and low-level HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::{ApiKeyAuthRequest, AuthTokenResponse, CredentialAuthRequest};

pub const DEFAULT_API_BASE: &str = "https://api.tradovate.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How a session proves its identity to the brokerage.
///
/// One session capability, three constructors; everything past
/// authentication is identical across the variants.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Pre-issued API key, exchanged for a bearer token.
    ApiKey(String),
    /// Bearer token issued out of band; no exchange needed.
    AccessToken(String),
    /// Username/password credential exchange.
    Credentials { name: String, password: String },
}

/// Connection settings for one brokerage session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub auth: AuthMethod,
}

impl SessionConfig {
    pub fn new(auth: AuthMethod) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            auth,
        }
    }

    /// Custom base URL (for testing or alternate environments).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Token exchange failure. Fatal to `start`; surfaced as a message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct AuthError(String);

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One authenticated connection to the brokerage API.
///
/// Created once at engine start and held exclusively by one client for the
/// engine's lifetime. The token lives behind a lock so domain operations
/// can share the session by reference.
pub struct BrokerSession {
    client: Client,
    base_url: String,
    auth: AuthMethod,
    access_token: RwLock<Option<String>>,
}

impl BrokerSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url,
            auth: config.auth,
            access_token: RwLock::new(None),
        })
    }

    /// Exchange the configured credentials for a bearer token, or adopt a
    /// pre-issued one. Network faults and non-2xx responses come back as
    /// `AuthError`, never as a panic or an untyped error.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        match self.auth.clone() {
            AuthMethod::AccessToken(token) => {
                *self.access_token.write().await = Some(token);
                Ok(())
            }
            AuthMethod::ApiKey(key) => {
                let body = ApiKeyAuthRequest {
                    authorization_token: &key,
                };
                self.exchange("/authenticate", &body).await
            }
            AuthMethod::Credentials { name, password } => {
                let body = CredentialAuthRequest {
                    name: &name,
                    password: &password,
                };
                self.exchange("/auth/accesstokenrequest", &body).await
            }
        }
    }

    async fn exchange<B: Serialize>(&self, path: &str, body: &B) -> Result<(), AuthError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Requesting access token");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::new(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::new(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let parsed: AuthTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::new(format!("unreadable token response: {e}")))?;

        match parsed.access_token {
            Some(token) if !token.is_empty() => {
                *self.access_token.write().await = Some(token);
                Ok(())
            }
            _ => Err(AuthError::new("response carried no access token")),
        }
    }

    async fn bearer(&self) -> String {
        self.access_token.read().await.clone().unwrap_or_default()
    }

    /// Authenticated GET against a path relative to the base URL.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .get(&url)
            .bearer_auth(self.bearer().await)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))
    }

    /// Authenticated JSON POST against a path relative to the base URL.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .post(&url)
            .bearer_auth(self.bearer().await)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))
    }
}
