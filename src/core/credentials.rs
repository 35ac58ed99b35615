//! Ephemeral credential acquisition.
//!
//! The client never holds the long-lived vendor API key. Before each
//! connection it asks a backend to mint a short-lived credential; the
//! backend's `GET /api/session` response carries it under
//! `client_secret.value` alongside the session id and model.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::SessionError;

/// Default time allowed for the mint round trip.
const MINT_TIMEOUT: Duration = Duration::from_secs(10);

/// A minted short-lived credential.
#[derive(Debug, Clone)]
pub struct EphemeralCredential {
    /// Bearer value presented to the vendor
    pub value: String,
    /// Expiry as a unix timestamp, when the backend reports one
    pub expires_at: Option<u64>,
    /// Vendor session id, when the backend reports one
    pub session_id: Option<String>,
    /// Model the credential is scoped to
    pub model: Option<String>,
}

/// Something that can mint an ephemeral credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Mint a fresh credential. Each connection attempt mints anew;
    /// credentials are never cached across attempts.
    async fn mint(&self) -> Result<EphemeralCredential, SessionError>;
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

/// Credential provider backed by the minting backend's session endpoint.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpCredentialProvider {
    /// Provider for `endpoint` (e.g. `http://localhost:3001/api/session`).
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        HttpCredentialProvider {
            client,
            endpoint: endpoint.into(),
            timeout: MINT_TIMEOUT,
        }
    }

    /// Override the mint timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn mint(&self) -> Result<EphemeralCredential, SessionError> {
        let response = self
            .client
            .get(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::Timeout("credential mint".to_string())
                } else {
                    SessionError::Credential(format!("mint request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Credential(format!(
                "mint returned {status}: {body}"
            )));
        }

        let mint: MintResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Credential(format!("malformed mint response: {e}")))?;

        debug!(session_id = ?mint.id, "ephemeral credential minted");

        Ok(EphemeralCredential {
            value: mint.client_secret.value,
            expires_at: mint.client_secret.expires_at,
            session_id: mint.id,
            model: mint.model,
        })
    }
}
