//! Match-token broker.
//!
//! The broker holds the only credential the control plane owns: its own
//! service token, obtained through the OAuth2 client-credentials flow and
//! cached until shortly before expiry. Per-player match tokens pass through
//! verbatim; the broker never decodes a token. Failures surface as the
//! `Failure` variant — brokering a token must never fail a match creation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storm_core::{ControlPlaneConfig, epoch_secs};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Refresh the service credential this many seconds before it expires.
const EXPIRY_SKEW_SECS: u64 = 30;

/// Request fields for a per-player match token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchTokenRequest {
    pub match_id: String,
    pub container_id: String,
    pub player_id: String,
    pub player_name: String,
    pub scopes: Vec<String>,
}

/// A brokered match token, forwarded to the client untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchToken {
    pub token_id: String,
    pub match_id: String,
    pub player_id: String,
    pub token: String,
    pub expires_at: u64,
}

/// Outcome of a token request. Token failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTokenResult {
    Success(MatchToken),
    Failure { status: u16, message: String },
}

impl MatchTokenResult {
    fn unavailable(message: impl Into<String>) -> Self {
        Self::Failure {
            status: 503,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
struct ServiceCredential {
    token: String,
    expires_at: u64,
}

#[derive(Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchTokenResponse {
    token_id: String,
    token: String,
    expires_at: u64,
}

/// Thin client toward the external auth service.
#[derive(Clone)]
pub struct AuthBroker {
    http: reqwest::Client,
    base_url: Option<String>,
    client_id: String,
    client_secret: Option<String>,
    credential: Arc<Mutex<Option<ServiceCredential>>>,
}

impl AuthBroker {
    pub fn new(config: &ControlPlaneConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.http.connect_secs))
            .timeout(Duration::from_secs(config.http.read_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config
                .auth_service_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            client_id: config.auth_client_id.clone(),
            client_secret: config.auth_client_secret.clone(),
            credential: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether remote token validation is configured. Callers consult this
    /// before attempting token acquisition at all.
    pub fn validation_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Broker a match token for a player. Never returns an error: every
    /// failure mode collapses into `MatchTokenResult::Failure`.
    pub async fn issue_match_token(&self, request: MatchTokenRequest) -> MatchTokenResult {
        let Some(base) = &self.base_url else {
            return MatchTokenResult::unavailable("auth service not configured");
        };

        let service_token = match self.service_token(base, false).await {
            Ok(token) => token,
            Err(message) => return MatchTokenResult::unavailable(message),
        };

        match self.post_match_token(base, &service_token, &request).await {
            Ok(result) => result,
            Err(Unauthorized) => {
                // Stale service credential; refresh once and retry.
                debug!("service credential rejected, refreshing");
                let service_token = match self.service_token(base, true).await {
                    Ok(token) => token,
                    Err(message) => return MatchTokenResult::unavailable(message),
                };
                match self.post_match_token(base, &service_token, &request).await {
                    Ok(result) => result,
                    Err(Unauthorized) => MatchTokenResult::Failure {
                        status: 401,
                        message: "auth service rejected the service credential".to_string(),
                    },
                }
            }
        }
    }

    async fn post_match_token(
        &self,
        base: &str,
        service_token: &str,
        request: &MatchTokenRequest,
    ) -> Result<MatchTokenResult, Unauthorized> {
        let url = format!("{base}/match-tokens");
        let response = self
            .http
            .post(&url)
            .bearer_auth(service_token)
            .json(request)
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "auth service unreachable");
                return Ok(MatchTokenResult::unavailable(e.to_string()));
            }
        };
        let status = response.status().as_u16();
        if status == 401 {
            return Err(Unauthorized);
        }
        if status >= 500 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, "auth service error");
            return Ok(MatchTokenResult::unavailable(body));
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Ok(MatchTokenResult::Failure {
                status,
                message: body,
            });
        }
        match response.json::<MatchTokenResponse>().await {
            Ok(body) => Ok(MatchTokenResult::Success(MatchToken {
                token_id: body.token_id,
                match_id: request.match_id.clone(),
                player_id: request.player_id.clone(),
                token: body.token,
                expires_at: body.expires_at,
            })),
            Err(e) => Ok(MatchTokenResult::unavailable(format!(
                "unreadable token response: {e}"
            ))),
        }
    }

    /// Return a live service credential, fetching or refreshing as needed.
    async fn service_token(&self, base: &str, force_refresh: bool) -> Result<String, String> {
        let mut cached = self.credential.lock().await;
        if !force_refresh
            && let Some(cred) = cached.as_ref()
            && cred.expires_at > epoch_secs() + EXPIRY_SKEW_SECS
        {
            return Ok(cred.token.clone());
        }

        let url = format!("{base}/oauth/token");
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!(
                "client-credentials grant failed: {}",
                response.status()
            ));
        }
        let body: OauthTokenResponse = response.json().await.map_err(|e| e.to_string())?;
        let credential = ServiceCredential {
            token: body.access_token.clone(),
            expires_at: epoch_secs() + body.expires_in,
        };
        *cached = Some(credential);
        debug!("service credential refreshed");
        Ok(body.access_token)
    }
}

struct Unauthorized;
