//! Legacy stack service session.
//!
//! A thin REST client covering only what migration needs from the legacy
//! stack-management service: authenticate, list stacks, delete a stack and
//! log out. The service may still be booting when migration starts, so
//! connecting first probes liveness a bounded number of times. Individual
//! stack calls are never retried.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use addon_common::config::AddonConfig;
use addon_common::naming::normalize_stack_name;
use addon_common::{AddonError, AddonResult};

use crate::credentials::AdminCredentials;
use crate::token::{decode_expiry, TokenEvent, TokenState};

/// Opens sessions against the legacy service.
#[async_trait]
pub trait LegacyConnector: Send + Sync {
    /// Probes the service, authenticates and returns a session.
    async fn connect(&self) -> AddonResult<Box<dyn LegacySession>>;
}

/// An authenticated legacy service session.
#[async_trait]
pub trait LegacySession: Send {
    /// Deletes the stack whose normalized name matches `name`.
    ///
    /// Returns [`AddonError::StackNotFound`] if no stack matches.
    async fn delete_stack(&mut self, name: &str) -> AddonResult<()>;

    /// Ends the session.
    async fn logout(&mut self) -> AddonResult<()>;
}

/// Connection settings for the legacy service.
#[derive(Debug, Clone)]
pub struct LegacyClientSettings {
    /// API base URL (e.g., `http://127.0.0.1:9000/api`).
    pub base_url: String,
    /// Endpoint id the add-on stacks belong to.
    pub endpoint_id: u64,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Liveness probe attempts.
    pub probe_attempts: u32,
    /// Delay between probe attempts.
    pub probe_delay: Duration,
    /// Re-authenticate when the token expires within this window.
    pub refresh_window: Duration,
    /// Administrator credential file.
    pub credentials_file: PathBuf,
}

impl From<&AddonConfig> for LegacyClientSettings {
    fn from(config: &AddonConfig) -> Self {
        Self {
            base_url: config.legacy.base_url(),
            endpoint_id: config.legacy.endpoint_id,
            request_timeout: config.legacy.request_timeout(),
            probe_attempts: config.legacy.probe_attempts,
            probe_delay: config.legacy.probe_delay(),
            refresh_window: config.legacy.token_refresh_window(),
            credentials_file: config.paths.credentials_file.clone(),
        }
    }
}

/// Stack record as listed by the legacy service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyStack {
    /// Numeric stack id.
    pub id: u64,
    /// Stack name.
    pub name: String,
    /// Endpoint the stack is deployed on.
    #[serde(default)]
    pub endpoint_id: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    jwt: String,
}

/// Connector for the real legacy REST service.
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    settings: LegacyClientSettings,
}

impl RemoteConnector {
    /// Creates a connector.
    pub fn new(settings: LegacyClientSettings) -> Self {
        Self { settings }
    }

    /// Opens a concrete session (see [`LegacyConnector::connect`]).
    pub async fn open(&self) -> AddonResult<RemoteSession> {
        let http = reqwest::Client::builder()
            .timeout(self.settings.request_timeout)
            .build()
            .map_err(|e| AddonError::internal(format!("failed to build HTTP client: {}", e)))?;

        probe_liveness(&http, &self.settings).await?;

        let credentials = AdminCredentials::load(&self.settings.credentials_file)?;
        let mut session = RemoteSession {
            http,
            settings: self.settings.clone(),
            credentials,
            token: TokenState::Unauthenticated,
        };
        session.authenticate().await?;

        Ok(session)
    }
}

#[async_trait]
impl LegacyConnector for RemoteConnector {
    async fn connect(&self) -> AddonResult<Box<dyn LegacySession>> {
        Ok(Box::new(self.open().await?))
    }
}

/// Probes `GET /status` until it answers or attempts run out.
async fn probe_liveness(
    http: &reqwest::Client,
    settings: &LegacyClientSettings,
) -> AddonResult<()> {
    let url = format!("{}/status", settings.base_url);
    let mut last_error = String::new();

    for attempt in 1..=settings.probe_attempts {
        match http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(attempt, "Legacy service is alive");
                return Ok(());
            }
            Ok(resp) => last_error = format!("status {}", resp.status()),
            Err(e) => last_error = e.to_string(),
        }

        warn!(
            attempt,
            max_attempts = settings.probe_attempts,
            error = %last_error,
            "Legacy service not available yet"
        );
        if attempt < settings.probe_attempts {
            tokio::time::sleep(settings.probe_delay).await;
        }
    }

    Err(AddonError::ServiceUnavailable {
        endpoint: url,
        attempts: settings.probe_attempts,
        message: last_error,
    })
}

/// Authenticated session against the legacy REST service.
pub struct RemoteSession {
    http: reqwest::Client,
    settings: LegacyClientSettings,
    credentials: AdminCredentials,
    token: TokenState,
}

impl RemoteSession {
    /// Returns the current token state.
    pub fn token_state(&self) -> &TokenState {
        &self.token
    }

    /// `POST /auth`: obtains a fresh bearer token.
    async fn authenticate(&mut self) -> AddonResult<()> {
        let resp = self
            .http
            .post(format!("{}/auth", self.settings.base_url))
            .json(&AuthRequest {
                username: &self.credentials.username,
                password: &self.credentials.password,
            })
            .send()
            .await
            .map_err(|e| AddonError::auth(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AddonError::auth(format!("status {}: {}", status, body)));
        }

        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| AddonError::auth(format!("invalid response: {}", e)))?;
        let expires_at = decode_expiry(&auth.jwt)?;

        info!(user = %self.credentials.username, %expires_at, "Authenticated with legacy service");
        self.token = std::mem::replace(&mut self.token, TokenState::Unauthenticated).transition(
            TokenEvent::Authenticated {
                token: auth.jwt,
                expires_at,
            },
        );
        Ok(())
    }

    /// Returns a token safe to send, re-authenticating if it is near expiry.
    async fn bearer(&mut self) -> AddonResult<String> {
        let refresh_window = chrono::Duration::from_std(self.settings.refresh_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.token = std::mem::replace(&mut self.token, TokenState::Unauthenticated).transition(
            TokenEvent::Check {
                now: Utc::now(),
                refresh_window,
            },
        );

        if self.token.needs_authentication() {
            debug!(state = state_name(&self.token), "Refreshing legacy service token");
            self.authenticate().await?;
        }

        self.token
            .usable_token()
            .map(str::to_string)
            .ok_or_else(|| AddonError::auth("no token issued"))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        req: reqwest::RequestBuilder,
    ) -> AddonResult<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| AddonError::remote(operation, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AddonError::remote(
                operation,
                format!("status {}: {}", status, body),
            ));
        }
        resp.json()
            .await
            .map_err(|e| AddonError::remote(operation, e.to_string()))
    }

    /// `GET /stacks?filters={"EndpointID":n}`
    pub async fn list_stacks(&mut self) -> AddonResult<Vec<LegacyStack>> {
        let token = self.bearer().await?;
        let filters = serde_json::json!({ "EndpointID": self.settings.endpoint_id }).to_string();
        let req = self
            .http
            .get(format!("{}/stacks", self.settings.base_url))
            .bearer_auth(token)
            .query(&[("filters", filters)]);
        self.send_json("list stacks", req).await
    }

    /// Finds the stack whose normalized name matches `name`.
    pub async fn find_stack(&mut self, name: &str) -> AddonResult<Option<LegacyStack>> {
        let wanted = normalize_stack_name(name);
        let stacks = self.list_stacks().await?;
        Ok(stacks
            .into_iter()
            .find(|s| normalize_stack_name(&s.name) == wanted))
    }

    /// `DELETE /stacks/{id}?endpointId=n`
    async fn delete_stack_by_id(&mut self, name: &str, id: u64) -> AddonResult<()> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .delete(format!("{}/stacks/{}", self.settings.base_url, id))
            .bearer_auth(token)
            .query(&[("endpointId", self.settings.endpoint_id)])
            .send()
            .await
            .map_err(|e| AddonError::remote("delete stack", e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AddonError::stack_not_found(name));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AddonError::remote(
                "delete stack",
                format!("stack {} ({}): status {}: {}", name, id, status, body),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LegacySession for RemoteSession {
    #[instrument(skip(self))]
    async fn delete_stack(&mut self, name: &str) -> AddonResult<()> {
        let stack = self
            .find_stack(name)
            .await?
            .ok_or_else(|| AddonError::stack_not_found(name))?;

        self.delete_stack_by_id(name, stack.id).await?;
        info!(stack = %stack.name, id = stack.id, "Deleted legacy stack");
        Ok(())
    }

    /// `POST /auth/logout`
    async fn logout(&mut self) -> AddonResult<()> {
        // An expired token is already rejected by the service; there is
        // nothing left to revoke.
        let Some(token) = self.token.any_token().map(str::to_string) else {
            self.token = TokenState::Unauthenticated;
            return Ok(());
        };
        self.token = std::mem::replace(&mut self.token, TokenState::Unauthenticated)
            .transition(TokenEvent::LoggedOut);

        let resp = self
            .http
            .post(format!("{}/auth/logout", self.settings.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AddonError::remote("logout", e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AddonError::remote(
                "logout",
                format!("status {}", resp.status()),
            ));
        }
        debug!("Logged out of legacy service");
        Ok(())
    }
}

fn state_name(state: &TokenState) -> &'static str {
    match state {
        TokenState::Unauthenticated => "unauthenticated",
        TokenState::Valid { .. } => "valid",
        TokenState::NearExpiry { .. } => "near-expiry",
        TokenState::Expired => "expired",
    }
}
