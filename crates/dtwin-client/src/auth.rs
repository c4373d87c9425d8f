//! Bearer-token credentials for the digital twins data plane.
//!
//! Tokens come from the tenant's OAuth2 endpoints (device-code sign-in or
//! client credentials) or are supplied pre-acquired. OAuth credentials cache
//! their token and refresh it shortly before expiry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

/// OAuth2 scope for the digital twins data plane.
pub const DIGITAL_TWINS_SCOPE: &str = "https://digitaltwins.azure.net/.default";

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Public client id of the Azure CLI, pre-consented for device-code sign-in.
pub const DEFAULT_PUBLIC_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Tokens with less than this much validity left are refreshed.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Errors from acquiring a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Token endpoint rejected the request: {error}: {description}")]
    Rejected { error: String, description: String },

    #[error("Device code expired before sign-in completed")]
    DeviceCodeExpired,

    #[error("Invalid credential configuration: {0}")]
    Config(String),
}

/// A bearer token and its expiry. `Debug` never prints the secret.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether the token is still usable at `now` with the refresh margin applied.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for a scope.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError>;
}

// ── Configuration ─────────────────────────────────────────────────

/// Which credential flow to use.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Interactive sign-in on another device (the CLI's browser flow).
    #[default]
    DeviceCode,
    /// Service principal with a client secret.
    ClientSecret,
    /// Pre-acquired bearer token.
    Token,
}

/// Credential settings, loaded from the `[auth]` section.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,

    /// Directory (tenant) id or a tenant alias such as `organizations`.
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_authority_host")]
    pub authority_host: String,
}

fn default_tenant_id() -> String {
    "organizations".to_string()
}

fn default_client_id() -> String {
    DEFAULT_PUBLIC_CLIENT_ID.to_string()
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::default(),
            tenant_id: default_tenant_id(),
            client_id: default_client_id(),
            client_secret: None,
            token: None,
            authority_host: default_authority_host(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("method", &self.method)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

impl AuthConfig {
    /// Build the configured credential, sharing `http` for token requests.
    pub fn build_credential(
        &self,
        http: reqwest::Client,
    ) -> Result<Arc<dyn TokenCredential>, AuthError> {
        let endpoints = TenantEndpoints::new(&self.authority_host, &self.tenant_id);
        match self.method {
            AuthMethod::DeviceCode => Ok(Arc::new(DeviceCodeCredential::new(
                http,
                endpoints,
                self.client_id.clone(),
            ))),
            AuthMethod::ClientSecret => {
                let secret = self.client_secret.clone().ok_or_else(|| {
                    AuthError::Config("auth.client_secret is required for client_secret".into())
                })?;
                Ok(Arc::new(ClientSecretCredential::new(
                    http,
                    endpoints,
                    self.client_id.clone(),
                    secret,
                )))
            }
            AuthMethod::Token => {
                let token = self
                    .token
                    .clone()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| AuthError::Config("auth.token is required for token".into()))?;
                Ok(Arc::new(StaticTokenCredential::new(token)))
            }
        }
    }
}

// ── Shared OAuth plumbing ─────────────────────────────────────────

/// OAuth2 v2.0 endpoints of one tenant.
#[derive(Debug, Clone)]
pub struct TenantEndpoints {
    base: String,
}

impl TenantEndpoints {
    pub fn new(authority_host: &str, tenant_id: &str) -> Self {
        Self {
            base: format!(
                "{}/{}/oauth2/v2.0",
                authority_host.trim_end_matches('/'),
                tenant_id
            ),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base)
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/devicecode", self.base)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl TokenResponse {
    fn into_token(self) -> Result<AccessToken, AuthError> {
        let expires_at = TimeDelta::try_seconds(self.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| invalid_expiry(self.expires_in))?;
        Ok(AccessToken::new(self.access_token, expires_at))
    }
}

fn invalid_expiry(expires_in: impl fmt::Display) -> AuthError {
    AuthError::Rejected {
        error: "invalid_expires_in".into(),
        description: format!("expires_in {expires_in} is out of range"),
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

impl From<TokenErrorResponse> for AuthError {
    fn from(e: TokenErrorResponse) -> Self {
        AuthError::Rejected {
            error: e.error,
            description: e.error_description,
        }
    }
}

/// Read a token endpoint response: the token on success, the OAuth error otherwise.
async fn read_token_response(
    response: reqwest::Response,
) -> Result<Result<TokenResponse, TokenErrorResponse>, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(Ok(response.json::<TokenResponse>().await?));
    }
    let body = response.text().await.unwrap_or_default();
    Ok(Err(parse_token_error(status.as_u16(), &body)))
}

fn parse_token_error(status: u16, body: &str) -> TokenErrorResponse {
    serde_json::from_str(body).unwrap_or_else(|_| TokenErrorResponse {
        error: format!("http_{status}"),
        error_description: body.chars().take(500).collect(),
    })
}

/// Cached token guarded for concurrent readers.
#[derive(Default)]
struct TokenCache {
    token: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    async fn fresh(&self) -> Option<AccessToken> {
        let token = self.token.read().await;
        token.as_ref().filter(|t| t.is_fresh(Utc::now())).cloned()
    }

    async fn store(&self, token: AccessToken) {
        *self.token.write().await = Some(token);
    }
}

// ── Static token ──────────────────────────────────────────────────

/// A token acquired elsewhere (e.g. `az account get-access-token`).
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret, DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

// ── Client credentials ────────────────────────────────────────────

/// OAuth2 client-credentials grant for a service principal.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    endpoints: TenantEndpoints,
    client_id: String,
    client_secret: String,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        endpoints: TenantEndpoints,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            endpoints,
            client_id,
            client_secret,
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.cache.fresh().await {
            return Ok(token);
        }

        tracing::info!(client_id = %self.client_id, "Requesting client-credentials token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let response = self
            .http
            .post(self.endpoints.token_url())
            .form(&params)
            .send()
            .await?;

        let token = read_token_response(response).await??.into_token()?;
        self.cache.store(token.clone()).await;
        Ok(token)
    }
}

// ── Device code ───────────────────────────────────────────────────

/// Device authorization response: what the user must do to sign in.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    /// Human-readable sign-in instructions from the identity provider.
    pub message: String,
}

fn default_poll_interval() -> u64 {
    5
}

/// What to do after a pending token poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollStep {
    Wait,
    SlowDown,
    Expired,
    Fail,
}

/// When a device code with `expires_in` seconds of validity stops being usable.
fn poll_deadline(expires_in: u64) -> Result<tokio::time::Instant, AuthError> {
    tokio::time::Instant::now()
        .checked_add(Duration::from_secs(expires_in))
        .ok_or_else(|| invalid_expiry(expires_in))
}

fn classify_poll_error(error: &str) -> PollStep {
    match error {
        "authorization_pending" => PollStep::Wait,
        "slow_down" => PollStep::SlowDown,
        "expired_token" | "code_expired" => PollStep::Expired,
        _ => PollStep::Fail,
    }
}

type Prompt = Box<dyn Fn(&DeviceCode) + Send + Sync>;

/// Device authorization grant: the user signs in from a browser on any
/// device while this process polls for the token.
pub struct DeviceCodeCredential {
    http: reqwest::Client,
    endpoints: TenantEndpoints,
    client_id: String,
    prompt: Prompt,
    cache: TokenCache,
}

impl DeviceCodeCredential {
    pub fn new(http: reqwest::Client, endpoints: TenantEndpoints, client_id: String) -> Self {
        Self {
            http,
            endpoints,
            client_id,
            prompt: Box::new(|code: &DeviceCode| println!("{}", code.message)),
            cache: TokenCache::default(),
        }
    }

    /// Replace how sign-in instructions are shown.
    pub fn with_prompt(mut self, prompt: impl Fn(&DeviceCode) + Send + Sync + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    async fn request_device_code(&self, scope: &str) -> Result<DeviceCode, AuthError> {
        let params = [("client_id", self.client_id.as_str()), ("scope", scope)];
        let response = self
            .http
            .post(self.endpoints.device_code_url())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_token_error(status.as_u16(), &body).into());
        }
        Ok(response.json::<DeviceCode>().await?)
    }

    async fn poll_for_token(&self, code: &DeviceCode) -> Result<AccessToken, AuthError> {
        let deadline = poll_deadline(code.expires_in)?;
        let mut interval = code.interval.max(1);

        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::DeviceCodeExpired);
            }

            let params = [
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.client_id.as_str()),
                ("device_code", code.device_code.as_str()),
            ];
            let response = self
                .http
                .post(self.endpoints.token_url())
                .form(&params)
                .send()
                .await?;

            match read_token_response(response).await? {
                Ok(token) => return token.into_token(),
                Err(e) => match classify_poll_error(&e.error) {
                    PollStep::Wait => {}
                    PollStep::SlowDown => {
                        interval += 5;
                        tracing::debug!(interval, "Token endpoint asked to slow down");
                    }
                    PollStep::Expired => return Err(AuthError::DeviceCodeExpired),
                    PollStep::Fail => return Err(e.into()),
                },
            }
        }
    }
}

#[async_trait]
impl TokenCredential for DeviceCodeCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.cache.fresh().await {
            return Ok(token);
        }

        let code = self.request_device_code(scope).await?;
        tracing::info!(
            verification_uri = %code.verification_uri,
            expires_in = code.expires_in,
            "Waiting for device-code sign-in"
        );
        (self.prompt)(&code);

        let token = self.poll_for_token(&code).await?;
        tracing::info!("Device-code sign-in completed");
        self.cache.store(token.clone()).await;
        Ok(token)
    }
}
