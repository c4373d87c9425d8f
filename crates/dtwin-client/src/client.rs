//! Service connection settings and the shared REST client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::auth::{AuthError, TokenCredential, DIGITAL_TWINS_SCOPE};

pub const DEFAULT_ENDPOINT: &str = "https://dgtwiniothack.api.weu.digitaltwins.azure.net";
pub const DEFAULT_API_VERSION: &str = "2023-10-31";

/// Errors from service calls.
#[derive(Debug, thiserror::Error)]
pub enum TwinsError {
    /// The service answered with a non-success status.
    #[error("{status}: {message}")]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid paging link: {0}")]
    Url(#[from] url::ParseError),

    #[error("Paging link points outside the service endpoint: {0}")]
    ForeignLink(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl TwinsError {
    /// Build a service error from a failed response body.
    ///
    /// The service answers `{"error": {"code": ..., "message": ...}}`; any
    /// other body is carried as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => TwinsError::Service {
                status,
                message: envelope
                    .error
                    .message
                    .or_else(|| envelope.error.code.clone())
                    .unwrap_or_default(),
                code: envelope.error.code,
            },
            Err(_) => TwinsError::Service {
                status,
                code: None,
                message: body.chars().take(500).collect(),
            },
        }
    }

    /// HTTP status of the failed call, or 0 when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            TwinsError::Service { status, .. } => *status,
            TwinsError::Transport(e) => e.status().map(|s| s.as_u16()).unwrap_or(0),
            _ => 0,
        }
    }

    /// The message part of `{status}: {message}`.
    pub fn message(&self) -> String {
        match self {
            TwinsError::Service { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == 404
    }
}

/// Connection settings, loaded from the `[service]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TwinsConfig {
    /// Instance URL, e.g. `https://<name>.api.<region>.digitaltwins.azure.net`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TwinsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TwinsConfig {
    /// HTTP client with this configuration's timeout, shared by the
    /// service client and the credential.
    pub fn http_client(&self) -> Result<reqwest::Client, TwinsError> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

/// Authenticated client for one digital twins instance.
///
/// Clone is cheap (inner Arcs).
#[derive(Clone)]
pub struct DigitalTwinsClient {
    pub(crate) http: reqwest::Client,
    endpoint: Url,
    api_version: String,
    credential: Arc<dyn TokenCredential>,
}

impl DigitalTwinsClient {
    /// Create a client for the configured instance.
    pub fn new(
        config: &TwinsConfig,
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, TwinsError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| TwinsError::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;
        if !matches!(endpoint.scheme(), "https" | "http") || endpoint.cannot_be_a_base() {
            return Err(TwinsError::InvalidEndpoint(format!(
                "{}: expected an http(s) base URL",
                config.endpoint
            )));
        }

        tracing::info!(endpoint = %endpoint, api_version = %config.api_version, "Digital twins client created");
        Ok(Self {
            http,
            endpoint,
            api_version: config.api_version.clone(),
            credential,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build a request URL from raw path segments; each segment is
    /// percent-encoded on its own.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, TwinsError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| TwinsError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// Authenticate and send a request; non-success statuses become
    /// [`TwinsError::Service`].
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, TwinsError> {
        let token = self.credential.get_token(DIGITAL_TWINS_SCOPE).await?;
        let response = request.bearer_auth(token.secret()).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = TwinsError::from_response(status.as_u16(), &body);
        tracing::debug!(status = status.as_u16(), error = %err, "Service call failed");
        Err(err)
    }

    /// Send a request and deserialize the JSON response body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, TwinsError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenCredential;

    fn client(endpoint: &str) -> Result<DigitalTwinsClient, TwinsError> {
        let config = TwinsConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        };
        DigitalTwinsClient::new(
            &config,
            reqwest::Client::new(),
            Arc::new(StaticTokenCredential::new("token")),
        )
    }

    #[test]
    fn url_encodes_each_segment() {
        let client = client("https://example.api.weu.digitaltwins.azure.net").unwrap();
        let url = client
            .url(&["digitaltwins", "sampleTwin-0", "relationships", "sampleTwin-0-contains->sampleTwin-1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.api.weu.digitaltwins.azure.net/digitaltwins/sampleTwin-0/relationships/sampleTwin-0-contains-%3EsampleTwin-1?api-version=2023-10-31"
        );
    }

    #[test]
    fn url_keeps_slash_inside_segment_encoded() {
        let client = client("https://example.digitaltwins.azure.net/").unwrap();
        let url = client.url(&["models", "a/b"]).unwrap();
        assert_eq!(url.path(), "/models/a%2Fb");
    }

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(matches!(
            client("mailto:twins@example.com"),
            Err(TwinsError::InvalidEndpoint(_))
        ));
        assert!(matches!(client("not a url"), Err(TwinsError::InvalidEndpoint(_))));
    }

    #[test]
    fn service_error_parses_envelope() {
        let err = TwinsError::from_response(
            404,
            r#"{"error":{"code":"ModelNotFound","message":"There is no Model(s) available that matches the provided id(s)."}}"#,
        );
        assert!(err.is_not_found());
        assert_eq!(err.status(), 404);
        assert_eq!(
            err.message(),
            "There is no Model(s) available that matches the provided id(s)."
        );
        match err {
            TwinsError::Service { code, .. } => assert_eq!(code.as_deref(), Some("ModelNotFound")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn service_error_falls_back_to_body() {
        let err = TwinsError::from_response(503, "Service Unavailable");
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "503: Service Unavailable");
    }

    #[test]
    fn non_service_errors_have_no_status() {
        let err = TwinsError::Auth(AuthError::DeviceCodeExpired);
        assert_eq!(err.status(), 0);
        assert!(!err.is_not_found());
        assert!(err.message().contains("Device code expired"));
    }

    #[test]
    fn default_config() {
        let config = TwinsConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.api_version, "2023-10-31");
        assert_eq!(config.timeout_secs, 30);
    }
}
