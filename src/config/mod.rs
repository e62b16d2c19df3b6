use crate::error::{AuthError, Result};
use crate::observability::TracingConfig;
use crate::rewrite::HostRewrite;
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Header carrying the verified identity when no override is configured
pub const DEFAULT_IDENTITY_HEADER: &str = "X-authentik-email";

/// Cookie holding the credential when no override is configured
pub const DEFAULT_COOKIE_NAME: &str = "haatc";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardAuthConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Base URL of the service receiving authorized requests
    pub upstream: String,
    /// Authentication middleware configuration
    pub auth: AuthConfig,
    /// OpenTelemetry export (disabled when absent)
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Path serving Prometheus metrics, outside the auth layer
    #[serde(default)]
    pub metrics_path: Option<String>,
}

/// Authentication middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// URL of the external verifier
    #[serde(default)]
    pub verification_endpoint: String,
    /// How the token is presented to the verifier
    #[serde(default)]
    pub verification_method: VerificationMethod,
    /// Upper bound on a single verifier call
    #[serde(default = "default_verification_timeout")]
    pub verification_timeout_secs: u64,
    /// Where the caller's credential is read from
    #[serde(default)]
    pub credential_source: CredentialSource,
    #[serde(default)]
    pub source_host: Option<String>,
    #[serde(default)]
    pub destination_host: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub destination_path: Option<String>,
    /// Identity header name (defaults to `X-authentik-email`)
    #[serde(default)]
    pub destination_header: Option<String>,
    /// Authentication mode
    #[serde(default)]
    pub mode: AuthMode,
    /// Fixed identity for `staticBypass` mode
    #[serde(default)]
    pub email_address: Option<String>,
    /// Accept unparsable host pairs and fail each request with 500 instead
    #[serde(default)]
    pub defer_host_validation: bool,
}

/// Verifier calling convention
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    /// `GET` with `Authorization: Bearer <token>`
    #[default]
    Get,
    /// `POST` with JSON body `{"token": "<token>"}`
    Post,
}

/// Credential source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CredentialSource {
    /// A named cookie
    Cookie {
        #[serde(default = "default_cookie_name")]
        name: String,
    },
    /// `Authorization: Bearer <token>`
    Bearer,
}

impl Default for CredentialSource {
    fn default() -> Self {
        CredentialSource::Cookie {
            name: default_cookie_name(),
        }
    }
}

/// Authentication mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    /// Every request is verified against the verification endpoint
    #[default]
    Verified,
    /// Injects `emailAddress` without any verification. Trusted internal paths only.
    StaticBypass,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_verification_timeout() -> u64 {
    5
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            metrics_path: None,
        }
    }
}

impl AuthConfig {
    /// Verified-mode configuration with defaults for everything but the endpoint
    pub fn new(verification_endpoint: impl Into<String>) -> Self {
        Self {
            verification_endpoint: verification_endpoint.into(),
            verification_method: VerificationMethod::default(),
            verification_timeout_secs: default_verification_timeout(),
            credential_source: CredentialSource::default(),
            source_host: None,
            destination_host: None,
            source_path: None,
            destination_path: None,
            destination_header: None,
            mode: AuthMode::default(),
            email_address: None,
            defer_host_validation: false,
        }
    }

    /// Name of the header the verified identity is written to
    pub fn identity_header(&self) -> &str {
        match self.destination_header.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_IDENTITY_HEADER,
        }
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }

    /// Host rewrite pair, if configured
    pub fn host_pair(&self) -> Result<Option<(&str, &str)>> {
        pair(
            ("sourceHost", self.source_host.as_deref()),
            ("destinationHost", self.destination_host.as_deref()),
        )
    }

    /// Path rewrite pair, if configured
    pub fn path_pair(&self) -> Result<Option<(&str, &str)>> {
        pair(
            ("sourcePath", self.source_path.as_deref()),
            ("destinationPath", self.destination_path.as_deref()),
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.verification_endpoint.trim().is_empty() {
            return Err(AuthError::Config(
                "verificationEndpoint is required".to_string(),
            ));
        }

        let endpoint = Url::parse(&self.verification_endpoint).map_err(|e| {
            AuthError::Config(format!(
                "verificationEndpoint '{}' is not a valid URL: {}",
                self.verification_endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "verificationEndpoint must use http:// or https://, got '{}'",
                self.verification_endpoint
            )));
        }

        if self.verification_timeout_secs == 0 {
            return Err(AuthError::Config(
                "verificationTimeoutSecs must be > 0".to_string(),
            ));
        }

        if let CredentialSource::Cookie { name } = &self.credential_source {
            if name.is_empty() {
                return Err(AuthError::Config(
                    "credentialSource cookie name cannot be empty".to_string(),
                ));
            }
        }

        HeaderName::from_bytes(self.identity_header().as_bytes()).map_err(|_| {
            AuthError::Config(format!(
                "destinationHeader '{}' is not a valid header name",
                self.identity_header()
            ))
        })?;

        if let Some((source, destination)) = self.host_pair()? {
            if !self.defer_host_validation {
                HostRewrite::parse(source, destination)?;
            }
        }
        self.path_pair()?;

        match (self.mode, self.email_address.as_deref()) {
            (AuthMode::StaticBypass, None) | (AuthMode::StaticBypass, Some("")) => {
                Err(AuthError::Config(
                    "mode staticBypass requires emailAddress".to_string(),
                ))
            }
            (AuthMode::Verified, Some(_)) => Err(AuthError::Config(
                "emailAddress is only allowed with mode staticBypass".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A rewrite pair is atomic: both sides present and non-empty, or neither.
fn pair<'a>(
    (source_name, source): (&str, Option<&'a str>),
    (destination_name, destination): (&str, Option<&'a str>),
) -> Result<Option<(&'a str, &'a str)>> {
    match (source, destination) {
        (None, None) => Ok(None),
        (Some(s), Some(d)) if !s.is_empty() && !d.is_empty() => Ok(Some((s, d))),
        _ => Err(AuthError::Config(format!(
            "{} and {} must both be set and non-empty",
            source_name, destination_name
        ))),
    }
}

impl ForwardAuthConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.upstream.starts_with("http://") && !self.upstream.starts_with("https://") {
            return Err(AuthError::Config(format!(
                "upstream must start with http:// or https://, got '{}'",
                self.upstream
            )));
        }

        if self.server.timeout_secs == 0 {
            return Err(AuthError::Config(
                "server timeout_secs must be > 0".to_string(),
            ));
        }

        if let Some(path) = &self.server.metrics_path {
            if !path.starts_with('/') {
                return Err(AuthError::Config(format!(
                    "metrics_path must start with '/', got '{}'",
                    path
                )));
            }
        }

        self.auth.validate()
    }
}
