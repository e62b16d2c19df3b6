use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type for forward-auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Forward-auth error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: Missing Bearer Token")]
    MissingCredentials,

    #[error("verification failed with status code {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("email not found in verification response")]
    MissingEmail,

    #[error("verification request failed: {0}")]
    VerifierUnavailable(String),

    #[error("verification request timed out: {0}")]
    VerifierTimeout(String),

    #[error("failed to decode response: {0}")]
    MalformedResponse(String),

    #[error("Internal Server Error: {0}")]
    Misconfigured(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::MissingCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Rejected { .. } => StatusCode::UNAUTHORIZED,
            AuthError::MissingEmail => StatusCode::UNAUTHORIZED,
            AuthError::VerifierUnavailable(_) => StatusCode::UNAUTHORIZED,
            AuthError::VerifierTimeout(_) => StatusCode::UNAUTHORIZED,
            AuthError::MalformedResponse(_) => StatusCode::UNAUTHORIZED,
            AuthError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Proxy(_) => StatusCode::BAD_GATEWAY,
            AuthError::Backend(_) => StatusCode::BAD_GATEWAY,
            AuthError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the verifier itself misbehaved, as opposed to rejecting the credential.
    ///
    /// Callers see 401 either way; logs and metrics keep the two apart.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            AuthError::VerifierUnavailable(_)
                | AuthError::VerifierTimeout(_)
                | AuthError::MalformedResponse(_)
        )
    }

    /// Short, low-cardinality label used for metrics and events
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Config(_) => "config",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::Rejected { .. } => "rejected",
            AuthError::MissingEmail => "missing_email",
            AuthError::VerifierUnavailable(_) => "verifier_unavailable",
            AuthError::VerifierTimeout(_) => "verifier_timeout",
            AuthError::MalformedResponse(_) => "malformed_response",
            AuthError::Misconfigured(_) => "misconfigured",
            AuthError::Proxy(_) => "proxy",
            AuthError::Backend(_) => "backend",
            AuthError::Timeout(_) => "timeout",
            AuthError::Internal(_) => "internal",
            AuthError::Io(_) => "io",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
