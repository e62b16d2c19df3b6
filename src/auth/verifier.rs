use crate::config::VerificationMethod;
use crate::error::{AuthError, Result};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for the external verification endpoint
#[derive(Clone, Debug)]
pub struct HttpVerifier {
    client: reqwest::Client,
    endpoint: String,
    method: VerificationMethod,
}

#[derive(Serialize)]
struct VerificationRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerificationResponse {
    #[serde(default)]
    email: Option<String>,
}

impl HttpVerifier {
    /// Build a verifier with its own pooled client bounded by `timeout`
    pub fn new(endpoint: &str, method: VerificationMethod, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            method,
        })
    }

    /// Exchange a token for the email address the verifier associates with it
    pub async fn verify(&self, token: &SecretString) -> Result<String> {
        let request = match self.method {
            VerificationMethod::Get => self
                .client
                .get(&self.endpoint)
                .bearer_auth(token.expose_secret()),
            VerificationMethod::Post => self.client.post(&self.endpoint).json(&VerificationRequest {
                token: token.expose_secret(),
            }),
        };

        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.map_err(transport_error)?;
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let payload: VerificationResponse = serde_json::from_slice(&body)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        payload
            .email
            .filter(|email| !email.is_empty())
            .ok_or(AuthError::MissingEmail)
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::VerifierTimeout(e.to_string())
    } else {
        AuthError::VerifierUnavailable(e.to_string())
    }
}
