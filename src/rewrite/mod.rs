use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use axum::http::{
    header::HOST,
    uri::{Authority, PathAndQuery},
    HeaderValue, Request, Uri,
};
use std::str::FromStr;
use url::Url;

/// Replaces a request authority that exactly matches the source host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRewrite {
    source: String,
    destination: String,
}

impl HostRewrite {
    /// Parse both sides as URLs and keep their `host[:port]`
    pub fn parse(source: &str, destination: &str) -> Result<Self> {
        Self::resolve(source, destination)
            .map_err(|reason| invalid_host_pair(reason, source, destination))
    }

    fn resolve(source: &str, destination: &str) -> std::result::Result<Self, &'static str> {
        let source = url_authority(source).ok_or("Invalid sourceHost")?;
        let destination = url_authority(destination).ok_or("Invalid destinationHost")?;
        Ok(Self {
            source,
            destination,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Destination authority when `authority` is exactly the source host
    pub fn rewrite(&self, authority: &str) -> Option<&str> {
        (authority == self.source).then_some(self.destination.as_str())
    }
}

fn invalid_host_pair(reason: &str, source: &str, destination: &str) -> AuthError {
    AuthError::Config(format!(
        "{} (sourceHost='{}', destinationHost='{}')",
        reason, source, destination
    ))
}

fn url_authority(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Replaces a leading source path with the destination path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    source: String,
    destination: String,
}

impl PathRewrite {
    pub fn new(source: &str, destination: &str) -> Result<Self> {
        if !source.starts_with('/') || !destination.starts_with('/') {
            return Err(AuthError::Config(format!(
                "sourcePath and destinationPath must start with '/' (got '{}' and '{}')",
                source, destination
            )));
        }

        Ok(Self {
            source: source.to_string(),
            destination: destination.to_string(),
        })
    }

    /// Rewritten path, or `None` when the prefix does not match
    pub fn rewrite(&self, path: &str) -> Option<String> {
        path.strip_prefix(self.source.as_str())
            .map(|rest| format!("{}{}", self.destination, rest))
    }
}

/// Host rule as resolved at construction time
#[derive(Debug, Clone)]
enum HostRule {
    Rewrite(HostRewrite),
    /// Deferred parse failure, reported on every request
    Invalid(&'static str),
}

/// What a rewrite pass changed, as `(from, to)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub host: Option<(String, String)>,
    pub path: Option<(String, String)>,
}

/// Host and path rewriting applied to authorized requests
#[derive(Debug, Clone, Default)]
pub struct RewriteRules {
    host: Option<HostRule>,
    path: Option<PathRewrite>,
}

impl RewriteRules {
    /// Build the rules from the middleware configuration
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let host = match config.host_pair()? {
            None => None,
            Some((source, destination)) => match HostRewrite::resolve(source, destination) {
                Ok(rule) => Some(HostRule::Rewrite(rule)),
                Err(reason) if config.defer_host_validation => Some(HostRule::Invalid(reason)),
                Err(reason) => return Err(invalid_host_pair(reason, source, destination)),
            },
        };

        let path = match config.path_pair()? {
            None => None,
            Some((source, destination)) => Some(PathRewrite::new(source, destination)?),
        };

        Ok(Self { host, path })
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.path.is_none()
    }

    /// Rewrite the request's authority and path in place
    pub fn apply<B>(&self, req: &mut Request<B>) -> Result<RewriteOutcome> {
        let new_authority = match &self.host {
            None => None,
            Some(HostRule::Invalid(reason)) => {
                return Err(AuthError::Misconfigured((*reason).to_string()))
            }
            Some(HostRule::Rewrite(rule)) => request_authority(req).and_then(|authority| {
                rule.rewrite(&authority)
                    .map(|destination| (authority.clone(), destination.to_string()))
            }),
        };

        let new_path = self.path.as_ref().and_then(|rule| {
            let path = req.uri().path();
            rule.rewrite(path).map(|rewritten| (path.to_string(), rewritten))
        });

        if let Some((_, destination)) = &new_authority {
            let value = HeaderValue::from_str(destination)
                .map_err(|e| AuthError::Internal(format!("Invalid host header value: {}", e)))?;
            req.headers_mut().insert(HOST, value);
        }

        let uri_authority = new_authority
            .as_ref()
            .filter(|_| req.uri().authority().is_some())
            .map(|(_, destination)| destination.as_str());
        let uri_path = new_path.as_ref().map(|(_, rewritten)| rewritten.as_str());
        if uri_authority.is_some() || uri_path.is_some() {
            *req.uri_mut() = replace_uri(req.uri(), uri_authority, uri_path)?;
        }

        Ok(RewriteOutcome {
            host: new_authority,
            path: new_path,
        })
    }
}

/// Authority the client addressed: the `Host` header, else the URI authority
pub fn request_authority<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
}

fn replace_uri(uri: &Uri, authority: Option<&str>, path: Option<&str>) -> Result<Uri> {
    let mut parts = uri.clone().into_parts();

    if let Some(authority) = authority {
        parts.authority = Some(
            Authority::from_str(authority)
                .map_err(|e| AuthError::Internal(format!("Invalid authority: {}", e)))?,
        );
    }

    if let Some(path) = path {
        let path_and_query = match uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        };
        parts.path_and_query = Some(
            PathAndQuery::from_str(&path_and_query)
                .map_err(|e| AuthError::Internal(format!("Invalid rewritten path: {}", e)))?,
        );
    }

    Uri::from_parts(parts).map_err(|e| AuthError::Internal(format!("Invalid rewritten URI: {}", e)))
}
