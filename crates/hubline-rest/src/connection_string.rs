//! `Endpoint=<url>;AccessKey=<key>;` parsing.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

use crate::errors::RestError;

static PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"Endpoint=([^;]+);AccessKey=([^;]+);?"));

/// Relay endpoint and signing key.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Base URL of the relay service.
    pub endpoint: Url,
    /// HS256 signing key.
    pub access_key: String,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_key", &"<redacted>")
            .finish()
    }
}

impl ConnectionString {
    /// Parse a connection string.
    ///
    /// The endpoint must be an absolute `http` or `https` URL.
    pub fn parse(raw: &str) -> Result<Self, RestError> {
        let re = PATTERN
            .as_ref()
            .map_err(|e| RestError::InvalidConnectionString(e.to_string()))?;
        let caps = re.captures(raw).ok_or_else(|| {
            RestError::InvalidConnectionString("expected Endpoint=<url>;AccessKey=<key>;".into())
        })?;

        let endpoint = Url::parse(&caps[1])
            .map_err(|e| RestError::InvalidConnectionString(format!("endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(RestError::InvalidConnectionString(format!(
                "unsupported endpoint scheme '{}'",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            access_key: caps[2].to_string(),
        })
    }
}
