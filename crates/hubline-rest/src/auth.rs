//! Access token signing.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::errors::RestError;

/// Token lifetime in seconds.
pub const TOKEN_TTL_SECS: i64 = 3600;

/// Claims carried by every request token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Request URL without its query string.
    pub aud: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// The audience for `url`: everything before the first `?`.
pub fn audience(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// Sign an HS256 token for a request to `url`.
pub fn sign(url: &str, access_key: &str) -> Result<String, RestError> {
    let claims = Claims {
        aud: audience(url).to_string(),
        exp: (Utc::now() + Duration::seconds(TOKEN_TTL_SECS)).timestamp(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(access_key.as_bytes()),
    )?;
    Ok(token)
}
