//! Negotiate response body.

use serde::{Deserialize, Serialize};

/// Body of `GET|POST /{hub}/negotiate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    /// Freshly allocated connection id.
    pub connection_id: String,
    /// Always `0`.
    pub negotiate_version: u32,
    /// Transports the client may pick from.
    pub available_transports: Vec<TransportDescription>,
}

/// One advertised transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescription {
    /// `WebSockets`, `ServerSentEvents`, or `LongPolling`.
    pub transport: String,
    /// `Text` and/or `Binary`.
    pub transfer_formats: Vec<String>,
}

impl TransportDescription {
    /// Build a description from borrowed names.
    pub fn new(transport: &str, transfer_formats: &[&str]) -> Self {
        Self {
            transport: transport.to_owned(),
            transfer_formats: transfer_formats.iter().map(|f| (*f).to_owned()).collect(),
        }
    }
}
