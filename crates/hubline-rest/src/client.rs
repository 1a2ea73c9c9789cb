//! Relay REST client.

use std::time::Duration;

use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::auth;
use crate::connection_string::ConnectionString;
use crate::errors::RestError;

/// Message body for the send endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    /// Client-side method to invoke.
    pub target: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
}

/// Pushes messages to clients of one hub through the relay service.
///
/// Each request carries a fresh bearer token signed with the access key.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    connection: ConnectionString,
    hub: String,
}

impl RelayClient {
    /// Build a client from a connection string and a hub name.
    pub fn new(connection_string: &str, hub: impl Into<String>) -> Result<Self, RestError> {
        let connection = ConnectionString::parse(connection_string)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("hubline-rest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            connection,
            hub: hub.into(),
        })
    }

    /// Hub this client addresses.
    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Invoke `target` on every connected client.
    pub async fn broadcast(&self, target: &str, arguments: Vec<Value>) -> Result<(), RestError> {
        self.send(&[], target, arguments).await
    }

    /// Invoke `target` on every client in `group`.
    pub async fn send_to_group(
        &self,
        group: &str,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<(), RestError> {
        self.send(&["groups", group], target, arguments).await
    }

    /// Invoke `target` on every connection of `user`.
    pub async fn send_to_user(
        &self,
        user: &str,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<(), RestError> {
        self.send(&["users", user], target, arguments).await
    }

    /// Invoke `target` on a single connection.
    pub async fn send_to_connection(
        &self,
        connection_id: &str,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<(), RestError> {
        self.send(&["connections", connection_id], target, arguments)
            .await
    }

    /// Add every connection of `user` to `group`.
    pub async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), RestError> {
        self.call(Method::PUT, &["groups", group, "users", user], None)
            .await
    }

    /// Remove every connection of `user` from `group`.
    pub async fn remove_user_from_group(&self, user: &str, group: &str) -> Result<(), RestError> {
        self.call(Method::DELETE, &["groups", group, "users", user], None)
            .await
    }

    async fn send(
        &self,
        suffix: &[&str],
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<(), RestError> {
        let payload = Payload {
            target: target.to_string(),
            arguments,
        };
        self.call(Method::POST, suffix, Some(&payload)).await
    }

    /// `{endpoint}/api/v1/hubs/{hub}/{suffix...}` with each segment escaped.
    fn url(&self, suffix: &[&str]) -> Result<Url, RestError> {
        let mut url = self.connection.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RestError::InvalidConnectionString("endpoint cannot carry a path".into())
            })?;
            let _ = segments
                .pop_if_empty()
                .extend(["api", "v1", "hubs", self.hub.as_str()])
                .extend(suffix);
        }
        Ok(url)
    }

    #[instrument(skip_all, fields(hub = %self.hub, method = %method))]
    async fn call(
        &self,
        method: Method,
        suffix: &[&str],
        body: Option<&Payload>,
    ) -> Result<(), RestError> {
        let url = self.url(suffix)?;
        let token = auth::sign(url.as_str(), &self.connection.access_key)?;

        let mut request = self.http.request(method, url.clone()).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!(url = %url, status = status.as_u16(), response = %text, "relay responded");

        if status.is_success() {
            Ok(())
        } else {
            Err(RestError::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}
