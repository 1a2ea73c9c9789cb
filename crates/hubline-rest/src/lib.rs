//! # hubline-rest
//!
//! Server-side REST client for a hosted relay service that speaks the hub
//! protocol to clients on the application's behalf.
//!
//! ```no_run
//! # async fn demo() -> Result<(), hubline_rest::RestError> {
//! use hubline_rest::RelayClient;
//! use serde_json::json;
//!
//! let client = RelayClient::new("Endpoint=https://relay.example.com;AccessKey=secret;", "chat")?;
//! client.broadcast("Receive", vec![json!("hello")]).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod connection_string;
pub mod errors;

pub use client::{Payload, RelayClient};
pub use connection_string::ConnectionString;
pub use errors::RestError;
