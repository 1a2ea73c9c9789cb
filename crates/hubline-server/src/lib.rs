//! # hubline-server
//!
//! Hub connections over WebSocket, Server-Sent Events, and long-polling.
//!
//! - Typed hub method tables built with [`HubBuilder`]
//! - Per-connection protocol state machine: handshake, dispatch, keepalive
//! - Client Registry with group membership and fan-out addressing
//! - Axum router: negotiate, transport endpoints, health, metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod clients;
pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod hub;
pub mod keepalive;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use clients::{ClientRegistry, Target};
pub use config::{HubOptions, ServerConfig};
pub use connection::{ConnectionState, HubConnection};
pub use errors::{ConnectionError, HubError, RegistryError};
pub use hub::{FromArguments, Hub, HubBuilder, HubContext};
pub use server::HubServer;
pub use shutdown::ShutdownCoordinator;
pub use transport::{Transport, TransportKind};
