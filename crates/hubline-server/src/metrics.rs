//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections that completed the handshake (counter).
pub const HUB_CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Currently active connections (gauge).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Connections torn down (counter, labels: reason).
pub const HUB_DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Lifetime of a connection after the handshake (histogram).
pub const HUB_CONNECTION_DURATION_SECONDS: &str = "hub_connection_duration_seconds";
/// Dispatched invocations (counter, labels: hub, target).
pub const HUB_INVOCATIONS_TOTAL: &str = "hub_invocations_total";
/// Invocations that ended in an error completion (counter, labels: hub, error_type).
pub const HUB_INVOCATION_ERRORS_TOTAL: &str = "hub_invocation_errors_total";
/// Time from dispatch to completion (histogram, labels: hub).
pub const HUB_INVOCATION_DURATION_SECONDS: &str = "hub_invocation_duration_seconds";
/// Handshakes that failed or timed out (counter).
pub const HUB_HANDSHAKE_FAILURES_TOTAL: &str = "hub_handshake_failures_total";
