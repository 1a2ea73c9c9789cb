//! `HubServer`: binds registered hubs to HTTP endpoints.
//!
//! Every hub `H` gets `/{h}/negotiate` and `/{h}`, where `h` is the
//! lowercased hub name. The transport for `/{h}` is picked from the request
//! headers; long-polling and SSE connections keep an endpoint entry so later
//! GETs and POSTs carrying `?id=` reach them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hubline_protocol::NegotiateResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::{HubOptions, ServerConfig};
use crate::connection::HubConnection;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{
    select_transport, sse, LongPollingTransport, SseTransport, Transport, TransportKind,
    WebSocketTransport,
};

/// Shared state for the server-wide routes.
#[derive(Clone)]
struct AppState {
    hubs: Vec<Arc<Hub>>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// A long-polling or SSE connection that later requests must find by id.
#[derive(Clone)]
enum Endpoint {
    LongPolling(Arc<LongPollingTransport>),
    ServerSentEvents(Arc<SseTransport>),
}

/// One hub plus the HTTP-side state its routes share.
struct HubBinding {
    hub: Arc<Hub>,
    options: Arc<HubOptions>,
    shutdown: Arc<ShutdownCoordinator>,
    max_message_size: usize,
    endpoints: DashMap<String, Endpoint>,
}

#[derive(Debug, Deserialize)]
struct ConnectionQuery {
    id: Option<String>,
}

/// The hub server.
pub struct HubServer {
    config: ServerConfig,
    options: Arc<HubOptions>,
    bindings: Vec<Arc<HubBinding>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HubServer {
    /// Create a server with no hubs.
    pub fn new(config: ServerConfig, options: HubOptions) -> Self {
        Self {
            config,
            options: Arc::new(options),
            bindings: Vec::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Register a hub. A hub whose path is already bound is ignored.
    #[must_use]
    pub fn with_hub(mut self, hub: Hub) -> Self {
        let _ = self.register(hub);
        self
    }

    /// Register a hub and return the shared handle, or `None` if its path
    /// is already bound.
    pub fn register(&mut self, hub: Hub) -> Option<Arc<Hub>> {
        if self.bindings.iter().any(|b| b.hub.path() == hub.path()) {
            warn!(hub = hub.name(), "hub path already registered, ignoring");
            return None;
        }
        info!(hub = hub.name(), path = %hub.path(), methods = ?hub.method_names(), "hub registered");
        let hub = Arc::new(hub);
        self.bindings.push(Arc::new(HubBinding {
            hub: Arc::clone(&hub),
            options: Arc::clone(&self.options),
            shutdown: Arc::clone(&self.shutdown),
            max_message_size: self.config.max_message_size,
            endpoints: DashMap::new(),
        }));
        Some(hub)
    }

    /// Serve `GET /metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hubs: self.bindings.iter().map(|b| Arc::clone(&b.hub)).collect(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state);
        for binding in &self.bindings {
            let path = binding.hub.path();
            let hub_routes = Router::new()
                .route(
                    &format!("/{path}/negotiate"),
                    get(negotiate_handler).post(negotiate_handler),
                )
                .route(&format!("/{path}"), get(connect_handler).post(deliver_handler))
                .with_state(Arc::clone(binding));
            router = router.merge(hub_routes);
        }
        router
            .layer(DefaultBodyLimit::max(self.config.max_message_size))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, hubs = self.bindings.len(), "hub server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "hub server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Look up a registered hub by name (case-insensitive).
    pub fn hub(&self, name: &str) -> Option<&Arc<Hub>> {
        let path = name.to_lowercase();
        self.bindings
            .iter()
            .map(|b| &b.hub)
            .find(|hub| hub.path() == path)
    }

    /// Live connections across every hub.
    pub fn connection_count(&self) -> usize {
        self.bindings.iter().map(|b| b.hub.clients().len()).sum()
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the keepalive and timeout options.
    pub fn options(&self) -> &HubOptions {
        &self.options
    }
}

fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl HubBinding {
    /// Run one connection to completion, then forget its endpoint.
    async fn run_connection(
        self: Arc<Self>,
        id: String,
        transport: Arc<dyn Transport>,
        end: CancellationToken,
    ) {
        let connection = HubConnection::new(
            id.clone(),
            Arc::clone(&self.hub),
            Arc::clone(&self.options),
            transport,
            end,
        );
        let error = connection.run().await;
        let _ = self.endpoints.remove(&id);
        debug!(connection_id = %id, reason = error.reason(), "endpoint released");
    }

    /// Start a long-polling connection under `id`. Returns `false` if the
    /// id is already taken.
    fn open_long_polling(self: &Arc<Self>, id: &str) -> bool {
        let end = self.shutdown.child_token();
        let transport = Arc::new(LongPollingTransport::new(end.clone()));
        match self.endpoints.entry(id.to_owned()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(Endpoint::LongPolling(Arc::clone(&transport)));
            }
        }
        let _ = self.shutdown.spawn(Arc::clone(self).run_connection(
            id.to_owned(),
            transport,
            end,
        ));
        true
    }

    /// Start an SSE connection under `id` and return its event stream.
    fn open_sse(self: &Arc<Self>, id: String) -> Response {
        let end = self.shutdown.child_token();
        let (transport, events) = SseTransport::new(end.clone());
        let transport = Arc::new(transport);
        match self.endpoints.entry(id.clone()) {
            Entry::Occupied(_) => {
                return (StatusCode::CONFLICT, "connection id already in use").into_response();
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(Endpoint::ServerSentEvents(Arc::clone(&transport)));
            }
        }
        let _ = self
            .shutdown
            .spawn(Arc::clone(self).run_connection(id, transport, end.clone()));
        sse::response(events, end).into_response()
    }

    fn endpoint(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.get(id).map(|e| e.value().clone())
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections: usize = state.hubs.iter().map(|h| h.clients().len()).sum();
    let hubs: Vec<String> = state.hubs.iter().map(|h| h.name().to_owned()).collect();
    Json(health::health_check(state.start_time, connections, hubs))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET|POST /{hub}/negotiate
async fn negotiate_handler(State(binding): State<Arc<HubBinding>>) -> Json<NegotiateResponse> {
    let response = NegotiateResponse {
        connection_id: new_connection_id(),
        negotiate_version: 0,
        available_transports: vec![
            TransportKind::WebSockets.describe(),
            TransportKind::ServerSentEvents.describe(),
            TransportKind::LongPolling.describe(),
        ],
    };
    debug!(hub = binding.hub.name(), connection_id = %response.connection_id, "negotiated");
    Json(response)
}

/// GET /{hub}: open a connection, or poll an existing long-polling one.
async fn connect_handler(
    State(binding): State<Arc<HubBinding>>,
    Query(query): Query<ConnectionQuery>,
    request: Request,
) -> Response {
    match select_transport(request.headers()) {
        TransportKind::WebSockets => {
            let (mut parts, _body) = request.into_parts();
            let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(upgrade) => upgrade,
                Err(rejection) => return rejection.into_response(),
            };
            let id = query.id.unwrap_or_else(new_connection_id);
            let end = binding.shutdown.child_token();
            upgrade
                .max_message_size(binding.max_message_size)
                .on_upgrade(move |socket| {
                    let transport = Arc::new(WebSocketTransport::new(socket));
                    let shutdown = Arc::clone(&binding.shutdown);
                    shutdown.track(binding.run_connection(id, transport, end))
                })
        }
        TransportKind::ServerSentEvents => {
            let id = query.id.unwrap_or_else(new_connection_id);
            binding.open_sse(id)
        }
        TransportKind::LongPolling => {
            let Some(id) = query.id else {
                return (StatusCode::BAD_REQUEST, "missing connection id").into_response();
            };
            poll(&binding, &id).await
        }
    }
}

async fn poll(binding: &Arc<HubBinding>, id: &str) -> Response {
    match binding.endpoint(id) {
        Some(Endpoint::LongPolling(transport)) => {
            match transport.poll(binding.options.long_poll_timeout()).await {
                Ok(Some(payload)) => (StatusCode::OK, payload).into_response(),
                Ok(None) => StatusCode::OK.into_response(),
                Err(_) => StatusCode::NO_CONTENT.into_response(),
            }
        }
        Some(Endpoint::ServerSentEvents(_)) => {
            (StatusCode::BAD_REQUEST, "connection is not long-polling").into_response()
        }
        None => {
            if binding.open_long_polling(id) {
                debug!(hub = binding.hub.name(), connection_id = id, "long-polling connection opened");
            }
            StatusCode::OK.into_response()
        }
    }
}

/// POST /{hub}: deliver one client payload to a long-polling or SSE connection.
async fn deliver_handler(
    State(binding): State<Arc<HubBinding>>,
    Query(query): Query<ConnectionQuery>,
    body: Bytes,
) -> Response {
    let Some(id) = query.id else {
        return (StatusCode::BAD_REQUEST, "missing connection id").into_response();
    };
    let delivered = match binding.endpoint(&id) {
        Some(Endpoint::LongPolling(transport)) => transport.deliver(body.to_vec()).await,
        Some(Endpoint::ServerSentEvents(transport)) => transport.deliver(body.to_vec()).await,
        None => return (StatusCode::NOT_FOUND, "unknown connection id").into_response(),
    };
    match delivered {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            debug!(connection_id = %id, error = %e, "post to closed connection");
            (StatusCode::NOT_FOUND, "connection closed").into_response()
        }
    }
}
