//! Connection Context: one client's protocol state machine.
//!
//! A connection moves `Handshaking → Active → Closing → Closed`. While
//! active it runs four tasks: the inbound loop, the writer draining the
//! outbound queue, the liveness check, and the ping sender. Every task
//! reports failures on one error channel; the first error ends the
//! connection, cancels its termination token, and deregisters it.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::StreamExt;
use hubline_protocol::codec::json::RECORD_SEPARATOR;
use hubline_protocol::handshake::{self, HandshakeResponse};
use hubline_protocol::{
    protocol_for, Argument, Completion, HubMessage, HubProtocol, Invocation, ProtocolError,
    StreamItem,
};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::HubOptions;
use crate::errors::{ConnectionError, HubError};
use crate::hub::{Call, Hub, HubContext};
use crate::keepalive::{run_ping_check, run_ping_send, Activity, KeepAliveResult};
use crate::metrics::{
    HUB_CONNECTIONS_ACTIVE, HUB_CONNECTIONS_TOTAL, HUB_CONNECTION_DURATION_SECONDS,
    HUB_DISCONNECTIONS_TOTAL, HUB_HANDSHAKE_FAILURES_TOTAL, HUB_INVOCATIONS_TOTAL,
    HUB_INVOCATION_DURATION_SECONDS, HUB_INVOCATION_ERRORS_TOTAL,
};
use crate::transport::{Transport, TransportKind};

/// How long teardown waits for the transport to close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake request.
    Handshaking,
    /// Registered and exchanging messages.
    Active,
    /// Tearing down after the first error.
    Closing,
    /// Terminal.
    Closed,
}

/// One logical client connection to a hub.
pub struct HubConnection {
    id: String,
    hub: Arc<Hub>,
    options: Arc<HubOptions>,
    transport: Arc<dyn Transport>,
    protocol: OnceLock<Arc<dyn HubProtocol>>,
    state: Mutex<ConnectionState>,
    activity: Activity,
    end: CancellationToken,
    errors: mpsc::UnboundedSender<ConnectionError>,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionError>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    groups: Mutex<HashSet<String>>,
    connected_at: Instant,
}

impl HubConnection {
    /// Create a connection in the `Handshaking` state. Nothing runs until
    /// [`HubConnection::run`] is awaited.
    pub fn new(
        id: impl Into<String>,
        hub: Arc<Hub>,
        options: Arc<HubOptions>,
        transport: Arc<dyn Transport>,
        end: CancellationToken,
    ) -> Arc<Self> {
        let (errors, error_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: id.into(),
            hub,
            options,
            transport,
            protocol: OnceLock::new(),
            state: Mutex::new(ConnectionState::Handshaking),
            activity: Activity::new(),
            end,
            errors,
            error_rx: Mutex::new(Some(error_rx)),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            groups: Mutex::new(HashSet::new()),
            connected_at: Instant::now(),
        })
    }

    /// Connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Transport carrying this connection.
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Codec chosen during the handshake, if it has completed.
    pub fn protocol_name(&self) -> Option<&'static str> {
        self.protocol.get().map(|p| p.name())
    }

    /// Groups this connection has joined.
    pub fn groups(&self) -> Vec<String> {
        self.groups.lock().iter().cloned().collect()
    }

    /// Whether the termination signal has fired.
    pub fn is_terminated(&self) -> bool {
        self.end.is_cancelled()
    }

    /// Fire the termination signal. Idempotent.
    pub fn terminate(&self) {
        self.end.cancel();
    }

    pub(crate) fn joined(&self, group: &str) {
        let _ = self.groups.lock().insert(group.to_owned());
    }

    pub(crate) fn left(&self, group: &str) {
        let _ = self.groups.lock().remove(group);
    }

    pub(crate) fn take_groups(&self) -> HashSet<String> {
        std::mem::take(&mut *self.groups.lock())
    }

    /// Invoke `method` on the client, expecting no reply.
    ///
    /// Returns whether the frame was queued. An encode failure tears the
    /// connection down instead of surfacing to the caller.
    pub fn send(&self, method: &str, args: &[Value]) -> bool {
        let arguments = args.iter().cloned().map(Argument::from).collect();
        self.send_message(&HubMessage::Invocation(Invocation::new(method, arguments)))
    }

    /// Encode and queue any message. A no-op once terminated.
    pub fn send_message(&self, message: &HubMessage) -> bool {
        if self.end.is_cancelled() {
            return false;
        }
        let Some(protocol) = self.protocol.get() else {
            return false;
        };
        match protocol.write_message(message) {
            Ok(frame) => self.outbound.send(frame).is_ok(),
            Err(e) => {
                self.fail(e.into());
                false
            }
        }
    }

    fn send_ping(&self) -> bool {
        if self.end.is_cancelled() {
            return false;
        }
        self.protocol
            .get()
            .is_some_and(|p| self.outbound.send(p.ping_frame().to_vec()).is_ok())
    }

    fn fail(&self, error: ConnectionError) {
        let _ = self.errors.send(error);
    }

    /// Per-call context handed to hub methods.
    pub fn context(&self) -> HubContext {
        HubContext::new(
            self.id.as_str(),
            Arc::clone(self.hub.clients()),
            self.end.clone(),
            self.transport.kind(),
        )
    }

    /// Drive the connection from handshake to teardown.
    ///
    /// Returns the error that ended it. Can only be called once.
    #[instrument(skip_all, fields(
        connection_id = %self.id,
        hub = %self.hub.name(),
        transport = %self.transport.kind(),
    ))]
    pub async fn run(self: Arc<Self>) -> ConnectionError {
        let errors = self.error_rx.lock().take();
        let outbound = self.outbound_rx.lock().take();
        let (Some(mut errors), Some(outbound)) = (errors, outbound) else {
            return ConnectionError::Handshake("connection already started".into());
        };

        let handshake = tokio::select! {
            biased;
            () = self.end.cancelled() => Err(ConnectionError::Shutdown),
            result = tokio::time::timeout(self.options.handshake_timeout(), self.handshake()) => {
                result.unwrap_or_else(|_| Err(ConnectionError::HandshakeTimeout))
            }
        };
        let (protocol, rest) = match handshake {
            Ok(accepted) => accepted,
            Err(error) => return self.abandon(error).await,
        };

        if !self.hub.clients().add(Arc::clone(&self)) {
            let error = ConnectionError::Handshake(format!("connection id '{}' in use", self.id));
            return self.abandon(error).await;
        }
        *self.state.lock() = ConnectionState::Active;
        self.activity.touch();
        let connected = Instant::now();
        counter!(HUB_CONNECTIONS_TOTAL).increment(1);
        gauge!(HUB_CONNECTIONS_ACTIVE).increment(1.0);
        info!(protocol = protocol.name(), "connection established");

        let tasks = [
            tokio::spawn(Arc::clone(&self).write_loop(outbound)),
            tokio::spawn(Arc::clone(&self).read_loop(protocol, rest)),
            self.spawn_ping_check(),
            self.spawn_ping_send(),
        ];

        let error = tokio::select! {
            biased;
            Some(error) = errors.recv() => error,
            () = self.end.cancelled() => ConnectionError::Shutdown,
        };
        self.teardown(&tasks).await;

        gauge!(HUB_CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(HUB_DISCONNECTIONS_TOTAL, "reason" => error.reason()).increment(1);
        histogram!(HUB_CONNECTION_DURATION_SECONDS).record(connected.elapsed().as_secs_f64());
        if error.is_graceful() {
            info!(reason = error.reason(), "connection closed");
        } else {
            warn!(reason = error.reason(), error = %error, "connection failed");
        }
        error
    }

    /// Read until one complete handshake request has arrived, answer it,
    /// and return the chosen codec plus any bytes pipelined behind it.
    async fn handshake(&self) -> Result<(Arc<dyn HubProtocol>, Vec<u8>), ConnectionError> {
        let mut buffer = Vec::new();
        while !buffer.contains(&RECORD_SEPARATOR) {
            buffer.extend_from_slice(&self.transport.read().await?);
        }
        let (request, rest) = handshake::parse_request(&buffer)?;
        debug!(protocol = %request.protocol, version = request.version, "handshake request");

        let kind = self.transport.kind();
        let chosen = protocol_for(&request.protocol, request.version)
            .map_err(|e| e.to_string())
            .and_then(|protocol| {
                let format = protocol.transfer_format();
                if kind.supports(format) {
                    Ok(protocol)
                } else {
                    Err(format!(
                        "protocol '{}' needs {format} frames, which {kind} cannot carry",
                        protocol.name()
                    ))
                }
            });
        let protocol = match chosen {
            Ok(protocol) => protocol,
            Err(reason) => {
                let reply = handshake::encode_response(&HandshakeResponse::failed(reason.clone()))?;
                if let Err(send_error) = self.transport.send(reply).await {
                    debug!(error = %send_error, "could not deliver handshake rejection");
                }
                return Err(ConnectionError::Handshake(reason));
            }
        };
        let reply = handshake::encode_response(&HandshakeResponse::ok())?;
        self.transport.send(reply).await?;
        let _ = self.protocol.set(Arc::clone(&protocol));
        Ok((protocol, rest.to_vec()))
    }

    /// End a connection that never became active.
    async fn abandon(&self, error: ConnectionError) -> ConnectionError {
        if !matches!(error, ConnectionError::Shutdown) {
            counter!(HUB_HANDSHAKE_FAILURES_TOTAL).increment(1);
        }
        warn!(reason = error.reason(), error = %error, "handshake failed");
        *self.state.lock() = ConnectionState::Closing;
        self.end.cancel();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close()).await;
        *self.state.lock() = ConnectionState::Closed;
        error
    }

    async fn teardown(&self, tasks: &[JoinHandle<()>]) {
        *self.state.lock() = ConnectionState::Closing;
        self.end.cancel();
        let _ = self.hub.clients().remove(&self.id);
        for task in tasks {
            task.abort();
        }
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close()).await;
        *self.state.lock() = ConnectionState::Closed;
        debug!(
            lifetime_secs = self.connected_at.elapsed().as_secs(),
            "connection torn down"
        );
    }

    async fn write_loop(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.end.cancelled() => return,
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => return,
                },
            };
            let sent = tokio::select! {
                biased;
                () = self.end.cancelled() => return,
                sent = self.transport.send(frame) => sent,
            };
            if let Err(e) = sent {
                self.fail(e);
                return;
            }
        }
    }

    async fn read_loop(self: Arc<Self>, protocol: Arc<dyn HubProtocol>, mut pending: Vec<u8>) {
        loop {
            if let Err(e) = self.process(protocol.as_ref(), &pending) {
                self.fail(e);
                return;
            }
            pending = tokio::select! {
                biased;
                () = self.end.cancelled() => return,
                read = self.transport.read() => match read {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                },
            };
        }
    }

    /// Decode and handle every frame in one read, in order.
    fn process(self: &Arc<Self>, protocol: &dyn HubProtocol, mut input: &[u8]) -> Result<(), ConnectionError> {
        while !input.is_empty() {
            let (payload, rest) = protocol.decode_frame(input)?;
            input = rest;
            let message = protocol.decode_message(payload)?;
            self.activity.touch();
            match message {
                HubMessage::Ping => {}
                HubMessage::Invocation(invocation) => self.dispatch(invocation, false)?,
                HubMessage::StreamInvocation(invocation) => self.dispatch(invocation, true)?,
                HubMessage::Close(close) => return Err(ConnectionError::ClosedByClient(close.error)),
                other @ (HubMessage::Completion(_) | HubMessage::StreamItem(_)) => {
                    return Err(ProtocolError::UnknownMessageType(other.message_type()).into());
                }
            }
        }
        Ok(())
    }

    /// Resolve and bind an invocation, then run it on its own task.
    fn dispatch(self: &Arc<Self>, invocation: Invocation, streaming: bool) -> Result<(), ConnectionError> {
        let Invocation {
            invocation_id,
            target,
            arguments,
            ..
        } = invocation;
        let Some(method) = self.hub.method(&target) else {
            return Err(ConnectionError::UnknownTarget(target));
        };
        if arguments.len() != method.arity() {
            return Err(ConnectionError::ArgumentCountMismatch {
                target,
                expected: method.arity(),
                actual: arguments.len(),
            });
        }
        if method.is_stream() != streaming {
            debug!(method = %target, streaming, "invocation kind does not match method");
            if let Some(id) = invocation_id {
                let error = if streaming {
                    format!("method '{target}' does not return a stream")
                } else {
                    format!("method '{target}' returns a stream and needs a stream invocation")
                };
                let _ = self.send_message(&HubMessage::Completion(Completion::with_error(id, error)));
            }
            return Ok(());
        }

        let call = method
            .bind(self.context(), &arguments)
            .map_err(|e| ConnectionError::ArgumentDecode {
                target: target.clone(),
                index: e.index,
                reason: e.reason,
            })?;
        counter!(
            HUB_INVOCATIONS_TOTAL,
            "hub" => self.hub.name().to_owned(),
            "target" => target.clone()
        )
        .increment(1);
        debug!(method = %target, invocation_id = ?invocation_id, "dispatching invocation");

        let connection = Arc::clone(self);
        drop(tokio::spawn(async move {
            connection.complete(invocation_id, call).await;
        }));
        Ok(())
    }

    /// Await a bound call and send its reply, if one is expected.
    async fn complete(self: Arc<Self>, invocation_id: Option<String>, call: Call) {
        let started = Instant::now();
        let completion = match call {
            Call::Value(pending) => {
                let result = pending.await;
                let Some(id) = invocation_id else {
                    if let Err(e) = result {
                        debug!(error = %e, "fire-and-forget invocation failed");
                    }
                    return;
                };
                match result {
                    Ok(Value::Null) => Completion::void(id),
                    Ok(value) => Completion::with_result(id, value),
                    Err(e) => self.error_completion(id, &e),
                }
            }
            Call::Stream(pending) => {
                let Some(id) = invocation_id else {
                    // No reply expected: run the method and drain its items unsent.
                    match pending.await {
                        Ok(mut items) => {
                            while let Some(item) = items.next().await {
                                if let Err(e) = item {
                                    debug!(error = %e, "fire-and-forget stream failed");
                                    break;
                                }
                                if self.is_terminated() {
                                    break;
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, "fire-and-forget stream failed"),
                    }
                    return;
                };
                match pending.await {
                    Ok(items) => match self.forward_items(&id, items).await {
                        Some(Ok(())) => Completion::void(id),
                        Some(Err(e)) => self.error_completion(id, &e),
                        None => return,
                    },
                    Err(e) => self.error_completion(id, &e),
                }
            }
        };
        histogram!(HUB_INVOCATION_DURATION_SECONDS, "hub" => self.hub.name().to_owned())
            .record(started.elapsed().as_secs_f64());
        let _ = self.send_message(&HubMessage::Completion(completion));
    }

    /// Send each stream element as a `StreamItem`. `None` means the
    /// connection went away mid-stream.
    async fn forward_items(
        &self,
        id: &str,
        mut items: crate::hub::ItemStream,
    ) -> Option<Result<(), HubError>> {
        while let Some(item) = items.next().await {
            if self.is_terminated() {
                return None;
            }
            match item {
                Ok(item) => {
                    let message = HubMessage::StreamItem(StreamItem {
                        invocation_id: id.to_owned(),
                        item,
                    });
                    if !self.send_message(&message) {
                        return None;
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(()))
    }

    fn error_completion(&self, id: String, error: &HubError) -> Completion {
        counter!(
            HUB_INVOCATION_ERRORS_TOTAL,
            "hub" => self.hub.name().to_owned(),
            "error_type" => "hub_error"
        )
        .increment(1);
        Completion::with_error(id, error.message())
    }

    fn spawn_ping_check(self: &Arc<Self>) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            let timeout = connection.options.ping_timeout();
            let check_every = connection.options.keep_alive_check();
            let result =
                run_ping_check(&connection.activity, check_every, timeout, connection.end.clone())
                    .await;
            if result == KeepAliveResult::TimedOut {
                connection.fail(ConnectionError::PingTimeout(timeout));
            }
        })
    }

    fn spawn_ping_send(self: &Arc<Self>) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            let interval = connection.options.ping_interval();
            let _ = run_ping_send(interval, connection.end.clone(), || connection.send_ping()).await;
        })
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("id", &self.id)
            .field("hub", &self.hub.name())
            .field("state", &self.state())
            .field("transport", &self.transport.kind())
            .finish_non_exhaustive()
    }
}
