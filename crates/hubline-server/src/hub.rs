//! Hub method table and typed dispatch.
//!
//! A hub is a name plus a table of methods built once with [`HubBuilder`].
//! Each entry records its arity and a closure that decodes the wire
//! arguments straight into the handler's parameter tuple, so no generic
//! intermediate representation is ever built.
//!
//! ```ignore
//! let hub = HubBuilder::new("Chat", ())
//!     .method("Echo", |_, _, (text,): (String,)| async move { Ok(text) })
//!     .build();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use hubline_protocol::Argument;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clients::{ClientRegistry, Target};
use crate::errors::{HubError, RegistryError};
use crate::transport::TransportKind;

/// Boxed `Send` future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Items produced by a streaming method, already serialized.
pub type ItemStream = Pin<Box<dyn Stream<Item = Result<Value, HubError>> + Send + 'static>>;

/// One argument failed to decode into its parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("argument {index}: {reason}")]
pub struct ArgumentError {
    /// Zero-based position.
    pub index: usize,
    /// Decoder message.
    pub reason: String,
}

/// A parameter list that can be decoded from wire arguments.
///
/// Implemented for `()` and for tuples of up to six
/// `DeserializeOwned` types.
pub trait FromArguments: Sized + Send + 'static {
    /// Number of parameters.
    const ARITY: usize;

    /// Decode each argument against its parameter type.
    fn from_arguments(args: &[Argument]) -> Result<Self, ArgumentError>;
}

fn decode_at<T: DeserializeOwned>(args: &[Argument], index: usize) -> Result<T, ArgumentError> {
    let arg = args.get(index).ok_or_else(|| ArgumentError {
        index,
        reason: "missing".into(),
    })?;
    arg.decode().map_err(|e| ArgumentError {
        index,
        reason: e.to_string(),
    })
}

impl FromArguments for () {
    const ARITY: usize = 0;

    fn from_arguments(_args: &[Argument]) -> Result<Self, ArgumentError> {
        Ok(())
    }
}

macro_rules! tuple_arguments {
    ($arity:literal => $($name:ident : $index:tt),+) => {
        impl<$($name),+> FromArguments for ($($name,)+)
        where
            $($name: DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $arity;

            fn from_arguments(args: &[Argument]) -> Result<Self, ArgumentError> {
                Ok(($(decode_at::<$name>(args, $index)?,)+))
            }
        }
    };
}

tuple_arguments!(1 => A: 0);
tuple_arguments!(2 => A: 0, B: 1);
tuple_arguments!(3 => A: 0, B: 1, C: 2);
tuple_arguments!(4 => A: 0, B: 1, C: 2, D: 3);
tuple_arguments!(5 => A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_arguments!(6 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Serialize a method's return value. `()` becomes `null`, which callers
/// treat as "no result".
fn to_result_value<R: Serialize>(result: &R) -> Result<Value, HubError> {
    serde_json::to_value(result)
        .map_err(|e| HubError::new(format!("failed to serialize result: {e}")))
}

type ValueCall = BoxFuture<Result<Value, HubError>>;
type StreamCall = BoxFuture<Result<ItemStream, HubError>>;
type ValueInvoker =
    Box<dyn Fn(HubContext, &[Argument]) -> Result<ValueCall, ArgumentError> + Send + Sync>;
type StreamInvoker =
    Box<dyn Fn(HubContext, &[Argument]) -> Result<StreamCall, ArgumentError> + Send + Sync>;

enum Invoker {
    Value(ValueInvoker),
    Stream(StreamInvoker),
}

/// A bound invocation, arguments already decoded.
pub(crate) enum Call {
    Value(ValueCall),
    Stream(StreamCall),
}

/// One registered method.
pub struct Method {
    arity: usize,
    invoker: Invoker,
}

impl Method {
    /// Declared parameter count.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Whether this method returns a sequence.
    pub fn is_stream(&self) -> bool {
        matches!(self.invoker, Invoker::Stream(_))
    }

    /// Decode `args` and produce the pending call.
    pub(crate) fn bind(&self, ctx: HubContext, args: &[Argument]) -> Result<Call, ArgumentError> {
        match &self.invoker {
            Invoker::Value(invoke) => invoke(ctx, args).map(Call::Value),
            Invoker::Stream(invoke) => invoke(ctx, args).map(Call::Stream),
        }
    }
}

/// Collects a hub's methods, then freezes them into a [`Hub`].
pub struct HubBuilder<S> {
    name: String,
    state: Arc<S>,
    methods: HashMap<String, Method>,
}

impl<S: Send + Sync + 'static> HubBuilder<S> {
    /// Start a hub named `name`. `state` is shared by every connection.
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(state),
            methods: HashMap::new(),
        }
    }

    /// Register a method returning one value.
    ///
    /// `R` is serialized into `Completion.result`: `()` means no result, a
    /// tuple becomes an ordered array.
    #[must_use]
    pub fn method<A, R, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: FromArguments,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, HubContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HubError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let invoke = move |ctx: HubContext, args: &[Argument]| -> Result<ValueCall, ArgumentError> {
            let args = A::from_arguments(args)?;
            let pending = handler(Arc::clone(&state), ctx, args);
            let call: ValueCall = Box::pin(async move {
                let result = pending.await?;
                to_result_value(&result)
            });
            Ok(call)
        };
        let invoker: ValueInvoker = Box::new(invoke);
        self.insert(name.into(), A::ARITY, Invoker::Value(invoker));
        self
    }

    /// Register a method whose result is a sequence of items.
    #[must_use]
    pub fn stream<A, T, St, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: FromArguments,
        T: Serialize + Send + 'static,
        St: Stream<Item = T> + Send + 'static,
        F: Fn(Arc<S>, HubContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<St, HubError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let invoke = move |ctx: HubContext, args: &[Argument]| -> Result<StreamCall, ArgumentError> {
            let args = A::from_arguments(args)?;
            let pending = handler(Arc::clone(&state), ctx, args);
            let call: StreamCall = Box::pin(async move {
                let items = pending.await?;
                let items: ItemStream = Box::pin(items.map(|item| to_result_value(&item)));
                Ok(items)
            });
            Ok(call)
        };
        let invoker: StreamInvoker = Box::new(invoke);
        self.insert(name.into(), A::ARITY, Invoker::Stream(invoker));
        self
    }

    fn insert(&mut self, name: String, arity: usize, invoker: Invoker) {
        debug!(hub = %self.name, method = %name, arity, "registered hub method");
        let _ = self.methods.insert(name, Method { arity, invoker });
    }

    /// Freeze the method table. The hub gets its own Client Registry.
    pub fn build(self) -> Hub {
        Hub {
            name: self.name,
            methods: self.methods,
            clients: Arc::new(ClientRegistry::new()),
        }
    }
}

/// An immutable hub: name, method table, and the registry of its
/// connections.
pub struct Hub {
    name: String,
    methods: HashMap<String, Method>,
    clients: Arc<ClientRegistry>,
}

impl Hub {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL path segment: the lowercased name.
    pub fn path(&self) -> String {
        self.name.to_lowercase()
    }

    /// This hub's connections and groups.
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Look up a method by exact, case-sensitive name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .field("connections", &self.clients.len())
            .finish()
    }
}

/// Per-connection view handed to every method call.
#[derive(Clone)]
pub struct HubContext {
    connection_id: Arc<str>,
    clients: Arc<ClientRegistry>,
    cancel: CancellationToken,
    transport: TransportKind,
}

impl HubContext {
    /// Build a context for `connection_id`.
    pub fn new(
        connection_id: impl Into<Arc<str>>,
        clients: Arc<ClientRegistry>,
        cancel: CancellationToken,
        transport: TransportKind,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            clients,
            cancel,
            transport,
        }
    }

    /// Id of the calling connection.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The hub's Client Registry.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The calling connection.
    pub fn caller(&self) -> Target<'_> {
        self.clients.connection(&self.connection_id)
    }

    /// Every connection except the caller.
    pub fn others(&self) -> Target<'_> {
        self.clients.all_except([&*self.connection_id])
    }

    /// Add the caller to `group`.
    pub fn add_to_group(&self, group: &str) -> Result<(), RegistryError> {
        self.clients.add_to_group(&self.connection_id, group)
    }

    /// Remove the caller from `group`.
    pub fn remove_from_group(&self, group: &str) -> Result<(), RegistryError> {
        self.clients.remove_from_group(&self.connection_id, group)
    }

    /// Fires when the calling connection terminates.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the calling connection is still alive.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Transport the caller is connected over.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}

impl fmt::Debug for HubContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubContext")
            .field("connection_id", &self.connection_id)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn ctx() -> HubContext {
        HubContext::new(
            "c1",
            Arc::new(ClientRegistry::new()),
            CancellationToken::new(),
            TransportKind::WebSockets,
        )
    }

    fn args(values: &[Value]) -> Vec<Argument> {
        values.iter().cloned().map(Argument::from).collect()
    }

    async fn call_value(hub: &Hub, name: &str, values: &[Value]) -> Result<Value, HubError> {
        match hub.method(name).unwrap().bind(ctx(), &args(values)).unwrap() {
            Call::Value(fut) => fut.await,
            Call::Stream(_) => panic!("expected value method"),
        }
    }

    fn sample_hub() -> Hub {
        HubBuilder::new("Sample", AtomicUsize::new(0))
            .method("Echo", |_, _, (text,): (String,)| async move { Ok(text) })
            .method("Add", |_, _, (a, b): (i64, i64)| async move { Ok(a + b) })
            .method("Nothing", |_, _, ()| async move { Ok(()) })
            .method("Pair", |_, _, ()| async move { Ok(("x", 2)) })
            .method("Fail", |_, _, ()| async move {
                Err::<(), _>(HubError::new("nope"))
            })
            .method("Count", |state: Arc<AtomicUsize>, _, ()| async move {
                Ok(state.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .method("Who", |_, ctx: HubContext, ()| async move {
                Ok(ctx.connection_id().to_owned())
            })
            .stream("Range", |_, _, (n,): (u32,)| async move {
                Ok(futures::stream::iter(0..n))
            })
            .build()
    }

    #[test]
    fn table_records_arity_and_kind() {
        let hub = sample_hub();
        assert_eq!(hub.method("Add").unwrap().arity(), 2);
        assert_eq!(hub.method("Nothing").unwrap().arity(), 0);
        assert!(hub.method("Range").unwrap().is_stream());
        assert!(!hub.method("Echo").unwrap().is_stream());
        assert_eq!(hub.path(), "sample");
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let hub = sample_hub();
        assert!(hub.method("echo").is_none());
        assert!(hub.method("DoesNotExist").is_none());
    }

    #[tokio::test]
    async fn scalar_result() {
        let hub = sample_hub();
        assert_eq!(call_value(&hub, "Echo", &[json!("hi")]).await.unwrap(), json!("hi"));
        assert_eq!(call_value(&hub, "Add", &[json!(2), json!(3)]).await.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn unit_result_is_null() {
        let hub = sample_hub();
        assert_eq!(call_value(&hub, "Nothing", &[]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn tuple_result_is_ordered_array() {
        let hub = sample_hub();
        assert_eq!(call_value(&hub, "Pair", &[]).await.unwrap(), json!(["x", 2]));
    }

    #[tokio::test]
    async fn hub_error_is_returned() {
        let hub = sample_hub();
        let err = call_value(&hub, "Fail", &[]).await.unwrap_err();
        assert_eq!(err.message(), "nope");
    }

    #[tokio::test]
    async fn state_is_shared_across_calls() {
        let hub = sample_hub();
        assert_eq!(call_value(&hub, "Count", &[]).await.unwrap(), json!(1));
        assert_eq!(call_value(&hub, "Count", &[]).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn context_carries_caller() {
        let hub = sample_hub();
        assert_eq!(call_value(&hub, "Who", &[]).await.unwrap(), json!("c1"));
    }

    #[test]
    fn argument_type_mismatch_reports_position() {
        let hub = sample_hub();
        let err = hub
            .method("Add")
            .unwrap()
            .bind(ctx(), &args(&[json!(1), json!("two")]))
            .err()
            .unwrap();
        assert_eq!(err.index, 1);
    }

    #[test]
    fn missing_argument_is_reported() {
        let err = <(i32, i32)>::from_arguments(&args(&[json!(1)])).unwrap_err();
        assert_matches!(err, ArgumentError { index: 1, .. });
    }

    #[test]
    fn tuple_arity_constants() {
        assert_eq!(<()>::ARITY, 0);
        assert_eq!(<(String,)>::ARITY, 1);
        assert_eq!(<(u8, u8, u8, u8, u8, u8)>::ARITY, 6);
    }

    #[tokio::test]
    async fn stream_yields_serialized_items() {
        let hub = sample_hub();
        let call = hub.method("Range").unwrap().bind(ctx(), &args(&[json!(3)])).unwrap();
        let Call::Stream(fut) = call else {
            panic!("expected stream method");
        };
        let items: Vec<Value> = fut
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(items, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn debug_lists_methods() {
        let debug = format!("{:?}", sample_hub());
        assert!(debug.contains("Echo"));
        assert!(debug.contains("Range"));
    }
}
