//! Method dispatch for inbound invocations.
//!
//! A [`Nexus`] is the set of methods one side exposes. [`MethodTable`] is the
//! ready-made implementation: a method-id-indexed table of boxed handlers.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use nexwire_frame::ExceptionKind;
use nexwire_pipe::DuplexPipe;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Why a handler produced no result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown method {0}")]
    UnknownMethod(u16),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    /// The handler stopped because its invocation was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// The exception kind reported to the caller. `None` for cancellation,
    /// which is reported with a cancellation frame instead.
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match self {
            Self::UnknownMethod(_) => Some(ExceptionKind::UnknownMethod),
            Self::InvalidArguments(_) => Some(ExceptionKind::InvalidArguments),
            Self::Failed(_) => Some(ExceptionKind::Failed),
            Self::Cancelled => None,
        }
    }
}

pub type DispatchResult = std::result::Result<Bytes, DispatchError>;

/// What a handler knows about the invocation it is serving.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    invocation_id: u16,
    method_id: u16,
    cancel: CancellationToken,
    pipe: Option<DuplexPipe>,
}

impl InvocationContext {
    pub fn new(
        invocation_id: u16,
        method_id: u16,
        cancel: CancellationToken,
        pipe: Option<DuplexPipe>,
    ) -> Self {
        Self {
            invocation_id,
            method_id,
            cancel,
            pipe,
        }
    }

    /// The id the caller chose; 0 for fire-and-forget calls.
    pub fn invocation_id(&self) -> u16 {
        self.invocation_id
    }

    pub fn method_id(&self) -> u16 {
        self.method_id
    }

    /// Fires when the caller cancels or the session closes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The pipe the caller attached, if any. The session completes it when
    /// the handler returns.
    pub fn pipe(&self) -> Option<&DuplexPipe> {
        self.pipe.as_ref()
    }
}

/// The methods one side of a session exposes to the other.
pub trait Nexus: Send + Sync + 'static {
    fn dispatch(
        &self,
        method_id: u16,
        args: Bytes,
        ctx: InvocationContext,
    ) -> BoxFuture<'static, DispatchResult>;
}

type Handler =
    Arc<dyn Fn(Bytes, InvocationContext) -> BoxFuture<'static, DispatchResult> + Send + Sync>;

struct Method {
    name: String,
    handler: Handler,
}

/// Method-id-indexed table of handlers.
#[derive(Default)]
pub struct MethodTable {
    methods: BTreeMap<u16, Method>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw-bytes method. A later registration under the same id
    /// replaces the earlier one.
    pub fn with_method<F, Fut>(mut self, method_id: u16, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Bytes, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args, ctx| {
            Box::pin(f(args, ctx)) as BoxFuture<'static, DispatchResult>
        });
        self.methods.insert(
            method_id,
            Method {
                name: name.into(),
                handler,
            },
        );
        self
    }

    /// Register a method whose arguments and result are JSON.
    pub fn with_json_method<A, R, F, Fut>(
        self,
        method_id: u16,
        name: impl Into<String>,
        f: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, DispatchError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.with_method(method_id, name, move |args: Bytes, ctx| {
            let f = f.clone();
            async move {
                let args: A = serde_json::from_slice(&args)
                    .map_err(|e| DispatchError::InvalidArguments(e.to_string()))?;
                let result = f(args, ctx).await?;
                let encoded = serde_json::to_vec(&result)
                    .map_err(|e| DispatchError::failed(format!("encoding result: {e}")))?;
                Ok(Bytes::from(encoded))
            }
        })
    }

    pub fn method_name(&self, method_id: u16) -> Option<&str> {
        self.methods.get(&method_id).map(|m| m.name.as_str())
    }

    /// `(id, name)` pairs in id order.
    pub fn methods(&self) -> impl Iterator<Item = (u16, &str)> {
        self.methods.iter().map(|(id, m)| (*id, m.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Nexus for MethodTable {
    fn dispatch(
        &self,
        method_id: u16,
        args: Bytes,
        ctx: InvocationContext,
    ) -> BoxFuture<'static, DispatchResult> {
        match self.methods.get(&method_id) {
            Some(method) => (method.handler)(args, ctx),
            None => Box::pin(async move { Err(DispatchError::UnknownMethod(method_id)) }),
        }
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.methods()).finish()
    }
}
