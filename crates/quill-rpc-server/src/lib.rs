//! # JSON-RPC Entrypoint Dispatcher
//!
//! The request-dispatch and lifecycle engine for JSON-RPC 2.0 over an HTTP
//! POST body. An [`Entrypoint`] owns a set of method routes mounted under one
//! path; it parses single or batch bodies, resolves shared dependencies once
//! per HTTP request, fans batch items out concurrently to their routes, and
//! fans replies back in preserving request order and the notification rule
//! (no id, no content).
//!
//! Every item runs inside its own [`CallContext`]: an enter/exit scope stack
//! that nests entrypoint-level and method-level [`Middleware`] and intercepts
//! every failure at the nearest enclosing point, converting it to a JSON-RPC
//! error response. Only [`HttpAbort`] — a transport-native abort — escapes
//! the envelope untouched.
//!
//! HTTP transport binding is out of scope: the engine consumes
//! [`HttpRequestParts`] and produces an [`RpcHttpResponse`]; wiring those to
//! a server loop is the caller's concern.

pub mod context;
pub mod dependencies;
pub mod entrypoint;
pub mod middleware;
pub mod route;
pub mod tasks;
pub mod transport;

// Re-export main types
pub use context::CallContext;
pub use dependencies::{
    Dependency, DependencyCache, DependencyError, DependencyKey, DependencySet, FnDependency,
};
pub use entrypoint::{
    DefaultExceptionHook, Entrypoint, EntrypointBuilder, ExceptionHook, RegistrationError,
};
pub use middleware::{Middleware, MiddlewareStack};
pub use route::{DeclaredError, HandlerArgs, MethodHandler, MethodRoute};
pub use tasks::TaskRegistry;
pub use transport::{HttpAbort, HttpRequestParts, RpcHttpResponse, SharedSubResponse, SubResponse};

// Re-export the wire layer
pub use quill_jsonrpc::{
    ApplicationError, ErrorObject, FieldError, JsonRpcMessage, JsonRpcRequest, RequestId,
    RpcError, error_codes,
};

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Every failure mode a call can produce.
///
/// Exactly one of three things is true of a failure when a call exits its
/// context: it was a recognized [`RpcError`] (mapped to the wire verbatim),
/// it was an [`HttpAbort`] (bypasses the JSON-RPC envelope entirely), or it
/// was unhandled (downgraded to Internal Error on the wire, logged in full).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Abort(#[from] HttpAbort),

    #[error(transparent)]
    Unhandled(Box<dyn std::error::Error + Send + Sync>),
}

impl ServerError {
    /// Wrap a recognized application error.
    pub fn app(err: impl ApplicationError) -> Self {
        ServerError::Rpc(RpcError::app(err))
    }

    /// Wrap an arbitrary error; it will reach the wire as Internal Error.
    pub fn unhandled(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ServerError::Unhandled(err.into())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Unhandled(Box::new(err))
    }
}
