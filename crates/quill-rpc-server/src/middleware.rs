//! Scoped middleware around each JSON-RPC call.
//!
//! A middleware is a pair of phases around a single call: `enter` runs
//! before anything nested inside it, `exit` runs during unwinding, in
//! reverse order, and observes the call's recorded failure (if any) through
//! the context. Entrypoint-level middlewares always wrap outside
//! method-level ones; middlewares at the same level nest in declaration
//! order (first declared = outermost).

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::Result;

/// One scoped wrapper around a call.
///
/// A failure returned from `enter` is intercepted at the nearest enclosing
/// point: middlewares entered earlier still observe it in their `exit`, the
/// failing middleware and everything after it never run. A failure returned
/// from `exit` replaces the call's recorded response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn enter(&self, ctx: &mut CallContext) -> Result<()>;

    async fn exit(&self, ctx: &mut CallContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Ordered collection of middleware for one level.
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the end of the stack (innermost so far).
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub(crate) fn layers(&self) -> &[Arc<dyn Middleware>] {
        &self.layers
    }
}
