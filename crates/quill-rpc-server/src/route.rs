//! Method routes: one registered JSON-RPC method and its call pipeline.
//!
//! A [`MethodRoute`] pairs a method name with a handler plus the route's own
//! middlewares, dependencies, required parameters, and declared error codes
//! (documentation metadata only). `run` drives one call through envelope
//! validation, name cross-check, method middleware entry, shared-dependency
//! failure replay, own-dependency resolution, parameter binding, and handler
//! invocation. Notifications detach the handler into the task registry.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{error, warn};

use quill_jsonrpc::{FieldError, JsonRpcResponse, RpcError};

use crate::context::CallContext;
use crate::dependencies::{
    Dependency, DependencyCache, DependencyKey, DependencySet, invalid_params_from_field_errors,
};
use crate::middleware::{Middleware, MiddlewareStack};
use crate::tasks::TaskRegistry;
use crate::transport::{HttpRequestParts, SharedSubResponse};
use crate::{Result, ServerError};

/// Everything a handler may touch for one call.
pub struct HandlerArgs {
    pub params: Map<String, Value>,
    pub dependencies: DependencyCache,
    pub http_request: Arc<HttpRequestParts>,
    pub sub_response: SharedSubResponse,
}

impl HandlerArgs {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn dependency(&self, key: DependencyKey) -> Option<&Value> {
        self.dependencies.get(key)
    }
}

/// The method body. Return value becomes the JSON-RPC `result` verbatim.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, args: HandlerArgs) -> Result<Value>;
}

type HandlerFn = Box<dyn Fn(HandlerArgs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

struct FnHandler {
    f: HandlerFn,
}

#[async_trait]
impl MethodHandler for FnHandler {
    async fn call(&self, args: HandlerArgs) -> Result<Value> {
        (self.f)(args).await
    }
}

/// A synchronous handler dispatched onto the blocking worker pool so it
/// never stalls the scheduler.
struct BlockingHandler<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> MethodHandler for BlockingHandler<F>
where
    F: Fn(HandlerArgs) -> Result<Value> + Send + Sync + 'static,
{
    async fn call(&self, args: HandlerArgs) -> Result<Value> {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || f(args)).await {
            Ok(result) => result,
            Err(join) => Err(ServerError::unhandled(join)),
        }
    }
}

/// Declared error code a method may legitimately emit. Documentation
/// metadata only, never consulted at runtime.
#[derive(Debug, Clone)]
pub struct DeclaredError {
    pub code: i64,
    pub message: String,
}

pub struct MethodRoute {
    name: String,
    handler: Arc<dyn MethodHandler>,
    required_params: Vec<String>,
    declared_errors: Vec<DeclaredError>,
    middlewares: MiddlewareStack,
    dependencies: DependencySet,
}

impl MethodRoute {
    pub fn new(name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            required_params: Vec::new(),
            declared_errors: Vec::new(),
            middlewares: MiddlewareStack::new(),
            dependencies: DependencySet::new(),
        }
    }

    /// Route backed by an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(
            name,
            Arc::new(FnHandler {
                f: Box::new(move |args| Box::pin(f(args))),
            }),
        )
    }

    /// Route backed by a blocking function, run on the worker pool.
    pub fn blocking<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HandlerArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(BlockingHandler { f: Arc::new(f) }))
    }

    /// Declare a required parameter; a call missing it fails Invalid Params.
    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.required_params.push(name.into());
        self
    }

    pub fn with_error(mut self, code: i64, message: impl Into<String>) -> Self {
        self.declared_errors.push(DeclaredError {
            code,
            message: message.into(),
        });
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_dependency(mut self, dep: Arc<dyn Dependency>) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_errors(&self) -> &[DeclaredError] {
        &self.declared_errors
    }

    /// Install an entrypoint-wide dependency ahead of the route's own.
    pub(crate) fn install_common_dependency(&mut self, dep: Arc<dyn Dependency>) {
        let mut deps = DependencySet::new();
        deps.push(dep);
        for own in std::mem::take(&mut self.dependencies).into_deps() {
            deps.push(own);
        }
        self.dependencies = deps;
    }

    /// Drive one call from envelope validation through handler completion.
    /// Entrypoint middlewares are already entered; the caller intercepts the
    /// returned failure and unwinds the context.
    pub(crate) async fn run(
        self: &Arc<Self>,
        ctx: &mut CallContext,
        tasks: &TaskRegistry,
        shared_cache: &DependencyCache,
        shared_error: Option<RpcError>,
    ) -> Result<()> {
        let request = ctx.request()?.clone();

        // routes are matched speculatively by sub-path; the body's declared
        // method is authoritative
        if request.method != self.name {
            return Err(RpcError::MethodNotFound.into());
        }

        ctx.enter_middlewares(self.middlewares.layers()).await?;

        // raised only after middleware entry, so every batch item observes
        // the same shared-dependency failure through its full scope stack
        if let Some(err) = shared_error {
            return Err(err.into());
        }

        let mut cache = shared_cache.snapshot();
        self.dependencies
            .resolve_into(ctx.http_request(), &request.params, &mut cache)
            .await?;
        self.bind_params(&request.params)?;

        let args = HandlerArgs {
            params: request.params.clone(),
            dependencies: cache,
            http_request: ctx.http_request().clone(),
            sub_response: ctx.sub_response().clone(),
        };

        // only a wholly absent id member detaches the handler: an explicit
        // `"id": null` is a call whose real result is echoed with id null
        if request.is_notification() && ctx.raw_request().get("id").is_none() {
            self.spawn_detached(ctx, tasks, args);
            // suppressed by fan-in: no error, no id
            ctx.record_response(serde_json::to_value(JsonRpcResponse::new(
                None,
                Value::Null,
            ))?);
        } else {
            let result = self.handler.call(args).await?;
            ctx.record_response(serde_json::to_value(JsonRpcResponse::new(None, result))?);
        }
        Ok(())
    }

    /// Fire-and-forget handler invocation for a notification. Failures still
    /// pass through the exception hook, just asynchronously, and surface
    /// only in the log.
    fn spawn_detached(&self, ctx: &CallContext, tasks: &TaskRegistry, args: HandlerArgs) {
        let handler = self.handler.clone();
        let hook = ctx.hook().clone();
        let method = self.name.clone();
        tasks.spawn(async move {
            if let Err(failure) = handler.call(args).await {
                match hook.transform(failure).await {
                    ServerError::Rpc(err) => {
                        warn!(method = %method, error = %err, "notification handler failed");
                    }
                    ServerError::Abort(abort) => {
                        warn!(method = %method, status = %abort.status,
                            "notification handler aborted");
                    }
                    ServerError::Unhandled(err) => {
                        error!(method = %method, error = %err,
                            "unhandled exception in notification handler");
                    }
                }
            }
        });
    }

    fn bind_params(&self, params: &Map<String, Value>) -> Result<()> {
        let missing: Vec<FieldError> = self
            .required_params
            .iter()
            .filter(|name| !params.contains_key(name.as_str()))
            .map(|name| FieldError::missing(["body".to_string(), name.clone()]))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(invalid_params_from_field_errors(missing).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_route() -> Arc<MethodRoute> {
        Arc::new(
            MethodRoute::from_fn("echo", |args: HandlerArgs| async move {
                Ok(args.param("data").cloned().unwrap_or(Value::Null))
            })
            .with_param("data"),
        )
    }

    #[test]
    fn test_builder_metadata() {
        let route = MethodRoute::from_fn("probe", |_| async { Ok(Value::Null) })
            .with_error(5000, "account locked")
            .with_error(6000, "quota exceeded");
        assert_eq!(route.name(), "probe");
        assert_eq!(route.declared_errors().len(), 2);
        assert_eq!(route.declared_errors()[0].code, 5000);
    }

    #[test]
    fn test_bind_params_reports_missing_field() {
        let route = MethodRoute::from_fn("m", |_| async { Ok(Value::Null) })
            .with_param("a")
            .with_param("b");

        let mut params = Map::new();
        params.insert("a".to_string(), json!(1));
        let err = route.bind_params(&params).unwrap_err();
        let ServerError::Rpc(RpcError::InvalidParams(errors)) = err else {
            panic!("expected InvalidParams");
        };
        // envelope prefix stripped, caller sees their own names
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].loc, vec!["b"]);
        assert_eq!(errors[0].kind, "value_error.missing");
    }

    #[tokio::test]
    async fn test_blocking_handler_runs_off_scheduler() {
        let route = MethodRoute::blocking("sum", |args: HandlerArgs| {
            let a = args.param("a").and_then(Value::as_i64).unwrap_or(0);
            let b = args.param("b").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(a + b))
        });
        let args = HandlerArgs {
            params: json!({"a": 2, "b": 3})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            dependencies: DependencyCache::new(),
            http_request: Arc::new(HttpRequestParts::post("/api", "")),
            sub_response: crate::transport::new_sub_response(),
        };
        assert_eq!(route.handler.call(args).await.unwrap(), json!(5));
    }

    #[test]
    fn test_common_dependency_installed_first() {
        let mut route = echo_route();
        let route_mut = Arc::get_mut(&mut route).unwrap();
        route_mut.install_common_dependency(Arc::new(crate::dependencies::FnDependency::new(
            "session",
            |_| async { Ok(json!("s")) },
        )));
        assert!(!route_mut.dependencies.is_empty());
    }
}
