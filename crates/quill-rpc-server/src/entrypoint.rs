//! The entrypoint dispatcher: a set of method routes mounted under one path.
//!
//! `handle_http_request` is the engine's single operation. It parses the
//! POST body, resolves the entrypoint's shared dependencies exactly once,
//! fans batch items out concurrently to their routes, fans the recorded
//! responses back in preserving request order, and assembles the transport
//! reply. Notifications produce no wire content; a batch of only
//! notifications yields an empty 200 body.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use quill_jsonrpc::{FieldError, RpcError, has_content};

use crate::context::{CallContext, error_response_value};
use crate::dependencies::{Dependency, DependencyCache, DependencySet};
use crate::middleware::{Middleware, MiddlewareStack};
use crate::route::MethodRoute;
use crate::tasks::TaskRegistry;
use crate::transport::{
    HttpAbort, HttpRequestParts, RpcHttpResponse, SharedSubResponse, new_sub_response,
};
use crate::ServerError;

/// Last chance to translate a failure before it is mapped to the wire.
///
/// Runs at every interception point. May convert one failure into another,
/// including turning a recognized error into an unhandled one (or the
/// reverse). The default is the identity.
#[async_trait]
pub trait ExceptionHook: Send + Sync {
    async fn transform(&self, failure: ServerError) -> ServerError {
        failure
    }
}

pub struct DefaultExceptionHook;

#[async_trait]
impl ExceptionHook for DefaultExceptionHook {}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("duplicate method name: {0}")]
    DuplicateMethod(String),
}

struct Inner {
    path: String,
    routes: HashMap<String, Arc<MethodRoute>>,
    shared_deps: DependencySet,
    middlewares: MiddlewareStack,
    hook: Arc<dyn ExceptionHook>,
    tasks: Arc<TaskRegistry>,
    limiter: Arc<Semaphore>,
}

/// The dispatcher for one mount path. Cheap to clone.
#[derive(Clone)]
pub struct Entrypoint {
    inner: Arc<Inner>,
}

pub struct EntrypointBuilder {
    path: String,
    routes: Vec<MethodRoute>,
    shared_deps: DependencySet,
    common_deps: Vec<Arc<dyn Dependency>>,
    middlewares: MiddlewareStack,
    hook: Arc<dyn ExceptionHook>,
    fan_out_limit: usize,
}

impl EntrypointBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            routes: Vec::new(),
            shared_deps: DependencySet::new(),
            common_deps: Vec::new(),
            middlewares: MiddlewareStack::new(),
            hook: Arc::new(DefaultExceptionHook),
            fan_out_limit: 64,
        }
    }

    pub fn method(mut self, route: MethodRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// A dependency resolved once per HTTP request, against the transport
    /// request only, before batch fan-out.
    pub fn shared_dependency(mut self, dep: Arc<dyn Dependency>) -> Self {
        self.shared_deps.push(dep);
        self
    }

    /// A dependency installed into every method route at registration,
    /// ahead of the route's own dependencies.
    pub fn common_dependency(mut self, dep: Arc<dyn Dependency>) -> Self {
        self.common_deps.push(dep);
        self
    }

    pub fn exception_hook(mut self, hook: Arc<dyn ExceptionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Ceiling on concurrently executing batch items.
    pub fn fan_out_limit(mut self, limit: usize) -> Self {
        self.fan_out_limit = limit.max(1);
        self
    }

    /// Registration fails fast on a duplicate method name.
    pub fn build(self) -> Result<Entrypoint, RegistrationError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for mut route in self.routes {
            for dep in self.common_deps.iter().rev() {
                route.install_common_dependency(dep.clone());
            }
            let name = route.name().to_string();
            if routes.insert(name.clone(), Arc::new(route)).is_some() {
                return Err(RegistrationError::DuplicateMethod(name));
            }
        }
        Ok(Entrypoint {
            inner: Arc::new(Inner {
                path: self.path,
                routes,
                shared_deps: self.shared_deps,
                middlewares: self.middlewares,
                hook: self.hook,
                tasks: Arc::new(TaskRegistry::new()),
                limiter: Arc::new(Semaphore::new(self.fan_out_limit)),
            }),
        })
    }
}

impl Entrypoint {
    pub fn builder(path: impl Into<String>) -> EntrypointBuilder {
        EntrypointBuilder::new(path)
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Wait for every detached notification handler spawned so far.
    pub async fn drain_notifications(&self) {
        self.inner.tasks.drain().await;
    }

    /// Serve one HTTP request: a single call or a batch posted to the mount
    /// path, or a single call posted to `{path}/{method}`. An [`HttpAbort`]
    /// raised anywhere inside propagates untouched.
    pub async fn handle_http_request(
        &self,
        request: HttpRequestParts,
    ) -> Result<RpcHttpResponse, HttpAbort> {
        let http_request = Arc::new(request);
        let sub_response = new_sub_response();
        let path = http_request.uri.path().to_string();

        let response = if path == self.inner.path {
            self.dispatch_body(&http_request, &sub_response).await?
        } else if let Some(method) = path
            .strip_prefix(self.inner.path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
        {
            let Some(route) = self.inner.routes.get(method) else {
                return Err(HttpAbort::not_found());
            };
            self.dispatch_sub_path(route.clone(), &http_request, &sub_response)
                .await?
        } else {
            return Err(HttpAbort::not_found());
        };

        Ok(response.apply(&sub_response))
    }

    /// A single, never-batch call addressed to one method by sub-path.
    async fn dispatch_sub_path(
        &self,
        route: Arc<MethodRoute>,
        http_request: &Arc<HttpRequestParts>,
        sub_response: &SharedSubResponse,
    ) -> Result<RpcHttpResponse, HttpAbort> {
        let raw = match parse_body(&http_request.body) {
            Ok(raw) => raw,
            Err(err) => return Ok(protocol_error_response(&err)),
        };

        let (shared_cache, shared_error) = self.resolve_shared(http_request).await?;
        let response = self
            .dispatch_item(
                Some(route),
                raw,
                http_request.clone(),
                sub_response.clone(),
                &shared_cache,
                shared_error,
            )
            .await?;

        if has_content(&response) {
            Ok(RpcHttpResponse::json(&response))
        } else {
            Ok(RpcHttpResponse::no_content())
        }
    }

    /// The mount-path flow: single object or batch array.
    async fn dispatch_body(
        &self,
        http_request: &Arc<HttpRequestParts>,
        sub_response: &SharedSubResponse,
    ) -> Result<RpcHttpResponse, HttpAbort> {
        let raw = match parse_body(&http_request.body) {
            Ok(raw) => raw,
            Err(err) => return Ok(protocol_error_response(&err)),
        };

        if raw.as_array().is_some_and(|items| items.is_empty()) {
            let err = RpcError::invalid_request(vec![FieldError::new(
                Vec::<String>::new(),
                "rpc call with an empty array",
                "value_error.empty",
            )]);
            return Ok(protocol_error_response(&err));
        }

        let (shared_cache, shared_error) = self.resolve_shared(http_request).await?;

        let (items, is_batch) = match raw {
            Value::Array(items) => (items, true),
            other => (vec![other], false),
        };

        let responses = if items.len() == 1 {
            // no fan-out for a lone item
            let item = items.into_iter().next().unwrap_or(Value::Null);
            let route = self.route_for(&item);
            vec![
                self.dispatch_item(
                    route,
                    item,
                    http_request.clone(),
                    sub_response.clone(),
                    &shared_cache,
                    shared_error,
                )
                .await?,
            ]
        } else {
            self.fan_out(items, http_request, sub_response, shared_cache, shared_error)
                .await?
        };

        let surviving: Vec<Value> = responses.into_iter().filter(has_content).collect();
        debug!(count = surviving.len(), is_batch, "dispatch complete");

        if !is_batch {
            return Ok(match surviving.into_iter().next() {
                Some(single) => RpcHttpResponse::json(&single),
                None => RpcHttpResponse::no_content(),
            });
        }
        if surviving.is_empty() {
            return Ok(RpcHttpResponse::no_content());
        }
        Ok(RpcHttpResponse::json(&Value::Array(surviving)))
    }

    /// One task per batch item, bounded by the fan-out limit. Awaiting the
    /// handles in spawn order restores request order on fan-in.
    async fn fan_out(
        &self,
        items: Vec<Value>,
        http_request: &Arc<HttpRequestParts>,
        sub_response: &SharedSubResponse,
        shared_cache: DependencyCache,
        shared_error: Option<RpcError>,
    ) -> Result<Vec<Value>, HttpAbort> {
        let shared_cache = Arc::new(shared_cache);
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let entrypoint = self.clone();
            let route = self.route_for(&item);
            let http_request = http_request.clone();
            let sub_response = sub_response.clone();
            let shared_cache = shared_cache.clone();
            let shared_error = shared_error.clone();
            let limiter = self.inner.limiter.clone();
            handles.push(tokio::spawn(async move {
                // the semaphore is never closed
                let _permit = limiter.acquire_owned().await.ok();
                entrypoint
                    .dispatch_item(
                        route,
                        item,
                        http_request,
                        sub_response,
                        &shared_cache,
                        shared_error,
                    )
                    .await
            }));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(response)) => responses.push(response),
                // abort wins; remaining in-flight items are abandoned
                Ok(Err(abort)) => return Err(abort),
                Err(join) => {
                    error!(error = %join, "batch item task failed");
                    responses.push(error_response_value(&RpcError::InternalError));
                }
            }
        }
        Ok(responses)
    }

    /// Run one item inside its own call context: enter entrypoint
    /// middlewares, delegate to the route (or raise Method Not Found inside
    /// the context, so middleware still observes it), intercept, unwind.
    async fn dispatch_item(
        &self,
        route: Option<Arc<MethodRoute>>,
        raw: Value,
        http_request: Arc<HttpRequestParts>,
        sub_response: SharedSubResponse,
        shared_cache: &DependencyCache,
        shared_error: Option<RpcError>,
    ) -> Result<Value, HttpAbort> {
        let mut ctx = CallContext::new(raw, http_request, sub_response, self.inner.hook.clone());

        let outcome = match ctx.enter_middlewares(self.inner.middlewares.layers()).await {
            Ok(()) => match route {
                Some(route) => {
                    route
                        .run(&mut ctx, &self.inner.tasks, shared_cache, shared_error)
                        .await
                }
                // a malformed envelope is Invalid Request; Method Not Found
                // is reserved for a valid envelope naming an unknown method
                None => match ctx.request() {
                    Ok(_) => Err(ServerError::Rpc(RpcError::MethodNotFound)),
                    Err(failure) => Err(failure),
                },
            },
            Err(failure) => Err(failure),
        };

        let mut abort = None;
        if let Err(failure) = outcome {
            if let Err(bypass) = ctx.intercept(failure).await {
                abort = Some(bypass);
            }
        }
        if let Err(bypass) = ctx.unwind().await {
            abort = Some(bypass);
        }

        match abort {
            Some(abort) => Err(abort),
            None => Ok(ctx.into_response()),
        }
    }

    /// Shared dependencies resolve against the transport request only, never
    /// a batch item. A failure is captured, not raised: every item must
    /// observe it uniformly. An abort returns immediately.
    async fn resolve_shared(
        &self,
        http_request: &Arc<HttpRequestParts>,
    ) -> Result<(DependencyCache, Option<RpcError>), HttpAbort> {
        let mut cache = DependencyCache::new();
        match self
            .inner
            .shared_deps
            .resolve_into(http_request, &Map::new(), &mut cache)
            .await
        {
            Ok(()) => Ok((cache, None)),
            Err(err) => match err.into_rpc() {
                Ok(rpc) => Ok((cache, Some(rpc))),
                Err(abort) => Err(abort),
            },
        }
    }

    fn route_for(&self, item: &Value) -> Option<Arc<MethodRoute>> {
        item.get("method")
            .and_then(Value::as_str)
            .and_then(|method| self.inner.routes.get(method))
            .cloned()
    }
}

fn parse_body(body: &[u8]) -> Result<Value, RpcError> {
    serde_json::from_slice(body).map_err(|_| RpcError::ParseError)
}

/// Map a protocol error with no call context behind it (malformed JSON,
/// empty batch) straight to the wire, id null.
fn protocol_error_response(err: &RpcError) -> RpcHttpResponse {
    RpcHttpResponse::json(&error_response_value(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::HandlerArgs;
    use serde_json::json;

    #[test]
    fn test_duplicate_method_rejected() {
        let result = Entrypoint::builder("/api/v1/jsonrpc")
            .method(MethodRoute::from_fn("probe", |_| async { Ok(Value::Null) }))
            .method(MethodRoute::from_fn("probe", |_| async { Ok(Value::Null) }))
            .build();
        assert!(matches!(
            result,
            Err(RegistrationError::DuplicateMethod(name)) if name == "probe"
        ));
    }

    #[test]
    fn test_parse_error_maps_directly() {
        let resp = protocol_error_response(&RpcError::ParseError);
        let body: Value = serde_json::from_slice(&resp.body.unwrap()).unwrap();
        assert_eq!(body["error"]["code"], json!(-32700));
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_mount_path_aborts() {
        let entrypoint = Entrypoint::builder("/api/v1/jsonrpc")
            .method(MethodRoute::from_fn("probe", |_: HandlerArgs| async {
                Ok(Value::Null)
            }))
            .build()
            .unwrap();

        let request = HttpRequestParts::post("/other", r#"{"jsonrpc":"2.0","id":1,"method":"probe"}"#);
        let abort = entrypoint.handle_http_request(request).await.unwrap_err();
        assert_eq!(abort.status, http::StatusCode::NOT_FOUND);
    }
}
