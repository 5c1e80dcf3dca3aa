//! Dependency resolution contract and caches.
//!
//! A [`Dependency`] resolves a named value against the transport request and
//! a per-call parameter payload. Values are cached by dependency identity:
//! the entrypoint computes its shared set exactly once per HTTP request,
//! before batch fan-out; each call then resolves its own set against a
//! snapshot of the shared cache, so per-call resolution never mutates the
//! batch-wide values.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;

use quill_jsonrpc::{FieldError, RpcError};

use crate::transport::{HttpAbort, HttpRequestParts};
use crate::ServerError;

/// Stable identity of a dependency, used as the cache key.
pub type DependencyKey = &'static str;

/// Failure modes of dependency resolution.
#[derive(Debug, Error)]
pub enum DependencyError {
    /// Binding/validation failures, reported as Invalid Params with the
    /// location paths rewritten for the caller.
    #[error("dependency validation failed")]
    Validation(Vec<FieldError>),

    /// A recognized protocol or application error.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A transport-native abort; bypasses the JSON-RPC envelope.
    #[error(transparent)]
    Abort(#[from] HttpAbort),
}

impl DependencyError {
    pub(crate) fn into_rpc(self) -> std::result::Result<RpcError, HttpAbort> {
        match self {
            DependencyError::Validation(errors) => Ok(invalid_params_from_field_errors(errors)),
            DependencyError::Rpc(err) => Ok(err),
            DependencyError::Abort(abort) => Err(abort),
        }
    }
}

impl From<DependencyError> for ServerError {
    fn from(err: DependencyError) -> Self {
        match err.into_rpc() {
            Ok(rpc) => ServerError::Rpc(rpc),
            Err(abort) => ServerError::Abort(abort),
        }
    }
}

/// Rewrite validation locations for the caller's point of view: errors
/// rooted in the request body lose the `body` segment (the caller sees their
/// own parameter names), errors from any other source keep the source name
/// wrapped in angle brackets (e.g. `<header>`).
pub fn invalid_params_from_field_errors(errors: Vec<FieldError>) -> RpcError {
    let errors = errors
        .into_iter()
        .map(|mut err| {
            if err.loc.first().map(String::as_str) == Some("body") {
                err.loc.remove(0);
            } else if let Some(first) = err.loc.first_mut() {
                *first = format!("<{}>", first);
            }
            err
        })
        .collect();
    RpcError::InvalidParams(errors)
}

/// One resolvable input with a stable identity.
#[async_trait]
pub trait Dependency: Send + Sync {
    fn key(&self) -> DependencyKey;

    /// Resolve against the transport request and the call's parameter
    /// payload. `cache` exposes values resolved earlier in the same scope.
    async fn resolve(
        &self,
        request: &HttpRequestParts,
        params: &Map<String, Value>,
        cache: &DependencyCache,
    ) -> std::result::Result<Value, DependencyError>;
}

type DependencyFn =
    Box<dyn Fn(HttpRequestParts) -> BoxFuture<'static, std::result::Result<Value, DependencyError>> + Send + Sync>;

/// A dependency backed by an async closure over the transport request.
pub struct FnDependency {
    key: DependencyKey,
    resolver: DependencyFn,
}

impl FnDependency {
    pub fn new<F, Fut>(key: DependencyKey, f: F) -> Self
    where
        F: Fn(HttpRequestParts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, DependencyError>> + Send + 'static,
    {
        Self {
            key,
            resolver: Box::new(move |request| Box::pin(f(request))),
        }
    }
}

#[async_trait]
impl Dependency for FnDependency {
    fn key(&self) -> DependencyKey {
        self.key
    }

    async fn resolve(
        &self,
        request: &HttpRequestParts,
        _params: &Map<String, Value>,
        _cache: &DependencyCache,
    ) -> std::result::Result<Value, DependencyError> {
        (self.resolver)(request.clone()).await
    }
}

/// Per-scope map from dependency identity to resolved value.
#[derive(Debug, Default, Clone)]
pub struct DependencyCache {
    values: HashMap<DependencyKey, Value>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: DependencyKey) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: DependencyKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: DependencyKey, value: Value) {
        self.values.insert(key, value);
    }

    /// The per-call copy. The shared cache, once computed, is never mutated
    /// by per-call resolution.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}

/// Ordered set of declared dependencies for one scope.
#[derive(Default, Clone)]
pub struct DependencySet {
    deps: Vec<std::sync::Arc<dyn Dependency>>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dep: std::sync::Arc<dyn Dependency>) {
        self.deps.push(dep);
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub(crate) fn into_deps(self) -> Vec<std::sync::Arc<dyn Dependency>> {
        self.deps
    }

    /// Resolve every declared dependency into `cache`, in declaration order.
    /// Keys already present are not recomputed: a dependency is computed at
    /// most once per logical scope.
    pub async fn resolve_into(
        &self,
        request: &HttpRequestParts,
        params: &Map<String, Value>,
        cache: &mut DependencyCache,
    ) -> std::result::Result<(), DependencyError> {
        for dep in &self.deps {
            if cache.contains(dep.key()) {
                continue;
            }
            let value = dep.resolve(request, params, cache).await?;
            cache.insert(dep.key(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_dependency(key: DependencyKey, counter: Arc<AtomicUsize>) -> Arc<FnDependency> {
        Arc::new(FnDependency::new(key, move |_request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("resolved"))
            }
        }))
    }

    #[tokio::test]
    async fn test_resolved_once_per_scope() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = DependencySet::new();
        set.push(counting_dependency("session", counter.clone()));

        let request = HttpRequestParts::post("/api", "");
        let mut cache = DependencyCache::new();

        set.resolve_into(&request, &Map::new(), &mut cache).await.unwrap();
        set.resolve_into(&request, &Map::new(), &mut cache).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("session"), Some(&json!("resolved")));
    }

    #[tokio::test]
    async fn test_snapshot_isolates_per_call_resolution() {
        let mut shared = DependencyCache::new();
        shared.insert("session", json!("shared"));

        let mut local = shared.snapshot();
        local.insert("own", json!("local"));

        assert!(shared.get("own").is_none());
        assert_eq!(local.get("session"), Some(&json!("shared")));
    }

    #[test]
    fn test_location_rewriting() {
        let rpc = invalid_params_from_field_errors(vec![
            FieldError::missing(["body", "data"]),
            FieldError::missing(["header", "x-auth"]),
        ]);
        let RpcError::InvalidParams(errors) = rpc else {
            panic!("expected InvalidParams");
        };
        assert_eq!(errors[0].loc, vec!["data"]);
        assert_eq!(errors[1].loc, vec!["<header>", "x-auth"]);
    }

    #[tokio::test]
    async fn test_abort_passes_through() {
        let mut set = DependencySet::new();
        set.push(Arc::new(FnDependency::new("auth", |_request| async {
            Err(DependencyError::Abort(HttpAbort::new(
                http::StatusCode::UNAUTHORIZED,
            )))
        })));

        let request = HttpRequestParts::post("/api", "");
        let mut cache = DependencyCache::new();
        let err = set
            .resolve_into(&request, &Map::new(), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, DependencyError::Abort(_)));
    }
}
