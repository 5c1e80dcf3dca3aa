//! Per-call context: the scoped state machine for one JSON-RPC item.
//!
//! A batch of N items creates N contexts sharing one transport request and
//! one sub-response. The context carries the raw item, the lazily validated
//! envelope, the recorded wire response and failure state, and the LIFO
//! stack of entered middleware scopes. Failures anywhere inside the
//! context's scope are intercepted here, converted through the entrypoint's
//! exception hook, and recorded — they never cross the context boundary
//! except as an [`HttpAbort`].

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use quill_jsonrpc::{JsonRpcErrorResponse, JsonRpcRequest, RpcError, validate_envelope};

use crate::entrypoint::ExceptionHook;
use crate::middleware::Middleware;
use crate::transport::{HttpAbort, HttpRequestParts, SharedSubResponse};
use crate::{Result, ServerError};

pub struct CallContext {
    raw_request: Value,
    http_request: Arc<HttpRequestParts>,
    sub_response: SharedSubResponse,
    hook: Arc<dyn ExceptionHook>,
    /// Validated envelope, set exactly once on first successful validation.
    /// Failures are not cached.
    validated: Option<JsonRpcRequest>,
    raw_response: Option<Value>,
    failure: Option<ServerError>,
    unhandled: bool,
    /// Entered middleware scopes, exited in reverse order.
    scopes: Vec<Arc<dyn Middleware>>,
}

impl CallContext {
    pub(crate) fn new(
        raw_request: Value,
        http_request: Arc<HttpRequestParts>,
        sub_response: SharedSubResponse,
        hook: Arc<dyn ExceptionHook>,
    ) -> Self {
        Self {
            raw_request,
            http_request,
            sub_response,
            hook,
            validated: None,
            raw_response: None,
            failure: None,
            unhandled: false,
            scopes: Vec::new(),
        }
    }

    /// The raw (pre-validation) item payload.
    pub fn raw_request(&self) -> &Value {
        &self.raw_request
    }

    pub fn http_request(&self) -> &Arc<HttpRequestParts> {
        &self.http_request
    }

    pub fn sub_response(&self) -> &SharedSubResponse {
        &self.sub_response
    }

    /// The request's `method` member, if the raw payload carries one.
    pub fn method(&self) -> Option<&str> {
        self.raw_request.get("method").and_then(Value::as_str)
    }

    /// The call's recorded failure, observable by middleware exits.
    pub fn failure(&self) -> Option<&ServerError> {
        self.failure.as_ref()
    }

    pub fn is_unhandled(&self) -> bool {
        self.unhandled
    }

    pub fn response(&self) -> Option<&Value> {
        self.raw_response.as_ref()
    }

    pub(crate) fn hook(&self) -> &Arc<dyn ExceptionHook> {
        &self.hook
    }

    /// The validated envelope, computed on first access.
    pub fn request(&mut self) -> Result<&JsonRpcRequest> {
        if self.validated.is_none() {
            let request = validate_envelope(&self.raw_request)
                .map_err(RpcError::invalid_request)?;
            self.validated = Some(request);
        }
        // set just above, or on an earlier call
        self.validated
            .as_ref()
            .ok_or(ServerError::Rpc(RpcError::InternalError))
    }

    /// Record the call's wire response, stamping the request id onto it:
    /// the original id is echoed verbatim when present; an error response
    /// without a determinable id gets `id: null`; a success response for a
    /// notification stays id-less.
    pub fn record_response(&mut self, response: Value) {
        self.record(response, None, false);
    }

    fn record(&mut self, mut response: Value, failure: Option<ServerError>, unhandled: bool) {
        if let Some(obj) = response.as_object_mut() {
            obj.remove("id");
            if let Some(id) = self.raw_request.as_object().and_then(|req| req.get("id")) {
                obj.insert("id".to_string(), id.clone());
            } else if obj.contains_key("error") {
                obj.insert("id".to_string(), Value::Null);
            }
        }
        self.raw_response = Some(response);
        self.failure = failure;
        self.unhandled = unhandled;
    }

    /// The nearest-enclosing interception point. Resolves the failure
    /// through the entrypoint's exception hook and records the resulting
    /// wire response; an [`HttpAbort`] is never converted and re-propagates.
    pub(crate) async fn intercept(&mut self, failure: ServerError) -> std::result::Result<(), HttpAbort> {
        match self.hook.transform(failure).await {
            ServerError::Abort(abort) => {
                self.raw_response = None;
                self.failure = Some(ServerError::Abort(abort.clone()));
                self.unhandled = false;
                Err(abort)
            }
            ServerError::Rpc(err) => {
                let response = error_response_value(&err);
                self.record(response, Some(ServerError::Rpc(err)), false);
                Ok(())
            }
            ServerError::Unhandled(err) => {
                let response = error_response_value(&RpcError::InternalError);
                self.record(response, Some(ServerError::Unhandled(err)), true);
                Ok(())
            }
        }
    }

    /// Enter middlewares in declared order, pushing each onto the exit
    /// stack. A failing `enter` leaves the failing layer (and everything
    /// after it) un-entered; scopes entered so far still unwind.
    pub(crate) async fn enter_middlewares(
        &mut self,
        middlewares: &[Arc<dyn Middleware>],
    ) -> Result<()> {
        for middleware in middlewares {
            middleware.enter(self).await?;
            self.scopes.push(middleware.clone());
        }
        Ok(())
    }

    /// Unwind all entered scopes in reverse order — guaranteed, even after a
    /// failure. An exit failure is intercepted like any other and replaces
    /// the recorded response. This is also the outermost interception point:
    /// a genuinely unhandled failure is logged here, in full, exactly once.
    pub(crate) async fn unwind(&mut self) -> std::result::Result<(), HttpAbort> {
        let mut abort = None;
        while let Some(scope) = self.scopes.pop() {
            if let Err(failure) = scope.exit(self).await {
                if let Err(bypass) = self.intercept(failure).await {
                    abort = Some(bypass);
                }
            }
        }

        if self.unhandled {
            if let Some(failure) = &self.failure {
                error!(error = %failure, method = self.method().unwrap_or("<unknown>"),
                    "unhandled exception in JSON-RPC call");
            }
        }

        match abort {
            Some(abort) => Err(abort),
            None => Ok(()),
        }
    }

    /// The authoritative result of the call, once unwound.
    pub(crate) fn into_response(mut self) -> Value {
        self.raw_response.take().unwrap_or(Value::Null)
    }
}

/// Build the wire form of a recognized error, with `id: null` until the
/// context stamps the real id.
pub(crate) fn error_response_value(err: &RpcError) -> Value {
    let response = JsonRpcErrorResponse::new(None, err.to_error_object());
    serde_json::to_value(response).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrypoint::DefaultExceptionHook;
    use crate::transport::new_sub_response;
    use serde_json::json;

    fn context_for(raw: Value) -> CallContext {
        CallContext::new(
            raw,
            Arc::new(HttpRequestParts::post("/api", "")),
            new_sub_response(),
            Arc::new(DefaultExceptionHook),
        )
    }

    #[test]
    fn test_id_stamped_from_request() {
        let mut ctx = context_for(json!({"jsonrpc": "2.0", "id": 7, "method": "m"}));
        ctx.record_response(json!({"jsonrpc": "2.0", "result": "ok"}));
        assert_eq!(
            ctx.response(),
            Some(&json!({"jsonrpc": "2.0", "result": "ok", "id": 7}))
        );
    }

    #[test]
    fn test_error_without_id_gets_null() {
        let mut ctx = context_for(json!("not an object"));
        ctx.record_response(error_response_value(&RpcError::MethodNotFound));
        let resp = ctx.response().unwrap();
        assert_eq!(resp.get("id"), Some(&Value::Null));
    }

    #[test]
    fn test_notification_success_stays_id_less() {
        let mut ctx = context_for(json!({"jsonrpc": "2.0", "method": "m"}));
        ctx.record_response(json!({"jsonrpc": "2.0", "result": null}));
        assert_eq!(ctx.response().unwrap().get("id"), None);
    }

    #[tokio::test]
    async fn test_validation_failure_not_cached() {
        let mut ctx = context_for(json!({"jsonrpc": "2.0", "id": 1, "method": "m"}));
        assert!(ctx.request().is_ok());
        // second access reuses the cached envelope
        assert_eq!(ctx.request().unwrap().method, "m");

        let mut bad = context_for(json!(42));
        assert!(bad.request().is_err());
        assert!(bad.validated.is_none());
    }

    #[tokio::test]
    async fn test_intercept_records_error_and_failure() {
        let mut ctx = context_for(json!({"jsonrpc": "2.0", "id": 3, "method": "m"}));
        ctx.intercept(ServerError::Rpc(RpcError::MethodNotFound))
            .await
            .unwrap();

        let resp = ctx.response().unwrap();
        assert_eq!(resp["error"]["code"], json!(-32601));
        assert_eq!(resp["id"], json!(3));
        assert!(ctx.failure().is_some());
        assert!(!ctx.is_unhandled());
    }

    #[tokio::test]
    async fn test_intercept_downgrades_unhandled() {
        let mut ctx = context_for(json!({"jsonrpc": "2.0", "id": 3, "method": "m"}));
        ctx.intercept(ServerError::unhandled("database exploded"))
            .await
            .unwrap();

        let resp = ctx.response().unwrap();
        assert_eq!(resp["error"]["code"], json!(-32603));
        // no leaked internal detail on the wire
        assert_eq!(resp["error"].get("data"), None);
        assert!(ctx.is_unhandled());
    }

    #[tokio::test]
    async fn test_abort_bypasses_conversion() {
        let mut ctx = context_for(json!({"jsonrpc": "2.0", "id": 3, "method": "m"}));
        let abort = ctx
            .intercept(ServerError::Abort(HttpAbort::new(
                http::StatusCode::UNAUTHORIZED,
            )))
            .await
            .unwrap_err();
        assert_eq!(abort.status, http::StatusCode::UNAUTHORIZED);
        assert!(ctx.response().is_none());
    }
}
