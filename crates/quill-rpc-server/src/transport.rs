//! Transport abstraction consumed by the dispatcher.
//!
//! The engine never binds a socket; it works against the read-only
//! [`HttpRequestParts`] surface and produces an [`RpcHttpResponse`].
//! Handlers and middleware may adjust the shared [`SubResponse`], which is
//! folded into the final reply.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde_json::Value;
use thiserror::Error;

/// Read-only view of the transport request, shared by every item in a batch.
#[derive(Debug, Clone)]
pub struct HttpRequestParts {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequestParts {
    /// Convenience constructor for a JSON POST.
    pub fn post(path: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            uri: Uri::try_from(path).unwrap_or_default(),
            headers,
            body: body.into(),
        }
    }

    /// Get a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Mutable response surface handler code may adjust (status, headers).
///
/// One instance per HTTP request, shared by all items in a batch; concurrent
/// writes are last-write-wins.
#[derive(Debug, Default)]
pub struct SubResponse {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
}

/// The batch-wide shared handle to the [`SubResponse`].
pub type SharedSubResponse = Arc<Mutex<SubResponse>>;

pub(crate) fn new_sub_response() -> SharedSubResponse {
    Arc::new(Mutex::new(SubResponse::default()))
}

/// The assembled transport-level reply.
#[derive(Debug, Clone)]
pub struct RpcHttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RpcHttpResponse {
    /// A JSON body with status 200.
    pub fn json(content: &Value) -> Self {
        // serialization of a Value cannot fail: map keys are always strings
        let body = serde_json::to_vec(content).unwrap_or_default();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status: StatusCode::OK,
            headers,
            body: Some(Bytes::from(body)),
        }
    }

    /// The empty reply for suppressed notifications: status 200, no body.
    pub fn no_content() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status: StatusCode::OK,
            headers,
            body: None,
        }
    }

    /// Fold the batch-shared sub-response into this reply: headers are
    /// appended, an explicit status overrides the default.
    pub(crate) fn apply(mut self, sub: &SharedSubResponse) -> Self {
        let sub = sub.lock().unwrap_or_else(|e| e.into_inner());
        for (name, value) in sub.headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }
        if let Some(status) = sub.status {
            self.status = status;
        }
        self
    }
}

/// A transport-native abort: "this is not a JSON-RPC concern".
///
/// The one and only bypass kind. It propagates through every layer of the
/// engine untouched — it is never converted to a JSON-RPC error response —
/// and is handled only by the surrounding transport.
#[derive(Debug, Clone, Error)]
#[error("http abort: {status}")]
pub struct HttpAbort {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpAbort {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub(crate) fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// Render the abort as a transport reply.
    pub fn into_response(self) -> RpcHttpResponse {
        RpcHttpResponse {
            status: self.status,
            headers: self.headers,
            body: Some(self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_response() {
        let resp = RpcHttpResponse::json(&json!({"jsonrpc": "2.0", "id": 1, "result": "x"}));
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            resp.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        assert!(resp.body.is_some());
    }

    #[test]
    fn test_no_content_has_empty_body() {
        let resp = RpcHttpResponse::no_content();
        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.body.is_none());
    }

    #[test]
    fn test_sub_response_folding() {
        let sub = new_sub_response();
        {
            let mut guard = sub.lock().unwrap();
            guard.status = Some(StatusCode::CREATED);
            guard
                .headers
                .insert("x-trace", HeaderValue::from_static("abc"));
        }

        let resp = RpcHttpResponse::no_content().apply(&sub);
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(
            resp.headers.get("x-trace").and_then(|v| v.to_str().ok()),
            Some("abc")
        );
    }

    #[test]
    fn test_abort_round_trip() {
        let abort = HttpAbort::new(StatusCode::UNAUTHORIZED).with_body("denied");
        let resp = abort.into_response();
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp.body, Some(Bytes::from("denied")));
    }
}
