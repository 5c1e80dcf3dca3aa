//! # JSON-RPC 2.0 Wire Layer
//!
//! Envelope types, strict envelope validation and the error taxonomy for a
//! JSON-RPC 2.0 server. This crate is pure data: no transport, no async
//! machinery, no dispatch logic.
//!
//! ## Features
//! - Request/response/error envelope types with exact wire shapes
//! - Strict envelope validation with structured, per-field error detail
//! - Protocol error taxonomy with the reserved JSON-RPC error codes
//! - Application-defined errors with stable `(code, message)` pairs

pub mod error;
pub mod request;
pub mod response;
pub mod types;
pub mod validate;

// Re-export main types
pub use error::{ApplicationError, ErrorObject, FieldError, RpcError};
pub use request::JsonRpcRequest;
pub use response::{JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse, has_content};
pub use types::{JsonRpcVersion, RequestId};
pub use validate::validate_envelope;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}
