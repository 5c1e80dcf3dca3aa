use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::error_codes;

/// One structured validation failure: a location path into the offending
/// document, a human-readable message and a stable machine-readable kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(
        loc: impl IntoIterator<Item = impl Into<String>>,
        msg: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            loc: loc.into_iter().map(Into::into).collect(),
            msg: msg.into(),
            kind: kind.into(),
        }
    }

    /// A required field was absent.
    pub fn missing(loc: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(loc, "field required", "value_error.missing")
    }

    /// The document (or a member) was not a JSON object.
    pub fn not_an_object(loc: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(loc, "value is not a valid dict", "type_error.dict")
    }
}

/// JSON-RPC error object: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

/// An application-defined error with a stable `(code, message)` pair and an
/// optional structured data payload.
///
/// Concrete kinds are declared by handler code; the dispatch engine maps them
/// to the wire verbatim. Codes must not collide with the reserved protocol
/// range; positive integers by convention.
pub trait ApplicationError: std::error::Error + Send + Sync + 'static {
    fn code(&self) -> i64;

    fn message(&self) -> &str;

    fn data(&self) -> Option<Value> {
        None
    }

    /// Pure mapping to the wire error object. Idempotent: converting the
    /// same error twice yields identical payloads.
    fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.message(), self.data())
    }
}

/// The protocol-level error taxonomy plus recognized application errors.
///
/// Each kind carries exactly one `(code, message)` pair; validation-shaped
/// kinds attach their `FieldError` list as `data.errors`.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Invalid JSON was received by the server
    #[error("[-32700] Parse error")]
    ParseError,

    /// The JSON sent is not a valid Request object
    #[error("[-32600] Invalid Request")]
    InvalidRequest(Vec<FieldError>),

    /// The method does not exist / is not available
    #[error("[-32601] Method not found")]
    MethodNotFound,

    /// Invalid method parameter(s)
    #[error("[-32602] Invalid params")]
    InvalidParams(Vec<FieldError>),

    /// Internal JSON-RPC error
    #[error("[-32603] Internal error")]
    InternalError,

    /// A recognized application-defined error
    #[error("[{}] {}", .0.code(), .0.message())]
    App(Arc<dyn ApplicationError>),
}

impl RpcError {
    pub fn app(err: impl ApplicationError) -> Self {
        RpcError::App(Arc::new(err))
    }

    pub fn invalid_request(errors: Vec<FieldError>) -> Self {
        RpcError::InvalidRequest(errors)
    }

    pub fn invalid_params(errors: Vec<FieldError>) -> Self {
        RpcError::InvalidParams(errors)
    }

    pub fn code(&self) -> i64 {
        match self {
            RpcError::ParseError => error_codes::PARSE_ERROR,
            RpcError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            RpcError::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            RpcError::InternalError => error_codes::INTERNAL_ERROR,
            RpcError::App(err) => err.code(),
        }
    }

    /// Pure mapping to the wire error object; never fails.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            RpcError::ParseError => {
                ErrorObject::new(error_codes::PARSE_ERROR, "Parse error", None)
            }
            RpcError::InvalidRequest(errors) => ErrorObject::new(
                error_codes::INVALID_REQUEST,
                "Invalid Request",
                Some(json!({ "errors": errors })),
            ),
            RpcError::MethodNotFound => {
                ErrorObject::new(error_codes::METHOD_NOT_FOUND, "Method not found", None)
            }
            RpcError::InvalidParams(errors) => ErrorObject::new(
                error_codes::INVALID_PARAMS,
                "Invalid params",
                Some(json!({ "errors": errors })),
            ),
            RpcError::InternalError => {
                ErrorObject::new(error_codes::INTERNAL_ERROR, "Internal error", None)
            }
            RpcError::App(err) => err.to_error_object(),
        }
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("Account locked")]
    struct AccountLocked;

    impl ApplicationError for AccountLocked {
        fn code(&self) -> i64 {
            6000
        }

        fn message(&self) -> &str {
            "Account locked"
        }

        fn data(&self) -> Option<Value> {
            Some(json!({"retry": false}))
        }
    }

    #[test]
    fn test_reserved_codes() {
        assert_eq!(RpcError::ParseError.code(), -32700);
        assert_eq!(RpcError::InvalidRequest(vec![]).code(), -32600);
        assert_eq!(RpcError::MethodNotFound.code(), -32601);
        assert_eq!(RpcError::InvalidParams(vec![]).code(), -32602);
        assert_eq!(RpcError::InternalError.code(), -32603);
    }

    #[test]
    fn test_validation_detail_attached_as_data() {
        let err = RpcError::InvalidParams(vec![FieldError::missing(["data"])]);
        let obj = err.to_error_object();
        assert_eq!(obj.message, "Invalid params");
        assert_eq!(
            obj.data,
            Some(json!({"errors": [
                {"loc": ["data"], "msg": "field required", "type": "value_error.missing"}
            ]}))
        );
    }

    #[test]
    fn test_application_error_mapping_is_idempotent() {
        let err = RpcError::app(AccountLocked);
        let first = serde_json::to_vec(&err.to_error_object()).unwrap();
        let second = serde_json::to_vec(&err.to_error_object()).unwrap();
        assert_eq!(first, second);
        assert_eq!(err.code(), 6000);
    }

    #[test]
    fn test_error_object_skips_absent_data() {
        let obj = RpcError::MethodNotFound.to_error_object();
        let json = serde_json::to_string(&obj).unwrap();
        assert!(!json.contains("data"));
        assert!(json.contains("Method not found"));
    }
}
