use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{JsonRpcVersion, RequestId};

/// A validated JSON-RPC request envelope.
///
/// `id` is absent for notifications. `params` is always an object; an
/// omitted member binds as the empty object, with required fields enforced
/// per method at binding time.
///
/// Values of this type are only produced by [`crate::validate_envelope`] (or
/// the constructors below); deserializing untrusted bodies directly would
/// lose the structured per-field error detail the engine reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// A request without an id: produces no response object.
    pub fn notification(method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Get a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_string};

    #[test]
    fn test_request_serialization() {
        let mut params = Map::new();
        params.insert("data".to_string(), json!("x"));
        let request = JsonRpcRequest::new(RequestId::Number(1), "echo", params);

        let json = to_string(&request).unwrap();
        let parsed: JsonRpcRequest = from_str(&json).unwrap();

        assert_eq!(parsed.id, Some(RequestId::Number(1)));
        assert_eq!(parsed.method, "echo");
        assert_eq!(parsed.param("data"), Some(&json!("x")));
    }

    #[test]
    fn test_notification_has_no_id_on_the_wire() {
        let request = JsonRpcRequest::notification("ping", Map::new());
        assert!(request.is_notification());

        let json = to_string(&request).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("params"));
    }
}
