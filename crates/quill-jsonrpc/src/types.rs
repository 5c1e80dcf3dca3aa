use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC request identifier: a string or an integer.
///
/// Absence of an id marks a request as a notification; that is modelled as
/// `Option<RequestId>` on the envelope, not as a variant here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// The JSON-RPC protocol version marker, fixed to the literal `"2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JsonRpcVersion {
    #[default]
    #[serde(rename = "2.0")]
    V2_0,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_value};

    #[test]
    fn test_request_id_serialization() {
        assert_eq!(to_value(RequestId::Number(1)).unwrap(), json!(1));
        assert_eq!(
            to_value(RequestId::String("a".into())).unwrap(),
            json!("a")
        );
    }

    #[test]
    fn test_request_id_deserialization() {
        let id: RequestId = from_str("42").unwrap();
        assert_eq!(id, RequestId::Number(42));

        let id: RequestId = from_str("\"req-1\"").unwrap();
        assert_eq!(id, RequestId::String("req-1".to_string()));
    }

    #[test]
    fn test_version_round_trip() {
        assert_eq!(to_value(JsonRpcVersion::V2_0).unwrap(), json!("2.0"));
        let v: JsonRpcVersion = from_str("\"2.0\"").unwrap();
        assert_eq!(v, JsonRpcVersion::V2_0);
        assert!(from_str::<JsonRpcVersion>("\"1.0\"").is_err());
    }
}
