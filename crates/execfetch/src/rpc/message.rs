//! JSON-RPC 2.0 message types spoken with the management endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i32 = -32601;
}

/// Management-specific error codes.
pub mod management_error_codes {
    /// No object is registered under the requested name.
    pub const INSTANCE_NOT_FOUND: i32 = -32001;
    /// The operation itself threw on the remote side.
    pub const OPERATION_FAILED: i32 = -32002;
    /// The operation could not be located or dispatched.
    pub const REFLECTION_FAILED: i32 = -32003;
    /// Credentials were rejected.
    pub const SECURITY: i32 = -32004;
}

/// Request identifier: a string, a number or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JsonRpcErrorObject,
}

/// Error object within a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Union type for any JSON-RPC message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
    Notification(JsonRpcNotification),
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        }
    }
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

impl JsonRpcError {
    pub fn new(id: RequestId, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code,
                message,
                data: None,
            },
        }
    }
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub service_url: String,
    pub environment: serde_json::Map<String, Value>,
}

/// Parameters of the `invoke` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeParams {
    pub object_name: String,
    pub operation: String,
    pub params: Vec<RemoteValue>,
    pub signature: Vec<String>,
}

/// A typed value crossing the management interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RemoteValue {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    List(Vec<RemoteValue>),
    /// A value whose type this client does not model, by its wire type name.
    #[serde(skip)]
    Opaque(String),
}

impl RemoteValue {
    /// Wire type names of the modelled variants.
    pub const TYPE_NAMES: [&'static str; 7] =
        ["null", "boolean", "long", "double", "string", "bytes", "list"];

    /// Name of the value's type as it appears on the wire.
    pub fn type_name(&self) -> &str {
        match self {
            RemoteValue::Null => "null",
            RemoteValue::Boolean(_) => "boolean",
            RemoteValue::Long(_) => "long",
            RemoteValue::Double(_) => "double",
            RemoteValue::String(_) => "string",
            RemoteValue::Bytes(_) => "bytes",
            RemoteValue::List(_) => "list",
            RemoteValue::Opaque(name) => name,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_are_base64() {
        let value = RemoteValue::Bytes(vec![0x01, 0xC0, 0xC0]);
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"type": "bytes", "value": "AcDA"}));
        let decoded: RemoteValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_type_names_cover_modelled_variants() {
        let values = [
            RemoteValue::Null,
            RemoteValue::Boolean(true),
            RemoteValue::Long(1),
            RemoteValue::Double(1.5),
            RemoteValue::String("s".to_string()),
            RemoteValue::Bytes(vec![1]),
            RemoteValue::List(Vec::new()),
        ];
        let names: Vec<&str> = values.iter().map(RemoteValue::type_name).collect();
        assert_eq!(names, RemoteValue::TYPE_NAMES);
    }

    #[test]
    fn test_null_value() {
        let decoded: RemoteValue = serde_json::from_value(json!({"type": "null"})).unwrap();
        assert_eq!(decoded.type_name(), "null");
    }

    #[test]
    fn test_invoke_params_shape() {
        let params = InvokeParams {
            object_name: "org.jacoco:type=Runtime".to_string(),
            operation: "getExecutionData".to_string(),
            params: vec![RemoteValue::Boolean(true)],
            signature: vec!["boolean".to_string()],
        };
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({
                "objectName": "org.jacoco:type=Runtime",
                "operation": "getExecutionData",
                "params": [{"type": "boolean", "value": true}],
                "signature": ["boolean"]
            })
        );
    }
}
