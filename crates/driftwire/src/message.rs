//! # Messages
//!
//! The two payloads that travel inside a frame. Parameters and results are opaque
//! self-describing values, so one wire format serves every service without generated
//! glue.

use serde::Deserialize;
use serde::Serialize;

use crate::endpoint::service_key;

/// Opaque argument and result value.
pub type Value = serde_json::Value;

/// Reserved call id marking a keep-alive request. Never answered.
pub const HEARTBEAT_CALL_ID: &str = "BEAT_PING_PONG";

/// Names the kind of a value, used as the parameter type descriptor.
pub fn type_descriptor(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One RPC invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub call_id: String,
    pub interface: String,
    pub method: String,
    #[serde(default)]
    pub parameter_types: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub version: String,
}

impl Request {
    /// Builds a request, deriving the parameter descriptors from the argument values.
    pub fn new(
        call_id: impl Into<String>,
        interface: impl Into<String>,
        method: impl Into<String>,
        version: impl Into<String>,
        parameters: Vec<Value>,
    ) -> Self {
        let parameter_types = parameters
            .iter()
            .map(|v| type_descriptor(v).to_string())
            .collect();

        Self {
            call_id: call_id.into(),
            interface: interface.into(),
            method: method.into(),
            parameter_types,
            parameters,
            version: version.into(),
        }
    }

    /// A keep-alive request: sentinel call id, no target, no arguments.
    pub fn heartbeat() -> Self {
        Self {
            call_id: HEARTBEAT_CALL_ID.to_string(),
            interface: String::new(),
            method: String::new(),
            parameter_types: Vec::new(),
            parameters: Vec::new(),
            version: String::new(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.call_id.eq_ignore_ascii_case(HEARTBEAT_CALL_ID)
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, &self.version)
    }
}

/// One RPC outcome. Exactly one of `error` and `result` is meaningful.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    pub fn ok(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: call_id.into(),
            error: None,
            result: Some(result),
        }
    }

    pub fn failed(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            error: Some(error.into()),
            result: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Splits the response into the remote result or the remote error string.
    ///
    /// A success carrying no result (a unit method) yields `Value::Null`.
    pub fn into_result(self) -> std::result::Result<Value, String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Everything a frame can carry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}
