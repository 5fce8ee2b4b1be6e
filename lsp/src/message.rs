//! JSON-RPC 2.0 message model.
//!
//! Every frame on the wire decodes into exactly one [`Message`]. Classification
//! follows JSON-RPC: a `method` plus an `id` is a request, a `method` without an
//! `id` is a notification, and an `id` with `result` or `error` is a response.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::ProtocolError;

const JSONRPC_VERSION: &str = "2.0";

/// Request identifier. The client always allocates integers; servers may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// The JSON-RPC error object a server attaches to a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("server error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_CANCELLED: i64 = -32800;

    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Result<Value, RemoteError>,
}

impl Response {
    #[must_use]
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    #[must_use]
    pub fn err(id: RequestId, error: RemoteError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// One decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    #[must_use]
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    /// Encode as a JSON-RPC object. `params` is omitted (not `null`) when absent.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request(req) => {
                obj.insert("id".into(), id_to_value(&req.id));
                obj.insert("method".into(), Value::from(req.method.as_str()));
                if let Some(params) = &req.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification(notif) => {
                obj.insert("method".into(), Value::from(notif.method.as_str()));
                if let Some(params) = &notif.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response(resp) => {
                obj.insert("id".into(), id_to_value(&resp.id));
                match &resp.outcome {
                    Ok(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        obj.insert("error".into(), error_to_value(error));
                    }
                }
            }
        }
        Value::Object(obj)
    }

    /// Decode a JSON value into a message, rejecting anything that is not JSON-RPC 2.0.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::InvalidMessage(
                "message is not a JSON object".into(),
            ));
        };

        match obj.get("jsonrpc") {
            None => {}
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(ProtocolError::InvalidMessage(format!(
                    "unsupported jsonrpc version {other}"
                )));
            }
        }

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_id(raw)?),
        };

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(ProtocolError::InvalidMessage(
                    "method is not a string".into(),
                ));
            };
            let params = obj.remove("params");
            return Ok(match id {
                Some(id) => Self::Request(Request { id, method, params }),
                None => Self::Notification(Notification { method, params }),
            });
        }

        let has_result = obj.contains_key("result");
        let error = obj.remove("error").filter(|e| !e.is_null());
        if !has_result && error.is_none() {
            return Err(ProtocolError::InvalidMessage(
                "message has neither method nor result/error".into(),
            ));
        }
        let Some(id) = id else {
            return Err(ProtocolError::InvalidMessage(
                "response without a usable id".into(),
            ));
        };

        let outcome = match error {
            Some(error) => Err(serde_json::from_value::<RemoteError>(error).map_err(|e| {
                ProtocolError::InvalidMessage(format!("malformed error object: {e}"))
            })?),
            None => Ok(obj.remove("result").unwrap_or(Value::Null)),
        };
        Ok(Self::Response(Response { id, outcome }))
    }
}

fn parse_id(raw: Value) -> Result<RequestId, ProtocolError> {
    serde_json::from_value(raw.clone())
        .map_err(|_| ProtocolError::InvalidMessage(format!("invalid request id {raw}")))
}

fn id_to_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::String(s) => Value::from(s.as_str()),
    }
}

fn error_to_value(error: &RemoteError) -> Value {
    let mut obj = Map::new();
    obj.insert("code".into(), Value::from(error.code));
    obj.insert("message".into(), Value::from(error.message.as_str()));
    if let Some(data) = &error.data {
        obj.insert("data".into(), data.clone());
    }
    Value::Object(obj)
}
