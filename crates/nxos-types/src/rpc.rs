//! JSON-RPC 2.0 envelope handling for the NX-API `cli` method.
//!
//! Requests are always sent as a batch (a JSON array), even for a single
//! command. Replies may arrive as a single object, an array of objects, or,
//! on some firmware, an array whose elements are themselves one-element
//! arrays.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Identifier echoed back by the device for each command of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Num(i64),
    Str(String),
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcId::Num(n) => write!(f, "{}", n),
            RpcId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RpcId {
    fn from(id: i64) -> Self {
        RpcId::Num(id)
    }
}

/// One CLI command with its caller-chosen id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCommand {
    pub id: i64,
    pub cmd: String,
}

/// An ordered set of commands sent in one HTTP request.
///
/// Ids are unique within a batch; order is preserved on the wire and the
/// device executes the commands in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcBatch {
    commands: Vec<RpcCommand>,
}

impl RpcBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch holding one command with id 1.
    pub fn single(cmd: impl Into<String>) -> Self {
        Self {
            commands: vec![RpcCommand {
                id: 1,
                cmd: cmd.into(),
            }],
        }
    }

    /// Appends a command, rejecting an id already present in the batch.
    pub fn push(&mut self, id: i64, cmd: impl Into<String>) -> Result<&mut Self, ParseError> {
        if self.commands.iter().any(|c| c.id == id) {
            return Err(ParseError::DuplicateCommandId(id));
        }
        self.commands.push(RpcCommand {
            id,
            cmd: cmd.into(),
        });
        Ok(self)
    }

    /// Builds a batch from `(id, command)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut commands = Vec::new();
        for (id, cmd) in pairs {
            if !seen.insert(id) {
                return Err(ParseError::DuplicateCommandId(id));
            }
            commands.push(RpcCommand {
                id,
                cmd: cmd.into(),
            });
        }
        Ok(Self { commands })
    }

    pub fn commands(&self) -> &[RpcCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Encodes the batch as the JSON array the device expects.
    pub fn encode(&self) -> Value {
        encode(self)
    }
}

/// Encodes a batch: one `{method, id, jsonrpc, params}` object per command.
pub fn encode(batch: &RpcBatch) -> Value {
    Value::Array(
        batch
            .commands
            .iter()
            .map(|c| {
                json!({
                    "method": "cli",
                    "id": c.id,
                    "jsonrpc": "2.0",
                    "params": { "cmd": c.cmd, "version": 1 },
                })
            })
            .collect(),
    )
}

/// A successful reply to one command.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: RpcId,
    /// May legitimately be `null`, which configuration commands return.
    pub result: Value,
}

impl RpcResponse {
    /// The command-specific structured output, if any.
    pub fn body(&self) -> Option<&Value> {
        self.result.get("body")
    }
}

/// Category of an [`RpcException`], derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    Invalid,
}

impl RpcErrorKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            RpcException::PARSE_ERROR => RpcErrorKind::ParseError,
            RpcException::INVALID_REQUEST => RpcErrorKind::InvalidRequest,
            RpcException::METHOD_NOT_FOUND => RpcErrorKind::MethodNotFound,
            RpcException::INVALID_PARAMS => RpcErrorKind::InvalidParams,
            RpcException::INTERNAL_ERROR => RpcErrorKind::InternalError,
            -32099..=-32000 => RpcErrorKind::ServerError,
            _ => RpcErrorKind::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcErrorKind::ParseError => "parse_error",
            RpcErrorKind::InvalidRequest => "invalid_request",
            RpcErrorKind::MethodNotFound => "method_not_found",
            RpcErrorKind::InvalidParams => "invalid_params",
            RpcErrorKind::InternalError => "internal_error",
            RpcErrorKind::ServerError => "server_error",
            RpcErrorKind::Invalid => "invalid",
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON-RPC protocol error, either reported by the device or raised
/// while decoding its reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct RpcException {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcException {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    pub fn kind(&self) -> RpcErrorKind {
        RpcErrorKind::from_code(self.code)
    }

    /// Builds an exception from an `error` object.
    fn from_error_object(obj: &Map<String, Value>) -> Self {
        let code = obj.get("code").and_then(Value::as_i64);
        let message = obj.get("message").and_then(Value::as_str);
        match (code, message) {
            (Some(code), Some(message)) => Self {
                code,
                message: message.to_string(),
                data: obj.get("data").cloned(),
            },
            _ => Self::internal(concat!(
                r#"invalid error response: "code" (negative number) "#,
                r#"and "message" (string) are required"#,
            )),
        }
    }
}

impl fmt::Display for RpcException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {}", data)?;
        }
        Ok(())
    }
}

/// Decodes a reply body into per-command results.
///
/// Either every response object in the body decodes, or the first
/// exception encountered is returned and no results are.
pub fn decode(body: &str) -> Result<Vec<RpcResponse>, RpcException> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| RpcException::parse(format!("invalid JSON response from server: {}", e)))?;

    match parsed {
        Value::Array(items) => items.iter().map(decode_element).collect(),
        other => Ok(vec![decode_object(&other)?]),
    }
}

fn decode_element(item: &Value) -> Result<RpcResponse, RpcException> {
    match item {
        Value::Array(nested) if nested.len() == 1 => decode_object(&nested[0]),
        Value::Array(nested) => Err(RpcException::internal(format!(
            "invalid server response: nested array with {} elements",
            nested.len()
        ))),
        other => decode_object(other),
    }
}

fn decode_object(value: &Value) -> Result<RpcResponse, RpcException> {
    let obj = value.as_object().ok_or_else(|| {
        RpcException::internal("invalid server response: expected a JSON object")
    })?;

    match obj.get("error") {
        Some(Value::Object(err)) => return Err(RpcException::from_error_object(err)),
        Some(Value::String(msg)) => return Err(RpcException::internal(msg.clone())),
        _ => {}
    }

    let id = obj
        .get("id")
        .and_then(|id| serde_json::from_value::<RpcId>(id.clone()).ok());

    match (id, obj.get("result")) {
        (Some(id), Some(result)) => Ok(RpcResponse {
            id,
            result: result.clone(),
        }),
        (id, _) => Err(RpcException::internal(format!(
            r#"invalid server response: neither "result" nor "error" fields found (id: {})"#,
            id.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string())
        ))),
    }
}
