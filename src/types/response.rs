//! Response envelope: one complete or partial reply unit.

use crate::{Error, ErrorContext, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timing facts recorded by the request executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Round-trip of the HTTP exchange, or for a stream chunk the gap since the previous chunk.
    pub request_latency: Option<Duration>,
    /// Time until the first stream chunk arrived (streaming only).
    pub first_token_latency: Option<Duration>,
    /// Time from dispatch until this envelope was produced.
    pub total_latency: Option<Duration>,
    /// Dispatch time in milliseconds since the Unix epoch.
    pub start_timestamp: Option<u64>,
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One unit of model output.
///
/// The typed fields mirror the raw payload in `body`. For a streaming call the
/// `result` fragments of consecutive envelopes concatenate to the full output and
/// only the last envelope's `is_truncated` is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub result: String,
    pub is_truncated: bool,
    pub is_end: bool,
    /// The full raw response payload.
    pub body: Map<String, Value>,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub statistics: Statistics,
}

impl Response {
    /// Build an envelope from a raw payload.
    ///
    /// `result` must be a string and `is_truncated` a bool; `is_end` defaults to
    /// `true` when absent.
    pub fn from_body(body: Map<String, Value>) -> Result<Self> {
        let result = match body.get("result") {
            Some(Value::String(s)) => s.clone(),
            other => return Err(missing_field("result", "string", other)),
        };
        let is_truncated = match body.get("is_truncated") {
            Some(Value::Bool(b)) => *b,
            other => return Err(missing_field("is_truncated", "bool", other)),
        };
        let is_end = match body.get("is_end") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            other => return Err(missing_field("is_end", "bool", other)),
        };

        Ok(Self {
            result,
            is_truncated,
            is_end,
            body,
            status: 200,
            headers: HashMap::new(),
            statistics: Statistics::default(),
        })
    }

    /// Like [`Response::from_body`], for a payload that must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(body) => Self::from_body(body),
            other => Err(Error::malformed_with_context(
                "response payload is not a JSON object",
                ErrorContext::new()
                    .with_details(format!("got {}", json_type(&other)))
                    .with_source("response_envelope"),
            )),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_statistics(mut self, statistics: Statistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Raw payload lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Overwrite the reply text with the reassembled full text.
    ///
    /// Used exactly once, on the final envelope of a non-streaming continuation.
    pub fn replace_result(&mut self, text: String) {
        self.body
            .insert("result".to_string(), Value::String(text.clone()));
        self.result = text;
    }
}

fn missing_field(field: &str, expected: &str, got: Option<&Value>) -> Error {
    let details = match got {
        None => "missing".to_string(),
        Some(v) => format!("expected {}, got {}", expected, json_type(v)),
    };
    Error::malformed_with_context(
        format!("response has no usable `{}`", field),
        ErrorContext::new()
            .with_field_path(format!("body.{}", field))
            .with_details(details)
            .with_source("response_envelope"),
    )
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
