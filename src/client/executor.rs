//! Request executor contract: one model invocation, blocking or async.

use crate::types::{Messages, Response};
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Async sequence of envelopes produced by one streaming call.
pub type ResponseStream = BoxStream<'static, Response>;

/// Blocking sequence of envelopes produced by one streaming call.
pub type ResponseIter = Box<dyn Iterator<Item = Result<Response>> + Send + 'static>;

/// Per-call transport knobs, honored by the executor only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    /// Total number of attempts (values below 1 are treated as 1).
    pub retry_count: u32,
    pub request_timeout: Duration,
    /// Base of the exponential backoff between attempts, in seconds.
    pub backoff_factor: f64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retry_count: 1,
            request_timeout: Duration::from_secs(60),
            backoff_factor: 0.0,
        }
    }
}

/// One fully normalized model invocation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub stream: bool,
    pub messages: Messages,
    pub options: RequestOptions,
    /// Extra model parameters, forwarded verbatim.
    pub params: Map<String, Value>,
}

impl ChatRequest {
    /// JSON body: extra params plus `messages` and `stream`.
    pub fn body(&self) -> Value {
        let mut body = self.params.clone();
        body.insert(
            "messages".to_string(),
            Value::Array(self.messages.to_records()),
        );
        body.insert("stream".to_string(), Value::Bool(self.stream));
        Value::Object(body)
    }

    /// Same call with a different conversation and streaming mode.
    pub(crate) fn follow_up(&self, messages: &Messages, stream: bool) -> Self {
        Self {
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            stream,
            messages: messages.clone(),
            options: self.options,
            params: self.params.clone(),
        }
    }
}

/// Result of an async invocation.
pub enum Reply {
    Single(Response),
    Stream(ResponseStream),
}

impl Reply {
    pub fn is_stream(&self) -> bool {
        matches!(self, Reply::Stream(_))
    }

    /// The single envelope; a stream here means the executor ignored `stream = false`.
    pub fn into_response(self) -> Result<Response> {
        match self {
            Reply::Single(resp) => Ok(resp),
            Reply::Stream(_) => Err(mismatch("expected a single response, got a stream")),
        }
    }

    /// The stream; a single envelope here means the executor ignored `stream = true`.
    pub fn into_stream(self) -> Result<ResponseStream> {
        match self {
            Reply::Stream(s) => Ok(s),
            Reply::Single(_) => Err(mismatch("expected a stream, got a single response")),
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Single(resp) => f.debug_tuple("Single").field(resp).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of a blocking invocation.
pub enum BlockingReply {
    Single(Response),
    Stream(ResponseIter),
}

impl BlockingReply {
    pub fn is_stream(&self) -> bool {
        matches!(self, BlockingReply::Stream(_))
    }

    pub fn into_response(self) -> Result<Response> {
        match self {
            BlockingReply::Single(resp) => Ok(resp),
            BlockingReply::Stream(_) => {
                Err(mismatch("expected a single response, got a stream"))
            }
        }
    }

    pub fn into_stream(self) -> Result<ResponseIter> {
        match self {
            BlockingReply::Stream(it) => Ok(it),
            BlockingReply::Single(_) => Err(mismatch("expected a stream, got a single response")),
        }
    }
}

impl std::fmt::Debug for BlockingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockingReply::Single(resp) => f.debug_tuple("Single").field(resp).finish(),
            BlockingReply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

fn mismatch(msg: &str) -> Error {
    Error::contract_with_context(msg, ErrorContext::new().with_source("request_executor"))
}

/// Performs a single model invocation.
///
/// Implementations own transport, timeouts and retries, and must return a stream
/// exactly when `request.stream` is set.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn invoke(&self, request: &ChatRequest) -> Result<Reply>;

    fn invoke_blocking(&self, request: &ChatRequest) -> Result<BlockingReply>;
}
