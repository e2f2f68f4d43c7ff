use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{alternate_model_name, AlternateBackend, AlternateCall, Backend};
use super::continuation::{Continuation, ContinuationIter};
use super::executor::{BlockingReply, ChatRequest, Reply, RequestExecutor, RequestOptions};
use crate::config::Config;
use crate::types::MessagesInput;
use crate::Result;

/// Chat completion request parameters (developer-friendly, small surface).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: MessagesInput,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub stream: bool,
    pub options: RequestOptions,
    /// Keep requesting until the reply is no longer truncated.
    pub auto_concat_truncate: bool,
    /// Per-request override of the client's continuation cap; `Some(None)` is unbounded.
    pub max_continuation_rounds: Option<Option<u32>>,
    /// Extra model parameters (e.g. `temperature`), forwarded verbatim.
    pub params: Map<String, Value>,
}

impl CompletionRequest {
    pub fn new(messages: impl Into<MessagesInput>) -> Self {
        Self {
            messages: messages.into(),
            model: None,
            endpoint: None,
            stream: false,
            options: RequestOptions::default(),
            auto_concat_truncate: false,
            max_continuation_rounds: None,
            params: Map::new(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Custom endpoint name; the request goes to `/chat/{endpoint}`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn retry_count(mut self, n: u32) -> Self {
        self.options.retry_count = n;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.options.backoff_factor = factor;
        self
    }

    pub fn auto_concat_truncate(mut self, enable: bool) -> Self {
        self.auto_concat_truncate = enable;
        self
    }

    /// Cap continuation rounds for this request; `0` means unbounded.
    pub fn max_continuation_rounds(mut self, rounds: u32) -> Self {
        self.max_continuation_rounds = Some((rounds > 0).then_some(rounds));
        self
    }

    /// Add one extra model parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn temperature(self, t: f64) -> Self {
        self.param("temperature", t)
    }

    pub fn top_p(self, p: f64) -> Self {
        self.param("top_p", p)
    }
}

/// Normalized form of a [`CompletionRequest`].
struct Prepared {
    request: ChatRequest,
    auto_concat_truncate: bool,
    max_rounds: Option<u32>,
}

/// Chat completion entry point.
///
/// Every call owns its own working conversation, so one client can be shared
/// across tasks and threads.
pub struct ChatCompletion {
    pub(crate) config: Config,
    pub(crate) executor: Arc<dyn RequestExecutor>,
    pub(crate) alternate: Option<Arc<dyn AlternateBackend>>,
}

impl ChatCompletion {
    /// Client configured from the environment with the default HTTP executor.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> super::builder::ChatCompletionBuilder {
        super::builder::ChatCompletionBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a chat completion.
    ///
    /// Returns a single envelope or a stream depending on `req.stream`. With
    /// `auto_concat_truncate` a truncated reply is continued: the single envelope
    /// then holds the full text, and the stream carries the envelopes of every call.
    pub async fn complete(&self, req: CompletionRequest) -> Result<Reply> {
        let prepared = self.prepare(req)?;

        if let Backend::Alternate(backend) = self.backend(&prepared.request) {
            return backend.create(self.alternate_call(&prepared.request)).await;
        }

        let reply = self.executor.invoke(&prepared.request).await?;
        if !prepared.auto_concat_truncate {
            return Ok(reply);
        }

        let stream = prepared.request.stream;
        let continuation = Continuation::new(
            self.executor.clone(),
            prepared.request,
            prepared.max_rounds,
        );
        if stream {
            Ok(Reply::Stream(continuation.stream(reply.into_stream()?)))
        } else {
            let full = continuation.complete(reply.into_response()?).await?;
            Ok(Reply::Single(full))
        }
    }

    /// Blocking twin of [`ChatCompletion::complete`].
    ///
    /// Must not be called from within an async runtime.
    pub fn complete_blocking(&self, req: CompletionRequest) -> Result<BlockingReply> {
        let prepared = self.prepare(req)?;

        if let Backend::Alternate(backend) = self.backend(&prepared.request) {
            return backend.create_blocking(self.alternate_call(&prepared.request));
        }

        let reply = self.executor.invoke_blocking(&prepared.request)?;
        if !prepared.auto_concat_truncate {
            return Ok(reply);
        }

        let stream = prepared.request.stream;
        let continuation = Continuation::new(
            self.executor.clone(),
            prepared.request,
            prepared.max_rounds,
        );
        if stream {
            let iter: ContinuationIter = continuation.stream_blocking(reply.into_stream()?);
            Ok(BlockingReply::Stream(Box::new(iter)))
        } else {
            let full = continuation.complete_blocking(reply.into_response()?)?;
            Ok(BlockingReply::Single(full))
        }
    }

    fn prepare(&self, req: CompletionRequest) -> Result<Prepared> {
        let messages = req.messages.normalize()?;

        let unknown = crate::models::unknown_params(
            req.model.as_deref(),
            req.endpoint.as_deref(),
            &req.params,
        );
        if !unknown.is_empty() {
            warn!(
                model = req.model.as_deref().unwrap_or(crate::models::DEFAULT_MODEL),
                params = ?unknown,
                "parameters not documented for this model are forwarded as-is"
            );
        }

        debug!(
            model = ?req.model,
            endpoint = ?req.endpoint,
            stream = req.stream,
            messages = messages.len(),
            auto_concat_truncate = req.auto_concat_truncate,
            "dispatching chat completion"
        );

        Ok(Prepared {
            request: ChatRequest {
                model: req.model,
                endpoint: req.endpoint,
                stream: req.stream,
                messages,
                options: req.options,
                params: req.params,
            },
            auto_concat_truncate: req.auto_concat_truncate,
            max_rounds: req
                .max_continuation_rounds
                .unwrap_or(self.config.max_continuation_rounds),
        })
    }

    fn backend(&self, request: &ChatRequest) -> Backend<'_> {
        Backend::select(&self.config, self.alternate.as_ref(), request.model.as_deref())
    }

    fn alternate_call(&self, request: &ChatRequest) -> AlternateCall {
        let model = alternate_model_name(request.model.as_deref().unwrap_or_default());
        debug!(model = model.as_str(), "delegating chat completion to alternate backend");

        let mut params = request.params.clone();
        params.insert(
            "messages".to_string(),
            Value::Array(request.messages.to_records()),
        );
        AlternateCall {
            credentials: self.config.credentials.clone(),
            model,
            stream: request.stream,
            params,
        }
    }
}
