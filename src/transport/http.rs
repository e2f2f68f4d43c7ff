use super::sse::{decode_stream, SseFrames};
use crate::client::policy::{Decision, RetryPolicy};
use crate::client::{
    BlockingReply, ChatRequest, Reply, RequestExecutor, ResponseIter, ResponseStream,
};
use crate::config::Config;
use crate::types::response::unix_millis;
use crate::types::{Response, Statistics};
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::BufReader;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const BCE_ERROR_CODE_HEADER: &str = "X-Bce-Error-Code";
const BCE_ERROR_MESSAGE_HEADER: &str = "X-Bce-Error-Message";

/// Request executor speaking the Qianfan chat HTTP API.
///
/// The async client is created eagerly; the blocking one on first blocking call,
/// since reqwest's blocking client must not be built inside an async runtime.
pub struct HttpTransport {
    client: reqwest::Client,
    blocking: OnceCell<reqwest::blocking::Client>,
    base_url: String,
    access_token: Option<String>,
    retry_err_codes: HashSet<i64>,
    max_wait_interval: Duration,
    retry_jitter: f64,
}

/// Timing anchor of one attempt.
#[derive(Clone, Copy)]
struct Clock {
    start: Instant,
    start_timestamp: u64,
}

impl Clock {
    fn start() -> Self {
        Self {
            start: Instant::now(),
            start_timestamp: unix_millis(),
        }
    }
}

/// Per-chunk statistics of one stream.
struct ChunkTimer {
    clock: Clock,
    first_token_latency: Duration,
    last_chunk: Option<Instant>,
}

impl ChunkTimer {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            first_token_latency: clock.start.elapsed(),
            last_chunk: None,
        }
    }

    fn tick(&mut self) -> Statistics {
        let now = Instant::now();
        let request_latency = match self.last_chunk {
            Some(prev) => now - prev,
            None => self.first_token_latency,
        };
        self.last_chunk = Some(now);
        Statistics {
            request_latency: Some(request_latency),
            first_token_latency: Some(self.first_token_latency),
            total_latency: Some(now - self.clock.start),
            start_timestamp: Some(self.clock.start_timestamp),
        }
    }
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;

        Ok(Self {
            client,
            blocking: OnceCell::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.credentials.access_token.clone(),
            retry_err_codes: config.retry_err_codes.clone(),
            max_wait_interval: config.max_wait_interval,
            retry_jitter: config.retry_jitter,
        })
    }

    fn url(&self, request: &ChatRequest) -> Result<String> {
        let path = crate::models::resolve_endpoint(
            request.model.as_deref(),
            request.endpoint.as_deref(),
        )?;
        Ok(format!("{}{}", self.base_url, path))
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        self.access_token
            .as_deref()
            .map(|token| vec![("access_token", token)])
            .unwrap_or_default()
    }

    fn policy(&self, request: &ChatRequest) -> RetryPolicy {
        RetryPolicy::new(&request.options, &self.retry_err_codes, self.max_wait_interval)
            .with_jitter(self.retry_jitter)
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client> {
        self.blocking
            .get_or_try_init(|| {
                reqwest::blocking::Client::builder()
                    .pool_idle_timeout(Some(Duration::from_secs(90)))
                    .build()
            })
            .map_err(Error::from)
    }

    async fn with_retry<T, F, Fut>(&self, request: &ChatRequest, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.policy(request);
        let mut attempt = 0u32;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => match policy.decide(&err, attempt) {
                    Decision::Retry { delay } => {
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying chat request"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        attempt += 1;
                    }
                    Decision::Fail => {
                        error!(attempts = attempt + 1, error = %err, "chat request failed");
                        return Err(err);
                    }
                },
            }
        }
    }

    fn with_retry_blocking<T>(
        &self,
        request: &ChatRequest,
        mut attempt_fn: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let policy = self.policy(request);
        let mut attempt = 0u32;
        loop {
            match attempt_fn() {
                Ok(value) => return Ok(value),
                Err(err) => match policy.decide(&err, attempt) {
                    Decision::Retry { delay } => {
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying chat request"
                        );
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                        attempt += 1;
                    }
                    Decision::Fail => {
                        error!(attempts = attempt + 1, error = %err, "chat request failed");
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn send(&self, request: &ChatRequest, url: &str) -> Result<reqwest::Response> {
        let request_id = Uuid::new_v4().to_string();
        debug!(
            request_id = request_id.as_str(),
            url,
            stream = request.stream,
            "sending chat request"
        );

        let resp = self
            .client
            .post(url)
            .query(&self.query())
            .timeout(request.options.request_timeout)
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .json(&request.body())
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let text = resp.text().await.unwrap_or_default();
        Err(status_error(status, &headers, text))
    }

    fn send_blocking(
        &self,
        request: &ChatRequest,
        url: &str,
    ) -> Result<reqwest::blocking::Response> {
        let request_id = Uuid::new_v4().to_string();
        debug!(
            request_id = request_id.as_str(),
            url,
            stream = request.stream,
            "sending chat request"
        );

        let resp = self
            .blocking_client()?
            .post(url)
            .query(&self.query())
            .timeout(request.options.request_timeout)
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .json(&request.body())
            .send()?;

        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let text = resp.text().unwrap_or_default();
        Err(status_error(status, &headers, text))
    }

    async fn single(&self, request: &ChatRequest, url: &str) -> Result<Response> {
        let clock = Clock::start();
        let resp = self.send(request, url).await?;
        let status = resp.status().as_u16();
        let headers = header_map(resp.headers());
        let text = resp.text().await?;
        finish_single(status, headers, &text, clock)
    }

    fn single_blocking(&self, request: &ChatRequest, url: &str) -> Result<Response> {
        let clock = Clock::start();
        let resp = self.send_blocking(request, url)?;
        let status = resp.status().as_u16();
        let headers = header_map(resp.headers());
        let text = resp.text()?;
        finish_single(status, headers, &text, clock)
    }

    async fn open_stream(&self, request: &ChatRequest, url: &str) -> Result<ResponseStream> {
        let clock = Clock::start();
        let resp = self.send(request, url).await?;
        let status = resp.status().as_u16();
        let headers = header_map(resp.headers());

        if is_json(resp.headers()) {
            let text = resp.text().await?;
            return Err(unexpected_json(status, &text));
        }

        let mut timer = ChunkTimer::new(clock);
        let bytes: BoxStream<'static, Bytes> = Box::pin(resp.bytes_stream().map_err(Error::from));
        let stream = decode_stream(bytes).map(move |item: Result<Value>| -> Result<Response> {
            let response = chunk(item?)?;
            Ok(response
                .with_status(status)
                .with_headers(headers.clone())
                .with_statistics(timer.tick()))
        });
        Ok(Box::pin(stream))
    }

    fn open_stream_blocking(&self, request: &ChatRequest, url: &str) -> Result<ResponseIter> {
        let clock = Clock::start();
        let resp = self.send_blocking(request, url)?;
        let status = resp.status().as_u16();
        let headers = header_map(resp.headers());

        if is_json(resp.headers()) {
            let text = resp.text()?;
            return Err(unexpected_json(status, &text));
        }

        let mut timer = ChunkTimer::new(clock);
        let iter = SseFrames::new(BufReader::new(resp)).map(move |item| -> Result<Response> {
            let response = chunk(item?)?;
            Ok(response
                .with_status(status)
                .with_headers(headers.clone())
                .with_statistics(timer.tick()))
        });
        Ok(Box::new(iter))
    }
}

#[async_trait]
impl RequestExecutor for HttpTransport {
    async fn invoke(&self, request: &ChatRequest) -> Result<Reply> {
        let url = self.url(request)?;
        if request.stream {
            let stream = self.with_retry(request, || self.open_stream(request, &url)).await?;
            Ok(Reply::Stream(stream))
        } else {
            let response = self.with_retry(request, || self.single(request, &url)).await?;
            Ok(Reply::Single(response))
        }
    }

    fn invoke_blocking(&self, request: &ChatRequest) -> Result<BlockingReply> {
        let url = self.url(request)?;
        if request.stream {
            let iter =
                self.with_retry_blocking(request, || self.open_stream_blocking(request, &url))?;
            Ok(BlockingReply::Stream(iter))
        } else {
            let response =
                self.with_retry_blocking(request, || self.single_blocking(request, &url))?;
            Ok(BlockingReply::Single(response))
        }
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

fn status_error(status: u16, headers: &HeaderMap, body: String) -> Error {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let message = match header(BCE_ERROR_MESSAGE_HEADER) {
        Some(bce) if !body.is_empty() => format!("{} ({})", bce, body),
        Some(bce) => bce,
        None => body,
    };
    Error::Request {
        status,
        bce_code: header(BCE_ERROR_CODE_HEADER),
        message,
    }
}

fn parse_json(status: u16, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::Request {
        status,
        bce_code: None,
        message: format!("invalid JSON response: {}", e),
    })
}

/// `Some` when the payload reports an API-level failure.
fn api_error(value: &Value) -> Option<Error> {
    let code = value.get("error_code")?;
    Some(Error::Api {
        code: code.as_i64().unwrap_or_default(),
        message: value
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn chunk(value: Value) -> Result<Response> {
    if let Some(err) = api_error(&value) {
        return Err(err);
    }
    Response::from_value(value)
}

fn unexpected_json(status: u16, text: &str) -> Error {
    match parse_json(status, text) {
        Ok(value) => api_error(&value).unwrap_or_else(|| {
            Error::malformed_with_context(
                "expected an event stream, got a JSON body",
                ErrorContext::new()
                    .with_details(text.chars().take(200).collect::<String>())
                    .with_source("http_transport"),
            )
        }),
        Err(err) => err,
    }
}

fn finish_single(
    status: u16,
    headers: HashMap<String, String>,
    text: &str,
    clock: Clock,
) -> Result<Response> {
    let value = parse_json(status, text)?;
    if let Some(err) = api_error(&value) {
        return Err(err);
    }
    let elapsed = clock.start.elapsed();
    Ok(Response::from_value(value)?
        .with_status(status)
        .with_headers(headers)
        .with_statistics(Statistics {
            request_latency: Some(elapsed),
            first_token_latency: None,
            total_latency: Some(elapsed),
            start_timestamp: Some(clock.start_timestamp),
        }))
}
