//! Scripted request executor shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use qianfan_chat::client::{BlockingReply, ChatRequest, Reply, RequestExecutor};
use qianfan_chat::{ChatCompletion, Config, Error, Response, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What the executor answers to one call.
pub enum Step {
    Single(Value),
    Stream(Vec<Value>),
    /// Stream that yields the given chunks and then fails.
    BrokenStream(Vec<Value>, Error),
    Fail(Error),
}

/// Answers calls from a fixed script and records every request it sees.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_step(&self, request: &ChatRequest) -> Step {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("executor called more often than scripted")
    }
}

fn envelopes(values: Vec<Value>) -> Vec<Result<Response>> {
    values.into_iter().map(Response::from_value).collect()
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn invoke(&self, request: &ChatRequest) -> Result<Reply> {
        match self.next_step(request) {
            Step::Single(value) => Ok(Reply::Single(Response::from_value(value)?)),
            Step::Stream(values) => Ok(Reply::Stream(Box::pin(stream::iter(envelopes(values))))),
            Step::BrokenStream(values, err) => {
                let mut items = envelopes(values);
                items.push(Err(err));
                Ok(Reply::Stream(Box::pin(stream::iter(items))))
            }
            Step::Fail(err) => Err(err),
        }
    }

    fn invoke_blocking(&self, request: &ChatRequest) -> Result<BlockingReply> {
        match self.next_step(request) {
            Step::Single(value) => Ok(BlockingReply::Single(Response::from_value(value)?)),
            Step::Stream(values) => {
                Ok(BlockingReply::Stream(Box::new(envelopes(values).into_iter())))
            }
            Step::BrokenStream(values, err) => {
                let mut items = envelopes(values);
                items.push(Err(err));
                Ok(BlockingReply::Stream(Box::new(items.into_iter())))
            }
            Step::Fail(err) => Err(err),
        }
    }
}

/// Client backed by `executor`, independent of the environment.
pub fn client(executor: Arc<ScriptedExecutor>) -> ChatCompletion {
    ChatCompletion::builder()
        .config(Config::default())
        .executor(executor)
        .build()
        .expect("client builds with an explicit executor")
}

pub fn reply(text: &str, truncated: bool) -> Value {
    json!({
        "id": "as-test",
        "object": "chat.completion",
        "result": text,
        "is_truncated": truncated,
        "need_clear_history": false,
        "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
    })
}

pub fn chunk(text: &str, truncated: bool, end: bool) -> Value {
    json!({
        "id": "as-test",
        "object": "chat.completion",
        "result": text,
        "is_truncated": truncated,
        "is_end": end,
    })
}
