//! Truncation continuation.
//!
//! When the API cuts a reply short (`is_truncated = true`) the controller appends
//! the partial answer as an assistant turn plus a "继续" user turn and asks again,
//! until a reply arrives that is no longer truncated.
//!
//! - Non-streaming: the fragments are concatenated and written into the final
//!   envelope (`result` and `body["result"]`), which is returned alone.
//! - Streaming: every envelope of every call is re-emitted untouched, in order.
//!   `is_end` is passed through as each call reports it.
//!
//! Calls are strictly sequential: the next prompt depends on the previous text.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use super::executor::{ChatRequest, RequestExecutor, ResponseIter, ResponseStream};
use crate::types::{Messages, Response};
use crate::{Error, Result};

/// Ephemeral bookkeeping for one continuation sequence.
#[derive(Debug, Clone)]
pub(crate) struct ContinuationState {
    /// Text of every call so far.
    accumulated: String,
    /// Text of the most recent call, sent back as the assistant turn.
    current: String,
    is_truncated: bool,
    /// Working copy of the conversation; never the caller's buffer.
    messages: Messages,
    rounds: u32,
    max_rounds: Option<u32>,
}

impl ContinuationState {
    pub(crate) fn new(messages: Messages, max_rounds: Option<u32>) -> Self {
        Self {
            accumulated: String::new(),
            current: String::new(),
            is_truncated: false,
            messages,
            rounds: 0,
            max_rounds,
        }
    }

    /// Record one envelope (a whole reply or one stream chunk).
    pub(crate) fn absorb(&mut self, resp: &Response) {
        self.current.push_str(&resp.result);
        self.accumulated.push_str(&resp.result);
        self.is_truncated = resp.is_truncated;
    }

    pub(crate) fn is_truncated(&self) -> bool {
        self.is_truncated
    }

    pub(crate) fn rounds(&self) -> u32 {
        self.rounds
    }

    pub(crate) fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Extend the working conversation for the next round.
    pub(crate) fn begin_round(&mut self) -> Result<()> {
        if let Some(max) = self.max_rounds {
            if self.rounds >= max {
                return Err(Error::ContinuationLimitExceeded { rounds: self.rounds });
            }
        }
        self.messages.append_continuation(&self.current);
        self.current.clear();
        self.rounds += 1;
        debug!(
            round = self.rounds,
            messages = self.messages.len(),
            "requesting continuation of truncated reply"
        );
        Ok(())
    }

    fn into_text(self) -> String {
        self.accumulated
    }
}

/// Drives a reply to completion with the async executor.
pub struct Continuation {
    executor: Arc<dyn RequestExecutor>,
    template: ChatRequest,
    max_rounds: Option<u32>,
}

impl Continuation {
    /// `template` is the first call; its messages seed the working buffer.
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        template: ChatRequest,
        max_rounds: Option<u32>,
    ) -> Self {
        Self {
            executor,
            template,
            max_rounds,
        }
    }

    fn state(&self) -> ContinuationState {
        ContinuationState::new(self.template.messages.clone(), self.max_rounds)
    }

    /// Keep asking until the reply is complete; return the final envelope with the
    /// full text. A first response that is not truncated comes back unchanged.
    pub async fn complete(&self, first: Response) -> Result<Response> {
        let mut state = self.state();
        state.absorb(&first);
        let mut last = first;

        while state.is_truncated() {
            state.begin_round()?;
            let request = self.template.follow_up(state.messages(), false);
            let resp = self.executor.invoke(&request).await?.into_response()?;
            state.absorb(&resp);
            last = resp;
        }

        finish(state, last)
    }

    /// Blocking twin of [`Continuation::complete`].
    pub fn complete_blocking(&self, first: Response) -> Result<Response> {
        let mut state = self.state();
        state.absorb(&first);
        let mut last = first;

        while state.is_truncated() {
            state.begin_round()?;
            let request = self.template.follow_up(state.messages(), false);
            let resp = self.executor.invoke_blocking(&request)?.into_response()?;
            state.absorb(&resp);
            last = resp;
        }

        finish(state, last)
    }

    /// Re-emit `first` and every continuation stream after it.
    ///
    /// The first error ends the stream.
    pub fn stream(self, first: ResponseStream) -> ResponseStream {
        let Continuation {
            executor,
            template,
            max_rounds,
        } = self;
        let mut state = ContinuationState::new(template.messages.clone(), max_rounds);

        Box::pin(async_stream::stream! {
            let mut current = first;
            loop {
                while let Some(item) = current.next().await {
                    match item {
                        Ok(resp) => {
                            state.absorb(&resp);
                            yield Ok::<Response, Error>(resp);
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                if !state.is_truncated() {
                    break;
                }
                if let Err(e) = state.begin_round() {
                    yield Err(e);
                    return;
                }
                let request = template.follow_up(state.messages(), true);
                match executor.invoke(&request).await.and_then(|reply| reply.into_stream()) {
                    Ok(next) => current = next,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            if state.rounds() > 0 {
                info!(rounds = state.rounds(), "streamed reply completed after continuation");
            }
        })
    }

    /// Blocking twin of [`Continuation::stream`].
    pub fn stream_blocking(self, first: ResponseIter) -> ContinuationIter {
        let state = self.state();
        ContinuationIter {
            executor: self.executor,
            template: self.template,
            state,
            current: Some(first),
            done: false,
        }
    }
}

fn finish(state: ContinuationState, mut last: Response) -> Result<Response> {
    if state.rounds() > 0 {
        info!(
            rounds = state.rounds(),
            "reply completed after continuation"
        );
        last.replace_result(state.into_text());
    }
    Ok(last)
}

/// Blocking producer of every envelope across all continuation calls.
pub struct ContinuationIter {
    executor: Arc<dyn RequestExecutor>,
    template: ChatRequest,
    state: ContinuationState,
    current: Option<ResponseIter>,
    done: bool,
}

impl ContinuationIter {
    fn fail(&mut self, err: Error) -> Option<Result<Response>> {
        self.done = true;
        self.current = None;
        Some(Err(err))
    }
}

impl Iterator for ContinuationIter {
    type Item = Result<Response>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(Ok(resp)) => {
                        self.state.absorb(&resp);
                        return Some(Ok(resp));
                    }
                    Some(Err(e)) => return self.fail(e),
                    None => self.current = None,
                }
            }

            if !self.state.is_truncated() {
                self.done = true;
                if self.state.rounds() > 0 {
                    info!(
                        rounds = self.state.rounds(),
                        "streamed reply completed after continuation"
                    );
                }
                return None;
            }

            if let Err(e) = self.state.begin_round() {
                return self.fail(e);
            }
            let request = self.template.follow_up(self.state.messages(), true);
            match self
                .executor
                .invoke_blocking(&request)
                .and_then(|reply| reply.into_stream())
            {
                Ok(next) => self.current = Some(next),
                Err(e) => return self.fail(e),
            }
        }
    }
}
