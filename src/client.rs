//! 客户端模块：对话补全入口、截断续写与后端选择。
//!
//! Chat client: the public facade, the truncation-continuation controller,
//! the request-executor contract and alternate-backend selection.

mod backend;
mod builder;
mod chat;
mod continuation;
mod executor;
pub(crate) mod policy;

pub use backend::{alternate_model_name, AlternateBackend, AlternateCall, ALTERNATE_MODELS};
pub use builder::ChatCompletionBuilder;
pub use chat::{ChatCompletion, CompletionRequest};
pub use continuation::{Continuation, ContinuationIter};
pub use executor::{
    BlockingReply, ChatRequest, Reply, RequestExecutor, RequestOptions, ResponseIter,
    ResponseStream,
};
