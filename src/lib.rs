//! # qianfan-chat
//!
//! 千帆对话补全客户端，支持截断自动续写。
//!
//! Chat completion client for the Qianfan large-model platform, with transparent
//! continuation of truncated replies.
//!
//! ## Overview
//!
//! A model may stop mid-answer and flag the reply as truncated. With
//! `auto_concat_truncate` enabled the client keeps asking the model to continue
//! (by appending the partial answer and a `"继续"` prompt to the conversation) until
//! the reply is complete. Both call shapes and both execution regimes are covered:
//!
//! - **single reply**: the fragments are concatenated into one envelope;
//! - **stream**: every envelope of every call is yielded in order;
//! - **async** via [`ChatCompletion::complete`], **blocking** via
//!   [`ChatCompletion::complete_blocking`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qianfan_chat::{ChatCompletion, CompletionRequest, Message};
//!
//! #[tokio::main]
//! async fn main() -> qianfan_chat::Result<()> {
//!     let client = ChatCompletion::builder()
//!         .access_token("your-access-token")
//!         .build()?;
//!
//!     let request = CompletionRequest::new(vec![Message::user("写一篇关于 Rust 的长文")])
//!         .model("ERNIE-Bot")
//!         .auto_concat_truncate(true);
//!
//!     let reply = client.complete(request).await?.into_response()?;
//!     println!("{}", reply.result);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Facade, continuation controller, executor and backend contracts |
//! | [`config`] | Environment-driven configuration |
//! | [`models`] | Model catalog and endpoint resolution |
//! | [`transport`] | Default HTTP request executor |
//! | [`types`] | Messages and response envelopes |

pub mod client;
pub mod config;
pub mod models;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{
    AlternateBackend, BlockingReply, ChatCompletion, ChatCompletionBuilder, ChatRequest,
    CompletionRequest, Reply, RequestExecutor, RequestOptions,
};
pub use config::Config;
pub use types::{Message, MessageRole, Messages, Response, Statistics};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
