//! # Types Module
//!
//! Core data types shared by the facade, the continuation controller and the
//! request executors.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Role-tagged conversation entry |
//! | [`Messages`] | Append-only conversation buffer |
//! | [`MessagesInput`] | Buffer or raw records, normalized at the entry boundary |
//! | [`Response`] | One complete or partial reply envelope |
//!
//! ## Example
//!
//! ```rust
//! use qianfan_chat::types::{Message, MessageRole, Messages};
//!
//! let mut messages = Messages::from(vec![Message::system("Answer in one line")]);
//! messages.append("What is Rust?", MessageRole::User);
//! assert_eq!(messages.len(), 2);
//! ```

pub mod message;
pub mod response;

pub use message::{Message, MessageRole, Messages, MessagesInput, CONTINUATION_PROMPT};
pub use response::{Response, Statistics};
