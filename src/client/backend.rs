//! Backend selection: the native request executor or an installed alternate SDK.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::executor::{BlockingReply, Reply};
use crate::config::{Config, Credentials};
use crate::Result;

/// Models the alternate backend may serve.
pub const ALTERNATE_MODELS: [&str; 2] = ["ERNIE-Bot-turbo", "ERNIE-Bot"];

/// A call handed to the alternate backend.
#[derive(Debug, Clone)]
pub struct AlternateCall {
    pub credentials: Credentials,
    /// Backend-specific, lower-cased model name.
    pub model: String,
    pub stream: bool,
    /// Extra parameters, including `messages`.
    pub params: Map<String, Value>,
}

/// An alternate SDK that can serve some chat models end to end.
///
/// Its replies are returned to the caller as-is; no continuation is applied.
#[async_trait]
pub trait AlternateBackend: Send + Sync {
    async fn create(&self, call: AlternateCall) -> Result<Reply>;

    fn create_blocking(&self, call: AlternateCall) -> Result<BlockingReply>;
}

/// Which backend serves a call.
pub(crate) enum Backend<'a> {
    Native,
    Alternate(&'a dyn AlternateBackend),
}

impl<'a> Backend<'a> {
    pub(crate) fn select(
        config: &Config,
        alternate: Option<&'a Arc<dyn AlternateBackend>>,
        model: Option<&str>,
    ) -> Self {
        match (alternate, model) {
            (Some(backend), Some(model))
                if !config.disable_alternate_backend && ALTERNATE_MODELS.contains(&model) =>
            {
                Backend::Alternate(backend.as_ref())
            }
            _ => Backend::Native,
        }
    }
}

/// Map a catalog model name to the alternate backend's naming.
pub fn alternate_model_name(model: &str) -> String {
    let model = if model == "ERNIE-Bot" {
        "ernie-bot-3.5"
    } else {
        model
    };
    model.to_lowercase()
}
