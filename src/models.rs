//! Chat model catalog and endpoint resolution.

use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Model used when the caller names neither a model nor an endpoint.
pub const DEFAULT_MODEL: &str = "ERNIE-Bot-turbo";

/// Endpoint and parameter keys of one preset model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub endpoint: &'static str,
    pub required_keys: &'static [&'static str],
    pub optional_keys: &'static [&'static str],
}

const BASIC_KEYS: &[&str] = &["stream", "user_id"];

static CATALOG: Lazy<HashMap<&'static str, ModelInfo>> = Lazy::new(|| {
    let basic = |endpoint| ModelInfo {
        endpoint,
        required_keys: &["messages"],
        optional_keys: BASIC_KEYS,
    };
    HashMap::from([
        (
            "ERNIE-Bot-turbo",
            ModelInfo {
                endpoint: "/chat/eb-instant",
                required_keys: &["messages"],
                optional_keys: &["stream", "temperature", "top_p", "penalty_score", "user_id"],
            },
        ),
        (
            "ERNIE-Bot",
            ModelInfo {
                endpoint: "/chat/completions",
                required_keys: &["messages"],
                optional_keys: &[
                    "stream",
                    "temperature",
                    "top_p",
                    "penalty_score",
                    "functions",
                    "system",
                    "user_id",
                    "user_setting",
                ],
            },
        ),
        (
            "ERNIE-Bot-4",
            ModelInfo {
                endpoint: "/chat/completions_pro",
                required_keys: &["messages"],
                optional_keys: &[
                    "stream",
                    "temperature",
                    "top_p",
                    "penalty_score",
                    "functions",
                    "system",
                    "user_id",
                ],
            },
        ),
        ("BLOOMZ-7B", basic("/chat/bloomz_7b1")),
        ("Llama-2-7b-chat", basic("/chat/llama_2_7b")),
        ("Llama-2-13b-chat", basic("/chat/llama_2_13b")),
        ("Llama-2-70b-chat", basic("/chat/llama_2_70b")),
        (
            "Qianfan-BLOOMZ-7B-compressed",
            basic("/chat/qianfan_bloomz_7b_compressed"),
        ),
        (
            "Qianfan-Chinese-Llama-2-7B",
            basic("/chat/qianfan_chinese_llama_2_7b"),
        ),
        ("ChatGLM2-6B-32K", basic("/chat/chatglm2_6b_32k")),
        ("AquilaChat-7B", basic("/chat/aquilachat_7b")),
    ])
});

/// Look up a preset model.
pub fn model_info(model: &str) -> Option<&'static ModelInfo> {
    CATALOG.get(model)
}

/// Names of all preset chat models, sorted.
pub fn supported_models() -> Vec<&'static str> {
    let mut names: Vec<_> = CATALOG.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Resolve the request path for a call.
///
/// An explicit endpoint wins and maps to `/chat/{endpoint}`; otherwise the model
/// (or [`DEFAULT_MODEL`]) must be in the catalog.
pub fn resolve_endpoint(model: Option<&str>, endpoint: Option<&str>) -> Result<String> {
    if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
        return Ok(format!("/chat/{}", endpoint.trim_start_matches('/')));
    }
    let model = model.unwrap_or(DEFAULT_MODEL);
    model_info(model)
        .map(|info| info.endpoint.to_string())
        .ok_or_else(|| {
            Error::validation_with_context(
                format!("model `{}` is not supported, specify an endpoint instead", model),
                ErrorContext::new()
                    .with_field_path("model")
                    .with_source("model_catalog"),
            )
        })
}

/// Extra parameter keys the model does not document.
///
/// Returns an empty list for custom endpoints, which accept anything.
pub fn unknown_params<'a>(
    model: Option<&str>,
    endpoint: Option<&str>,
    params: &'a Map<String, Value>,
) -> Vec<&'a str> {
    if endpoint.is_some_and(|e| !e.is_empty()) {
        return Vec::new();
    }
    let Some(info) = model_info(model.unwrap_or(DEFAULT_MODEL)) else {
        return Vec::new();
    };
    params
        .keys()
        .map(String::as_str)
        .filter(|k| !info.required_keys.contains(k) && !info.optional_keys.contains(k))
        .collect()
}
