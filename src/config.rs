//! Client configuration.
//!
//! Everything can be set through the builder; unset values come from the
//! environment, then from built-in defaults.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `QIANFAN_BASE_URL` | API base URL |
//! | `QIANFAN_AK` / `QIANFAN_SK` | Access key / secret key |
//! | `QIANFAN_ACCESS_TOKEN` | Access token appended to every request |
//! | `QIANFAN_DISABLE_EB_SDK` | `0`/`false` enables the alternate backend path |
//! | `QIANFAN_LLM_API_RETRY_ERR_CODES` | Comma-separated API error codes worth retrying |
//! | `QIANFAN_LLM_API_RETRY_MAX_WAIT_INTERVAL` | Backoff cap in seconds |
//! | `QIANFAN_LLM_API_RETRY_JITTER` | Max random seconds added to each backoff delay |
//! | `QIANFAN_MAX_CONTINUATION_ROUNDS` | Continuation cap, `0` for unbounded |

use std::collections::HashSet;
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop";

/// QPS limit reached / internal server error.
pub const DEFAULT_RETRY_ERR_CODES: [i64; 2] = [18, 336100];

pub const DEFAULT_MAX_WAIT_INTERVAL: Duration = Duration::from_secs(120);

/// Upper bound, in seconds, of the random term added to each backoff delay.
pub const DEFAULT_RETRY_JITTER: f64 = 1.0;

pub const DEFAULT_MAX_CONTINUATION_ROUNDS: u32 = 32;

/// Credentials handed to the HTTP executor and to an alternate backend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ak: Option<String>,
    pub sk: Option<String>,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ak", &self.ak.as_deref().map(mask))
            .field("sk", &self.sk.as_deref().map(mask))
            .field("access_token", &self.access_token.as_deref().map(mask))
            .finish()
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub credentials: Credentials,
    /// When true the alternate backend is never used, even if installed.
    pub disable_alternate_backend: bool,
    pub retry_err_codes: HashSet<i64>,
    pub max_wait_interval: Duration,
    pub retry_jitter: f64,
    /// `None` lets a truncated reply continue indefinitely.
    pub max_continuation_rounds: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials: Credentials::default(),
            disable_alternate_backend: true,
            retry_err_codes: DEFAULT_RETRY_ERR_CODES.into_iter().collect(),
            max_wait_interval: DEFAULT_MAX_WAIT_INTERVAL,
            retry_jitter: DEFAULT_RETRY_JITTER,
            max_continuation_rounds: Some(DEFAULT_MAX_CONTINUATION_ROUNDS),
        }
    }
}

impl Config {
    /// Defaults overlaid with whatever the environment provides.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(url) = lookup("QIANFAN_BASE_URL").filter(|s| !s.trim().is_empty()) {
            cfg.base_url = url.trim().trim_end_matches('/').to_string();
        }
        cfg.credentials = Credentials {
            ak: lookup("QIANFAN_AK").filter(|s| !s.is_empty()),
            sk: lookup("QIANFAN_SK").filter(|s| !s.is_empty()),
            access_token: lookup("QIANFAN_ACCESS_TOKEN").filter(|s| !s.is_empty()),
        };
        if let Some(flag) = lookup("QIANFAN_DISABLE_EB_SDK").and_then(|s| parse_bool(&s)) {
            cfg.disable_alternate_backend = flag;
        }
        if let Some(codes) = lookup("QIANFAN_LLM_API_RETRY_ERR_CODES") {
            let parsed: Option<HashSet<i64>> = codes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<i64>().ok())
                .collect();
            if let Some(parsed) = parsed {
                cfg.retry_err_codes = parsed;
            }
        }
        if let Some(interval) = lookup("QIANFAN_LLM_API_RETRY_MAX_WAIT_INTERVAL")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            cfg.max_wait_interval = interval;
        }
        if let Some(jitter) = lookup("QIANFAN_LLM_API_RETRY_JITTER")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|j| Duration::try_from_secs_f64(*j).is_ok())
        {
            cfg.retry_jitter = jitter;
        }
        if let Some(rounds) = lookup("QIANFAN_MAX_CONTINUATION_ROUNDS")
            .and_then(|s| s.trim().parse::<u32>().ok())
        {
            cfg.max_continuation_rounds = (rounds > 0).then_some(rounds);
        }

        cfg
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
