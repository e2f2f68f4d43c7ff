use crate::client::backend::AlternateBackend;
use crate::client::chat::ChatCompletion;
use crate::client::executor::RequestExecutor;
use crate::config::Config;
use crate::transport::HttpTransport;
use crate::Result;
use std::sync::Arc;

/// Builder for creating clients with custom configuration.
///
/// Keep this surface area small and predictable (developer-friendly).
/// Anything not set here comes from [`Config::from_env`].
pub struct ChatCompletionBuilder {
    config: Option<Config>,
    base_url: Option<String>,
    access_token: Option<String>,
    ak: Option<String>,
    sk: Option<String>,
    disable_alternate_backend: Option<bool>,
    max_continuation_rounds: Option<Option<u32>>,
    executor: Option<Arc<dyn RequestExecutor>>,
    alternate: Option<Arc<dyn AlternateBackend>>,
}

impl ChatCompletionBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            base_url: None,
            access_token: None,
            ak: None,
            sk: None,
            disable_alternate_backend: None,
            max_continuation_rounds: None,
            executor: None,
            alternate: None,
        }
    }

    /// Start from an explicit configuration instead of the environment.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the API base URL (primarily for testing with mock servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn ak(mut self, ak: impl Into<String>) -> Self {
        self.ak = Some(ak.into());
        self
    }

    pub fn sk(mut self, sk: impl Into<String>) -> Self {
        self.sk = Some(sk.into());
        self
    }

    /// Allow or forbid routing compatible models to the alternate backend.
    pub fn disable_alternate_backend(mut self, disable: bool) -> Self {
        self.disable_alternate_backend = Some(disable);
        self
    }

    /// Cap continuation rounds; `0` means unbounded.
    pub fn max_continuation_rounds(mut self, rounds: u32) -> Self {
        self.max_continuation_rounds = Some((rounds > 0).then_some(rounds));
        self
    }

    /// Replace the default HTTP executor.
    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Install an alternate backend for the compatible models.
    pub fn alternate_backend(mut self, backend: Arc<dyn AlternateBackend>) -> Self {
        self.alternate = Some(backend);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ChatCompletion> {
        let mut config = self.config.unwrap_or_else(Config::from_env);

        if let Some(url) = self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(token) = self.access_token {
            config.credentials.access_token = Some(token);
        }
        if let Some(ak) = self.ak {
            config.credentials.ak = Some(ak);
        }
        if let Some(sk) = self.sk {
            config.credentials.sk = Some(sk);
        }
        if let Some(disable) = self.disable_alternate_backend {
            config.disable_alternate_backend = disable;
        }
        if let Some(rounds) = self.max_continuation_rounds {
            config.max_continuation_rounds = rounds;
        }

        let executor: Arc<dyn RequestExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(HttpTransport::new(&config)?),
        };

        Ok(ChatCompletion {
            config,
            executor,
            alternate: self.alternate,
        })
    }
}

impl Default for ChatCompletionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
