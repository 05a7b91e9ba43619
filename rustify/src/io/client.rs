//! Completion client for language-model backends.
//!
//! Every backend is described by data ([`BackendDescriptor`]): where to POST,
//! which headers to send, where the prompt goes in the request body, and where
//! the completion text lives in the response. [`HttpCompletionClient`] is a
//! registry of named descriptors behind the [`CompletionClient`] trait, so
//! controllers never see wire formats.

use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::field_path::{FieldPath, FieldPathError};
use crate::core::history::Message;
use crate::io::config::{AppConfig, ClientConfig};

/// What a backend accepts as its prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptShape {
    /// A single prompt string.
    Text,
    /// A list of `{role, content}` messages.
    Messages,
}

impl PromptShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Messages => "messages",
        }
    }
}

/// How the response body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFraming {
    /// One JSON document.
    #[default]
    Json,
    /// Newline-delimited JSON fragments whose text fields are concatenated.
    Ndjson,
}

/// Wire description of one model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub base_url: String,
    pub endpoint: String,
    /// Header templates; `{api_key}` is replaced with the resolved key.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub prompt_field: String,
    pub response_field: FieldPath,
    pub shape: PromptShape,
    #[serde(default)]
    pub framing: ResponseFraming,
    /// Extra top-level request parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Environment variable holding the API key, if the backend needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model to request; falls back to `[client].model`.
    #[serde(default)]
    pub model: Option<String>,
}

impl BackendDescriptor {
    /// Local Ollama server, single text prompt, non-streaming.
    pub fn ollama() -> Self {
        let mut params = Map::new();
        params.insert("stream".to_string(), Value::Bool(false));
        Self {
            base_url: "http://localhost:11434".to_string(),
            endpoint: "/api/generate".to_string(),
            headers: BTreeMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            prompt_field: "prompt".to_string(),
            response_field: "response".parse().expect("static field path"),
            shape: PromptShape::Text,
            framing: ResponseFraming::Ndjson,
            params,
            api_key_env: None,
            model: None,
        }
    }

    /// OpenAI-compatible chat completions.
    pub fn chat_completions(base_url: &str, api_key_env: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            endpoint: "/chat/completions".to_string(),
            headers: BTreeMap::from([
                ("Authorization".to_string(), "Bearer {api_key}".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ]),
            prompt_field: "messages".to_string(),
            response_field: "choices[0].message.content"
                .parse()
                .expect("static field path"),
            shape: PromptShape::Messages,
            framing: ResponseFraming::Json,
            params: Map::new(),
            api_key_env: Some(api_key_env.to_string()),
            model: None,
        }
    }

    pub fn openai() -> Self {
        Self::chat_completions("https://api.openai.com/v1", "OPENAI_API_KEY")
    }

    pub fn deepseek() -> Self {
        Self::chat_completions("https://api.deepseek.com", "DEEPSEEK_API_KEY")
    }

    /// Built-in backends by name.
    pub fn presets() -> BTreeMap<String, Self> {
        BTreeMap::from([
            ("ollama".to_string(), Self::ollama()),
            ("openai".to_string(), Self::openai()),
            ("deepseek".to_string(), Self::deepseek()),
        ])
    }

    fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    fn needs_api_key(&self) -> bool {
        self.headers.values().any(|v| v.contains("{api_key}"))
    }
}

/// Prompt payload; each backend accepts exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    pub fn shape(&self) -> PromptShape {
        match self {
            Self::Text(_) => PromptShape::Text,
            Self::Messages(_) => PromptShape::Messages,
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub max_output_tokens: u32,
    pub temperature: f64,
    /// Extra request parameters, merged last.
    pub extra: Map<String, Value>,
}

impl CompletionOptions {
    pub fn new(max_output_tokens: u32, temperature: f64) -> Self {
        Self {
            max_output_tokens,
            temperature,
            extra: Map::new(),
        }
    }
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::new(100, 0.7)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("backend `{0}` is not registered")]
    UnknownBackend(String),
    #[error("backend `{backend}` is misconfigured: {reason}")]
    Configuration { backend: String, reason: String },
    #[error("transport failure calling `{backend}`: {message}")]
    Transport { backend: String, message: String },
    #[error("backend `{backend}` returned HTTP {status}: {body}")]
    HttpStatus {
        backend: String,
        status: u16,
        body: String,
    },
    #[error("backend `{backend}` returned an unusable response: {source}")]
    MissingField {
        backend: String,
        #[source]
        source: FieldPathError,
    },
    #[error("backend `{backend}` returned malformed JSON: {message}")]
    Malformed { backend: String, message: String },
}

impl ClientError {
    /// Transient failures are retried by [`RetryPolicy`].
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownBackend(_) | Self::Configuration { .. })
    }
}

/// Something that turns a prompt into a completion.
pub trait CompletionClient {
    /// Prompt variant the named backend accepts.
    fn shape(&self, backend: &str) -> Result<PromptShape, ClientError>;

    /// Send `prompt` to `backend` and return the completion text.
    fn complete(
        &self,
        backend: &str,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String, ClientError>;
}

/// Exponential backoff for transient client errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms: max_backoff_ms.max(initial_backoff_ms),
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self::new(cfg.max_retries, cfg.initial_backoff_ms, cfg.max_backoff_ms)
    }

    /// Delay before retry number `retry` (0-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `operation`, retrying transient failures up to `max_retries` times.
    pub fn execute<T>(
        &self,
        mut operation: impl FnMut() -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut retry = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    let delay = self.backoff(retry);
                    warn!(
                        err = %err,
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient backend failure, retrying"
                    );
                    thread::sleep(delay);
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone)]
struct RegisteredBackend {
    descriptor: BackendDescriptor,
    model: String,
    headers: Vec<(String, String)>,
}

/// Blocking HTTP client over a registry of named backends.
pub struct HttpCompletionClient {
    http: reqwest::blocking::Client,
    backends: HashMap<String, RegisteredBackend>,
    retry: RetryPolicy,
    default_model: String,
}

impl HttpCompletionClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            backends: HashMap::new(),
            retry: RetryPolicy::from_config(cfg),
            default_model: cfg.model.clone(),
        })
    }

    /// Build a client with every preset and configured backend registered.
    ///
    /// `lookup_env` resolves API-key variables. Backends whose key is missing are
    /// skipped; asking for one later is a configuration error.
    pub fn from_config(
        cfg: &AppConfig,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut client = Self::new(&cfg.client)?;
        let mut descriptors = BackendDescriptor::presets();
        descriptors.extend(cfg.backends.clone());

        for (name, descriptor) in descriptors {
            let api_key = descriptor.api_key_env.as_deref().and_then(&lookup_env);
            match client.register(&name, descriptor, api_key.as_deref()) {
                Ok(()) => debug!(backend = %name, "registered backend"),
                Err(err) if name == cfg.client.backend => {
                    warn!(backend = %name, err = %err, "selected backend unavailable");
                }
                Err(err) => debug!(backend = %name, err = %err, "skipping backend"),
            }
        }
        Ok(client)
    }

    /// Register (or replace) a backend under `name`.
    pub fn register(
        &mut self,
        name: &str,
        descriptor: BackendDescriptor,
        api_key: Option<&str>,
    ) -> Result<(), ClientError> {
        if descriptor.needs_api_key() && api_key.is_none() {
            let source = descriptor
                .api_key_env
                .as_deref()
                .map(|var| format!("environment variable {var} is not set"))
                .unwrap_or_else(|| "no API key configured".to_string());
            return Err(ClientError::Configuration {
                backend: name.to_string(),
                reason: source,
            });
        }
        let headers = descriptor
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.replace("{api_key}", api_key.unwrap_or_default())))
            .collect();
        let model = descriptor
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        self.backends.insert(
            name.to_string(),
            RegisteredBackend {
                descriptor,
                model,
                headers,
            },
        );
        Ok(())
    }

    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn backend(&self, name: &str) -> Result<&RegisteredBackend, ClientError> {
        self.backends
            .get(name)
            .ok_or_else(|| ClientError::UnknownBackend(name.to_string()))
    }

    fn send(
        &self,
        name: &str,
        backend: &RegisteredBackend,
        body: &Value,
    ) -> Result<String, ClientError> {
        let mut request = self.http.post(backend.descriptor.url());
        for (key, value) in &backend.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.json(body).send().map_err(|err| ClientError::Transport {
            backend: name.to_string(),
            message: err.to_string(),
        })?;
        let status = response.status();
        let text = response.text().map_err(|err| ClientError::Transport {
            backend: name.to_string(),
            message: format!("read response body: {err}"),
        })?;
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                backend: name.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        parse_response(name, &backend.descriptor, &text)
    }
}

impl CompletionClient for HttpCompletionClient {
    fn shape(&self, backend: &str) -> Result<PromptShape, ClientError> {
        Ok(self.backend(backend)?.descriptor.shape)
    }

    #[instrument(skip_all, fields(backend = %name))]
    fn complete(
        &self,
        name: &str,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String, ClientError> {
        let backend = self.backend(name)?;
        let body = build_request_body(name, &backend.descriptor, &backend.model, prompt, options)?;
        info!(model = %backend.model, "requesting completion");
        let text = self.retry.execute(|| self.send(name, backend, &body))?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Request body: prompt field, model, generation options, then descriptor and call extras.
pub fn build_request_body(
    name: &str,
    descriptor: &BackendDescriptor,
    model: &str,
    prompt: &Prompt,
    options: &CompletionOptions,
) -> Result<Value, ClientError> {
    if prompt.shape() != descriptor.shape {
        return Err(ClientError::Configuration {
            backend: name.to_string(),
            reason: format!(
                "expects a {} prompt, got {}",
                descriptor.shape.as_str(),
                prompt.shape().as_str()
            ),
        });
    }
    let prompt_value = match prompt {
        Prompt::Text(text) => Value::String(text.clone()),
        Prompt::Messages(messages) => {
            serde_json::to_value(messages).map_err(|err| ClientError::Configuration {
                backend: name.to_string(),
                reason: format!("serialize messages: {err}"),
            })?
        }
    };

    let mut body = Map::new();
    body.insert(descriptor.prompt_field.clone(), prompt_value);
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "max_tokens".to_string(),
        Value::from(options.max_output_tokens),
    );
    body.insert("temperature".to_string(), Value::from(options.temperature));
    for (key, value) in &descriptor.params {
        body.insert(key.clone(), value.clone());
    }
    for (key, value) in &options.extra {
        body.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(body))
}

/// Pull completion text out of a response body according to its framing.
pub fn parse_response(
    name: &str,
    descriptor: &BackendDescriptor,
    body: &str,
) -> Result<String, ClientError> {
    let malformed = |message: String| ClientError::Malformed {
        backend: name.to_string(),
        message,
    };
    let missing = |source: FieldPathError| ClientError::MissingField {
        backend: name.to_string(),
        source,
    };

    match descriptor.framing {
        ResponseFraming::Json => {
            let value: Value =
                serde_json::from_str(body).map_err(|err| malformed(err.to_string()))?;
            descriptor
                .response_field
                .lookup_str(&value)
                .map(str::to_string)
                .map_err(missing)
        }
        ResponseFraming::Ndjson => {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                return descriptor
                    .response_field
                    .lookup_str(&value)
                    .map(str::to_string)
                    .map_err(missing);
            }
            let mut text = String::new();
            let mut fragments = 0usize;
            let mut first_error = None;
            for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let Ok(value) = serde_json::from_str::<Value>(line) else {
                    continue;
                };
                match descriptor.response_field.lookup_str(&value) {
                    Ok(fragment) => {
                        text.push_str(fragment);
                        fragments += 1;
                    }
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            if fragments > 0 {
                return Ok(text);
            }
            match first_error {
                Some(err) => Err(missing(err)),
                None => Err(malformed("no JSON fragments in response".to_string())),
            }
        }
    }
}
