//! Language-model backends behind a single query capability.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::infra::config::ModelConfig;

/// Selectable model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Azure OpenAI chat completions
    Azure,
    /// Anthropic Messages API
    Anthropic,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend is not configured: {0}")]
    Config(String),

    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed model response: {0}")]
    MalformedReply(String),
}

/// Reply text (absent when the model produced nothing) plus the raw payload.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: Option<String>,
    pub raw: Value,
}

pub trait ModelClient {
    fn query(&self, system_prompt: &str, user_prompt: &str) -> Result<ModelReply, ModelError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

pub struct AzureOpenAiClient {
    client: Client,
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
    max_tokens: u32,
}

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

fn http_client(timeout_secs: u64) -> Result<Client, ModelError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?)
}

fn truncate_text(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Send a JSON body and return the decoded JSON payload, mapping non-2xx to errors.
fn post_json(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    body: &Value,
) -> Result<Value, ModelError> {
    let response = client
        .post(url)
        .headers(headers)
        .json(body)
        .send()?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ModelError::Status { status: status.as_u16(), body: truncate_text(&body, 300) });
    }
    Ok(response.json()?)
}

fn header(value: &str) -> Result<HeaderValue, ModelError> {
    HeaderValue::from_str(value)
        .map_err(|_| ModelError::Config("API key is not a valid header value".to_string()))
}

impl ModelClient for AzureOpenAiClient {
    fn query(&self, system_prompt: &str, user_prompt: &str) -> Result<ModelReply, ModelError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        );

        let mut headers = HeaderMap::new();
        headers.insert("api-key", header(&self.api_key)?);

        let raw = post_json(
            &self.client,
            &url,
            headers,
            &json!({
                "temperature": 0.1,
                "max_tokens": self.max_tokens,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt}
                ]
            }),
        )?;

        let parsed: ChatCompletionsResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ModelError::MalformedReply(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .and_then(non_empty);

        Ok(ModelReply { text, raw })
    }

    fn name(&self) -> &str {
        "azure"
    }
}

impl ModelClient for AnthropicClient {
    fn query(&self, system_prompt: &str, user_prompt: &str) -> Result<ModelReply, ModelError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", header(&self.api_key)?);
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        let raw = post_json(
            &self.client,
            &url,
            headers,
            &json!({
                "model": self.model,
                "system": system_prompt,
                "max_tokens": self.max_tokens,
                "messages": [
                    {"role": "user", "content": user_prompt}
                ]
            }),
        )?;

        let parsed: MessagesResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ModelError::MalformedReply(e.to_string()))?;
        let text = parsed
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ModelReply { text: non_empty(text), raw })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Build the configured backend, reading secrets from the process environment.
pub fn client_from_env(config: &ModelConfig) -> Result<Box<dyn ModelClient>, ModelError> {
    client_from_lookup(config, |key| std::env::var(key).ok())
}

/// Build the configured backend with an injectable variable lookup.
pub fn client_from_lookup<F>(
    config: &ModelConfig,
    lookup: F,
) -> Result<Box<dyn ModelClient>, ModelError>
where
    F: Fn(&str) -> Option<String>,
{
    let require = |key: &str| {
        lookup(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ModelError::Config(format!("set {key}")))
    };

    match config.backend {
        Backend::Azure => {
            let api_key = require("AZURE_OPENAI_API_KEY")?;
            let endpoint = match &config.azure.endpoint {
                Some(e) => e.clone(),
                None => require("AZURE_OPENAI_ENDPOINT")?,
            };
            let deployment = match &config.azure.deployment {
                Some(d) => d.clone(),
                None => require("AZURE_OPENAI_DEPLOYMENT_NAME")?,
            };
            Ok(Box::new(AzureOpenAiClient {
                client: http_client(config.timeout_secs)?,
                endpoint,
                deployment,
                api_version: config.azure.api_version.clone(),
                api_key,
                max_tokens: config.max_tokens,
            }))
        }
        Backend::Anthropic => Ok(Box::new(AnthropicClient {
            client: http_client(config.timeout_secs)?,
            base_url: config.anthropic.base_url.clone(),
            model: config.anthropic.model.clone(),
            api_key: require("ANTHROPIC_API_KEY")?,
            max_tokens: config.max_tokens,
        })),
    }
}

/// Replays canned replies in order; `None` entries simulate an empty reply.
#[cfg(test)]
pub(crate) struct ScriptedClient {
    replies: std::cell::RefCell<std::collections::VecDeque<Option<String>>>,
    pub prompts: std::cell::RefCell<Vec<(String, String)>>,
}

#[cfg(test)]
impl ScriptedClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            replies: std::cell::RefCell::new(
                replies
                    .into_iter()
                    .map(|r| r.map(Into::into))
                    .collect(),
            ),
            prompts: std::cell::RefCell::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl ModelClient for ScriptedClient {
    fn query(&self, system_prompt: &str, user_prompt: &str) -> Result<ModelReply, ModelError> {
        self.prompts
            .borrow_mut()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        match self.replies.borrow_mut().pop_front() {
            Some(text) => Ok(ModelReply { text, raw: Value::Null }),
            None => Err(ModelError::Status { status: 503, body: "script exhausted".to_string() }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
