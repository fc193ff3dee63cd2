//! OpenAI adapter (chat completions).
//!
//! Implements the `followsort-core` ClassifierModel port against any
//! OpenAI-compatible `chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use followsort_core::{
    config::Config,
    errors::Error,
    ports::{ClassifierModel, ClassifierPrompt},
    Result,
};

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_key: cfg.openai_api_key.clone(),
            base_url: cfg.openai_base_url.clone(),
            model: cfg.model_name.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            timeout: cfg.request_timeout,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OpenAiClassifier {
    settings: OpenAiSettings,
    http: reqwest::Client,
}

impl OpenAiClassifier {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::External(format!("openai client build failed: {e}")))?;
        Ok(Self { settings, http })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ClassifierModel for OpenAiClassifier {
    async fn complete(&self, prompt: &ClassifierPrompt) -> Result<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tracing::debug!(model = %self.settings.model, chars = prompt.user.len(), "openai chat request");

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::Transient(format!("openai response read failed: {e}")))?;
        extract_content(&text)
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::Transient(format!("openai request error: {e}"))
    } else {
        Error::External(format!("openai request error: {e}"))
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    let msg = format!("openai chat failed: {status} {snippet}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::Transient(msg),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Config(msg),
        s if s.is_server_error() => Error::Transient(msg),
        _ => Error::External(msg),
    }
}

/// Pull the first choice's message text out of a chat completion body.
pub fn extract_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::AiResponse(format!("chat completion is not valid json: {e}")))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(Error::AiResponse("chat completion has no content".to_string()));
    }
    Ok(content)
}
