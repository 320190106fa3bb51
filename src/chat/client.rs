//! # Chat Completion Client
//!
//! Port to the chat-completion API plus the adapter for OpenAI-compatible
//! endpoints (Groq by default). Calls are always non-streaming.

use crate::chat::history::ChatTurn;
use crate::config::ChatConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed per-call model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
}

impl From<&ChatConfig> for ModelConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_completion_tokens: config.max_completion_tokens,
        }
    }
}

#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn complete(&self, history: &[ChatTurn], model: &ModelConfig) -> Result<String, ChatClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ChatClientError {
    #[error("api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("rate limited")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &ChatConfig) -> Result<Self, ChatClientError> {
        let mut builder = Client::builder();
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| ChatClientError::ApiRequestFailed(format!("client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiCompatibleClient {
    async fn complete(&self, history: &[ChatTurn], model: &ModelConfig) -> Result<String, ChatClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: &model.model,
            messages: history,
            temperature: model.temperature,
            top_p: model.top_p,
            max_completion_tokens: model.max_completion_tokens,
            stream: false,
        };

        tracing::debug!(model = %model.model, messages = history.len(), "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatClientError::ApiRequestFailed(format!("request: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChatClientError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ChatClientError::ApiRequestFailed(format!("status {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatClientError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatClientError::InvalidResponse("no message content in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use mockito::Matcher;
    use serde_json::json;

    fn client(base: &str) -> OpenAiCompatibleClient {
        let mut config = AppConfig::default().chat;
        config.api_base = base.to_string();
        config.api_key = "test-key".to_string();
        OpenAiCompatibleClient::new(&config).unwrap()
    }

    fn model() -> ModelConfig {
        ModelConfig::from(&AppConfig::default().chat)
    }

    #[tokio::test]
    async fn test_sends_history_and_fixed_sampling() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "mixtral-8x7b-32768",
                "temperature": 1.0,
                "top_p": 1.0,
                "max_completion_tokens": 1024,
                "stream": false,
                "messages": [
                    {"role": "system", "content": "persona"},
                    {"role": "user", "content": "How do I warm up my voice?"}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "Start with lip trills."}}]}"#)
            .create_async()
            .await;

        let history = [ChatTurn::system("persona"), ChatTurn::user("How do I warm up my voice?")];
        let reply = client(&server.url()).complete(&history, &model()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply, "Start with lip trills.");
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_variant() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let err = client(&server.url())
            .complete(&[ChatTurn::user("hi")], &model())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatClientError::RateLimited));
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .complete(&[ChatTurn::user("hi")], &model())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatClientError::InvalidResponse(_)));
    }
}
