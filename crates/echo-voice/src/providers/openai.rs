//! Streaming chat completions over an OpenAI-compatible endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::error_message;
use crate::capability::{ChatMessage, ChatModel, TokenStream};
use crate::config::ModelConfig;
use crate::error::VoiceError;
use crate::sse::token_stream;

/// Request body for `/v1/chat/completions` with `stream: true`.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

/// [`ChatModel`] backed by an OpenAI-compatible streaming endpoint.
pub struct OpenAiChatModel {
    client: Client,
    config: ModelConfig,
}

impl OpenAiChatModel {
    pub fn new(config: ModelConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VoiceError::ModelRequest(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream_reply(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, VoiceError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: &messages,
            stream: true,
            temperature: self.config.temperature,
            presence_penalty: self.config.presence_penalty,
            frequency_penalty: self.config.frequency_penalty,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VoiceError::ModelRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body, status);
            warn!(status = status.as_u16(), "Model endpoint rejected request: {message}");
            return Err(VoiceError::ModelStatus {
                status: status.as_u16(),
                message,
            });
        }

        debug!(model = %self.config.model, "Model stream opened");
        Ok(token_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;

    use crate::providers::test_server::serve_once;

    fn config(endpoint: String) -> ModelConfig {
        ModelConfig {
            endpoint,
            api_key: Some("sk-test".to_string()),
            ..ModelConfig::default()
        }
    }

    #[tokio::test]
    async fn streams_tokens_and_sends_expected_request() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"there.\"}}]}\n\n\
                   data: [DONE]\n\n";
        let (url, server) = serve_once("200 OK", "text/event-stream", sse.into()).await;
        let model = OpenAiChatModel::new(config(url)).unwrap();

        let tokens: Vec<String> = model
            .stream_reply(vec![ChatMessage::system("persona"), ChatMessage::user("hello")])
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens.concat(), "Hi there.");

        let request = server.await.unwrap();
        assert!(request.head.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert!(body["presence_penalty"].is_number());
    }

    #[tokio::test]
    async fn non_success_status_carries_json_message() {
        let body = r#"{"error":{"message":"Rate limit reached"}}"#;
        let (url, _server) = serve_once("429 Too Many Requests", "application/json", body.into()).await;
        let model = OpenAiChatModel::new(config(url)).unwrap();

        let Err(err) = model.stream_reply(vec![ChatMessage::user("hi")]).await else {
            panic!("expected an error");
        };
        match err {
            VoiceError::ModelStatus { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        let model = OpenAiChatModel::new(config("http://127.0.0.1:9/v1".to_string())).unwrap();
        let Err(err) = model.stream_reply(vec![ChatMessage::user("hi")]).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, VoiceError::ModelRequest(_)));
    }
}
