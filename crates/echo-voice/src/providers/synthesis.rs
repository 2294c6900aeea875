//! Text-to-speech over a plain HTTP endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::error_message;
use crate::capability::SpeechSynthesizer;
use crate::config::SynthesisConfig;
use crate::error::VoiceError;

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

/// [`SpeechSynthesizer`] that posts `{text}` and receives encoded audio.
pub struct HttpSynthesizer {
    client: Client,
    endpoint: String,
}

impl HttpSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VoiceError::SynthesisRequest(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes, VoiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesisRequest { text })
            .send()
            .await
            .map_err(|e| VoiceError::SynthesisRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body, status);
            warn!(status = status.as_u16(), "Synthesis endpoint rejected request: {message}");
            return Err(VoiceError::SynthesisStatus {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::SynthesisRequest(e.to_string()))?;
        debug!(chars = text.len(), bytes = audio.len(), "Synthesized chunk");
        Ok(audio)
    }
}
