//! HTTP implementations of the provider capabilities.
//!
//! | Feature | Type | Endpoint |
//! |---|---|---|
//! | streaming replies | [`OpenAiChatModel`] | OpenAI-compatible `/v1/chat/completions` |
//! | speech synthesis | [`HttpSynthesizer`] | `POST {text}` → `audio/mpeg` |

mod openai;
mod synthesis;

pub use openai::OpenAiChatModel;
pub use synthesis::HttpSynthesizer;

#[cfg(test)]
mod test_server;

/// Pull a readable message out of a non-2xx body.
///
/// Understands `{"error":{"message":…}}`, `{"error":"…"}` and
/// `{"message":"…"}`; anything else is returned trimmed, or the status text
/// when the body is empty.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value["error"]["message"]
            .as_str()
            .or_else(|| value["error"].as_str())
            .or_else(|| value["message"].as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
