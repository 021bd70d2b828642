//! HTTP client for the Nyra backend — transcribe, chat, and speak endpoints.
//!
//! One client implements all three [`crate::services`] traits against the
//! portfolio API:
//!
//! - `POST {base}/api/chat/transcribe` — raw audio body, response is the
//!   plain-text transcript
//! - `POST {base}/api/chat` — JSON `{message, history}`, response `{reply}`
//! - `POST {base}/api/chat/speak` — JSON `{text}`, response is an audio blob

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nyra_core::HistoryMessage;

use crate::device::AudioClip;
use crate::error::VoiceError;
use crate::services::{ReplyService, SpeechSynthesis, SpeechToText};

/// Request timeout for all three endpoints.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Mime type assumed for synthesized audio when the server omits the header.
const DEFAULT_SPEECH_MIME: &str = "audio/mpeg";

#[derive(Serialize)]
struct ReplyRequest<'a> {
    message: &'a str,
    history: &'a [HistoryMessage],
}

#[derive(Deserialize)]
struct ReplyResponse {
    reply: String,
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

/// Client for the Nyra chat API.
#[derive(Debug, Clone)]
pub struct NyraApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl NyraApiClient {
    /// Build a client for the given base URL (no trailing slash needed).
    pub fn new(base_url: impl Into<String>) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Reply(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Render a non-success response as `"<status>: <body excerpt>"`.
async fn status_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    format!("{status}: {excerpt}")
}

#[async_trait]
impl SpeechToText for NyraApiClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, VoiceError> {
        let response = self
            .client
            .post(self.endpoint("/api/chat/transcribe"))
            .header(reqwest::header::CONTENT_TYPE, clip.mime_type())
            .body(clip.bytes().to_vec())
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::Transcription(status_error(response).await));
        }

        let text = response
            .text()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl ReplyService for NyraApiClient {
    async fn reply(
        &self,
        message: &str,
        history: &[HistoryMessage],
    ) -> Result<String, VoiceError> {
        let response = self
            .client
            .post(self.endpoint("/api/chat"))
            .json(&ReplyRequest { message, history })
            .send()
            .await
            .map_err(|e| VoiceError::Reply(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::Reply(status_error(response).await));
        }

        let parsed: ReplyResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Reply(e.to_string()))?;
        Ok(parsed.reply)
    }
}

#[async_trait]
impl SpeechSynthesis for NyraApiClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, VoiceError> {
        let response = self
            .client
            .post(self.endpoint("/api/chat/speak"))
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::Synthesis(status_error(response).await));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_SPEECH_MIME)
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;

        Ok(AudioClip::new(bytes.to_vec(), mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyra_core::HistoryRole;

    #[test]
    fn base_url_trailing_slash_is_normalised() {
        let client = NyraApiClient::new("https://api.example.com/").unwrap();
        assert_eq!(
            client.endpoint("/api/chat"),
            "https://api.example.com/api/chat"
        );
    }

    #[test]
    fn reply_request_serialises_role_mapped_history() {
        let history = vec![
            HistoryMessage {
                role: HistoryRole::User,
                content: "hi".to_string(),
            },
            HistoryMessage {
                role: HistoryRole::Model,
                content: "hello".to_string(),
            },
        ];
        let body = serde_json::to_value(ReplyRequest {
            message: "next",
            history: &history,
        })
        .unwrap();

        assert_eq!(body["message"], "next");
        assert_eq!(body["history"][0]["role"], "user");
        assert_eq!(body["history"][1]["role"], "model");
    }
}
