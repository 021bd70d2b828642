//! Service seams — the three remote collaborators of the turn loop.
//!
//! All three are opaque request/response services: the controller never
//! retries or inspects transport detail, it only converts failures into the
//! loop's local recovery path. The reqwest-backed implementation lives in
//! [`crate::http`].

use async_trait::async_trait;

use nyra_core::HistoryMessage;

use crate::device::AudioClip;
use crate::error::VoiceError;

/// Speech-to-text: one recorded utterance in, a plain transcript out.
///
/// An empty (or whitespace-only) transcript means "no discernible speech" —
/// that is a result, not an error.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, VoiceError>;
}

/// Chat-reply: the user's message plus prior history in, the assistant's
/// reply text out.
#[async_trait]
pub trait ReplyService: Send + Sync {
    async fn reply(&self, message: &str, history: &[HistoryMessage])
    -> Result<String, VoiceError>;
}

/// Text-to-speech: plain text in, a playable audio clip out.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, VoiceError>;
}
