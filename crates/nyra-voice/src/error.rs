//! Voice engine error types.

/// Errors that can occur in the voice engine.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// A capture session is already open — stop it before starting another.
    #[error("A capture session is already in progress")]
    CaptureInProgress,

    /// No audio input device found.
    #[error("No audio input device found")]
    NoInputDevice,

    /// Microphone access refused by the OS or the user.
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// Failed to open or read the audio input stream.
    #[error("Audio input stream failed: {0}")]
    InputStream(String),

    /// Failed to open or write the audio output stream.
    #[error("Audio output stream failed: {0}")]
    OutputStream(String),

    /// Failed to decode an audio clip for playback.
    #[error("Audio decode failed: {0}")]
    Decode(String),

    /// Audio resampling error.
    #[error("Audio resampling failed: {0}")]
    Resample(String),

    /// The speech-to-text service failed.
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// The chat-reply service failed.
    #[error("Reply request failed: {0}")]
    Reply(String),

    /// The text-to-speech service failed.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
