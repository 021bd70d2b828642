//! Device seams — the traits the controller logic is written against.
//!
//! Real microphones and speakers (cpal/rodio) live in [`crate::audio`];
//! tests drive the same traits with scripted fakes, so the silence monitor
//! and the turn loop are exercised without audio hardware.

use crate::error::VoiceError;

/// One encoded audio blob — a recorded utterance or a synthesized reply.
///
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    mime_type: String,
}

impl AudioClip {
    #[must_use]
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// The zero-byte clip returned when no capture was active.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), "application/octet-stream")
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A microphone. Opening it yields an exclusively-owned live session.
///
/// Opening may fail — permission denied, no device — and that failure is
/// reported, non-fatal: the caller surfaces it and capture simply never
/// starts.
pub trait AudioCaptureDevice: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn CaptureSession>, VoiceError>;
}

/// One live microphone session.
///
/// The session owns the underlying stream and encoder for its whole
/// lifetime; nothing else may touch them.
pub trait CaptureSession: Send {
    /// RMS amplitude of the most recent audio frame, over samples normalised
    /// to [-1, 1]. Polled by the silence monitor.
    fn rms_level(&self) -> f32;

    /// Stop the stream, flush the encoder, and release every resource, then
    /// return the encoded clip. Consumes the session: there is no way to
    /// read from it afterwards.
    fn finish(self: Box<Self>) -> Result<AudioClip, VoiceError>;
}

/// Completion callback for one playback. Fires exactly once.
pub type PlaybackDone = Box<dyn FnOnce() + Send + 'static>;

/// A speaker for synthesized replies.
pub trait AudioPlaybackDevice: Send + Sync + 'static {
    /// Begin playing the clip. `on_done` fires exactly once when playback
    /// ends naturally or fails mid-stream — and never after [`stop`].
    ///
    /// If this returns an error, `on_done` was not and will not be invoked;
    /// the caller owns the failure.
    ///
    /// Not re-entrant: callers must not start a new playback while one is
    /// active without stopping it first.
    ///
    /// [`stop`]: AudioPlaybackDevice::stop
    fn start(&self, clip: AudioClip, on_done: PlaybackDone) -> Result<(), VoiceError>;

    /// Interrupt any in-progress playback immediately and discard the
    /// pending completion callback.
    fn stop(&self);

    fn is_playing(&self) -> bool;
}
