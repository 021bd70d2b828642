//! Audio playback — speaks one synthesized reply at a time.
//!
//! The [`Speaker`] wraps an [`AudioPlaybackDevice`] with the completion
//! contract the turn loop depends on: every [`play`](Speaker::play) invokes
//! its callback exactly once — on natural end, on playback error, or
//! immediately when muted — and an explicit [`stop`](Speaker::stop) is an
//! interruption, which never completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::device::{AudioClip, AudioPlaybackDevice, PlaybackDone};

/// A completion callback that can be handed to the device and still fired by
/// the caller on the error path, with exactly-once semantics either way.
struct FireOnce {
    inner: Mutex<Option<PlaybackDone>>,
}

impl FireOnce {
    fn new(on_done: PlaybackDone) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Some(on_done)),
        })
    }

    fn fire(&self) {
        let callback = self.inner.lock().ok().and_then(|mut slot| slot.take());
        if let Some(cb) = callback {
            cb();
        }
    }
}

/// The playback side of the voice loop: mute, interrupt, exactly-once
/// completion.
pub struct Speaker {
    device: Arc<dyn AudioPlaybackDevice>,
    muted: Arc<AtomicBool>,
}

impl Speaker {
    #[must_use]
    pub fn new(device: Arc<dyn AudioPlaybackDevice>) -> Self {
        Self {
            device,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Speak one clip. `on_done` fires exactly once:
    ///
    /// - immediately, without touching the device, when muted (callers must
    ///   not assume audio actually played);
    /// - immediately, when the device refuses the clip (a broken speaker
    ///   must never stall the conversation loop);
    /// - otherwise when playback ends naturally or errors mid-stream.
    ///
    /// Must not be called while [`is_speaking`](Self::is_speaking) — the
    /// device's `start` is not re-entrant.
    pub fn play(&self, clip: AudioClip, on_done: PlaybackDone) {
        if self.muted.load(Ordering::SeqCst) {
            tracing::debug!("Muted — skipping playback");
            on_done();
            return;
        }

        let once = FireOnce::new(on_done);
        let device_done: PlaybackDone = {
            let once = Arc::clone(&once);
            Box::new(move || once.fire())
        };

        if let Err(e) = self.device.start(clip, device_done) {
            tracing::warn!(error = %e, "Playback failed to start — completing anyway");
            once.fire();
        }
    }

    /// Interrupt any in-progress playback. The pending completion callback
    /// is discarded, not invoked: an interruption is not a completion, and
    /// the conversation loop does not resume from it.
    pub fn stop(&self) {
        self.device.stop();
    }

    /// Flip the mute flag; returns the new value. Muting while speaking also
    /// stops the current playback — a started utterance must not continue
    /// once mute is requested.
    pub fn toggle_mute(&self) -> bool {
        let now_muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        if now_muted && self.device.is_playing() {
            tracing::debug!("Muted mid-utterance — stopping playback");
            self.device.stop();
        }
        now_muted
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.device.is_playing()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::VoiceError;

    /// A playback device that records calls and lets the test complete or
    /// interrupt the current playback by hand.
    #[derive(Default)]
    struct FakeSpeakerDevice {
        starts: AtomicUsize,
        stops: AtomicUsize,
        playing: AtomicBool,
        fail_start: AtomicBool,
        pending: Mutex<Option<PlaybackDone>>,
    }

    impl FakeSpeakerDevice {
        fn complete_naturally(&self) {
            self.playing.store(false, Ordering::SeqCst);
            if let Some(cb) = self.pending.lock().unwrap().take() {
                cb();
            }
        }
    }

    impl AudioPlaybackDevice for FakeSpeakerDevice {
        fn start(&self, _clip: AudioClip, on_done: PlaybackDone) -> Result<(), VoiceError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(VoiceError::Decode("bad clip".to_string()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.playing.store(true, Ordering::SeqCst);
            *self.pending.lock().unwrap() = Some(on_done);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
            // Interrupt: drop the pending callback without firing it.
            self.pending.lock().unwrap().take();
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
    }

    fn counting_done(counter: &Arc<AtomicUsize>) -> PlaybackDone {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn natural_completion_fires_once() {
        let device = Arc::new(FakeSpeakerDevice::default());
        let speaker = Speaker::new(Arc::clone(&device) as Arc<dyn AudioPlaybackDevice>);
        let completions = Arc::new(AtomicUsize::new(0));

        speaker.play(AudioClip::empty(), counting_done(&completions));
        assert!(speaker.is_speaking());

        device.complete_naturally();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn muted_play_completes_without_device() {
        let device = Arc::new(FakeSpeakerDevice::default());
        let speaker = Speaker::new(Arc::clone(&device) as Arc<dyn AudioPlaybackDevice>);
        let completions = Arc::new(AtomicUsize::new(0));

        assert!(speaker.toggle_mute());
        speaker.play(AudioClip::empty(), counting_done(&completions));

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(device.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_error_still_completes_exactly_once() {
        let device = Arc::new(FakeSpeakerDevice::default());
        device.fail_start.store(true, Ordering::SeqCst);
        let speaker = Speaker::new(Arc::clone(&device) as Arc<dyn AudioPlaybackDevice>);
        let completions = Arc::new(AtomicUsize::new(0));

        speaker.play(AudioClip::empty(), counting_done(&completions));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_does_not_complete() {
        let device = Arc::new(FakeSpeakerDevice::default());
        let speaker = Speaker::new(Arc::clone(&device) as Arc<dyn AudioPlaybackDevice>);
        let completions = Arc::new(AtomicUsize::new(0));

        speaker.play(AudioClip::empty(), counting_done(&completions));
        speaker.stop();

        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn muting_mid_utterance_stops_playback() {
        let device = Arc::new(FakeSpeakerDevice::default());
        let speaker = Speaker::new(Arc::clone(&device) as Arc<dyn AudioPlaybackDevice>);
        let completions = Arc::new(AtomicUsize::new(0));

        speaker.play(AudioClip::empty(), counting_done(&completions));
        assert!(speaker.toggle_mute());

        assert_eq!(device.stops.load(Ordering::SeqCst), 1);
        assert!(!speaker.is_speaking());
        // The interrupted utterance never completes.
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unmuting_restores_audible_playback() {
        let device = Arc::new(FakeSpeakerDevice::default());
        let speaker = Speaker::new(Arc::clone(&device) as Arc<dyn AudioPlaybackDevice>);

        assert!(speaker.toggle_mute());
        assert!(!speaker.toggle_mute());

        let completions = Arc::new(AtomicUsize::new(0));
        speaker.play(AudioClip::empty(), counting_done(&completions));
        assert_eq!(device.starts.load(Ordering::SeqCst), 1);
    }
}
