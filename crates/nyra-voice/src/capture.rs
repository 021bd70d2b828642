//! Audio capture — microphone sessions with autonomous end-of-utterance
//! detection.
//!
//! The [`Recorder`] opens at most one [`CaptureSession`] at a time and runs a
//! silence monitor over it: the session's RMS level is sampled on a fixed
//! interval, and once no frame has crossed the threshold for the configured
//! timeout, capture stops on its own. Manual stop, silence auto-stop, and
//! abort all deliver through the same channel as one typed
//! [`CaptureOutcome`] — a session produces its result via exactly one path.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::device::{AudioCaptureDevice, AudioClip, CaptureSession};
use crate::error::VoiceError;

/// RMS amplitude above which a frame counts as sound.
///
/// Empirical — tuned for normal speech on consumer microphones, samples
/// normalised to [-1, 1].
pub const SILENCE_RMS_THRESHOLD: f32 = 0.01;

/// How long the microphone must stay below the threshold before capture
/// auto-stops.
pub const SILENCE_TIMEOUT_MS: u64 = 2_000;

/// How often the silence monitor samples the session's RMS level.
pub const SILENCE_POLL_INTERVAL_MS: u64 = 200;

/// Silence detection parameters.
#[derive(Debug, Clone)]
pub struct SilenceConfig {
    /// RMS amplitude above which a frame counts as sound.
    pub rms_threshold: f32,

    /// Continuous silence required before auto-stop.
    pub timeout: Duration,

    /// Monitor sampling interval.
    pub poll_interval: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            rms_threshold: SILENCE_RMS_THRESHOLD,
            timeout: Duration::from_millis(SILENCE_TIMEOUT_MS),
            poll_interval: Duration::from_millis(SILENCE_POLL_INTERVAL_MS),
        }
    }
}

/// Why a capture session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The user stopped it.
    Manual,

    /// The silence monitor decided the utterance ended.
    SilenceTimeout,

    /// The capture was cancelled; the clip is to be discarded.
    Aborted,
}

/// The single result of one capture session.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub reason: StopReason,
    pub clip: AudioClip,
}

impl CaptureOutcome {
    /// The zero-byte outcome used when no capture was active.
    #[must_use]
    pub fn empty(reason: StopReason) -> Self {
        Self {
            reason,
            clip: AudioClip::empty(),
        }
    }
}

/// One open microphone capture, owned by the monitor task.
struct RecordingSession {
    mic: Box<dyn CaptureSession>,
    started_at: Instant,
    last_sound_at: Instant,
}

struct ActiveCapture {
    stop_tx: mpsc::Sender<StopReason>,
    outcome_rx: mpsc::Receiver<CaptureOutcome>,
}

/// Opens microphone sessions and owns the silence monitor.
///
/// Invariant: at most one session is open per recorder; [`start`] while one
/// is active is an error, never a queue.
///
/// [`start`]: Recorder::start
pub struct Recorder {
    device: Arc<dyn AudioCaptureDevice>,
    config: SilenceConfig,
    active: Option<ActiveCapture>,
}

impl Recorder {
    #[must_use]
    pub fn new(device: Arc<dyn AudioCaptureDevice>, config: SilenceConfig) -> Self {
        Self {
            device,
            config,
            active: None,
        }
    }

    /// Whether a capture session is currently open.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Open a microphone session and start the silence monitor.
    ///
    /// Device failures (permission denied, no input device) propagate to the
    /// caller; the recorder stays inactive and a later [`wait`](Self::wait)
    /// resolves immediately with a zero-byte outcome.
    pub fn start(&mut self) -> Result<(), VoiceError> {
        if self.active.is_some() {
            return Err(VoiceError::CaptureInProgress);
        }

        let mic = self.device.open()?;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = mpsc::channel(1);

        let now = Instant::now();
        let session = RecordingSession {
            mic,
            started_at: now,
            last_sound_at: now,
        };

        tokio::spawn(run_monitor(session, self.config.clone(), stop_rx, outcome_tx));

        self.active = Some(ActiveCapture { stop_tx, outcome_rx });
        tracing::debug!("Capture started");
        Ok(())
    }

    /// Ask the monitor to stop the current capture with the given reason.
    ///
    /// Idempotent; a no-op when nothing is recording or a stop is already
    /// pending. The outcome still arrives via [`wait`](Self::wait).
    pub fn request_stop(&self, reason: StopReason) {
        if let Some(active) = &self.active {
            // Full channel means a stop is already on its way.
            let _ = active.stop_tx.try_send(reason);
        }
    }

    /// Await the current session's outcome.
    ///
    /// Resolves immediately with a zero-byte `Manual` outcome when no capture
    /// is active, so callers can treat "stop" as idempotent. Cancel-safe: if
    /// the future is dropped before the outcome arrives, the session stays
    /// active and a later call picks the outcome up.
    pub async fn wait(&mut self) -> CaptureOutcome {
        let Some(active) = self.active.as_mut() else {
            return CaptureOutcome::empty(StopReason::Manual);
        };

        let outcome = active.outcome_rx.recv().await.unwrap_or_else(|| {
            tracing::warn!("Capture monitor dropped without delivering an outcome");
            CaptureOutcome::empty(StopReason::Aborted)
        });
        self.active = None;
        outcome
    }
}

/// The silence monitor: polls the session's RMS level until silence times
/// out or a stop is requested, then finishes the session and delivers the
/// single outcome. Resources are released inside `finish` *before* the
/// outcome is sent.
async fn run_monitor(
    mut session: RecordingSession,
    config: SilenceConfig,
    mut stop_rx: mpsc::Receiver<StopReason>,
    outcome_tx: mpsc::Sender<CaptureOutcome>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;

            requested = stop_rx.recv() => {
                break requested.unwrap_or(StopReason::Aborted);
            }

            _ = ticker.tick() => {
                let rms = session.mic.rms_level();
                let now = Instant::now();
                if rms > config.rms_threshold {
                    session.last_sound_at = now;
                } else if now.duration_since(session.last_sound_at) >= config.timeout {
                    tracing::debug!(
                        silent_ms = now.duration_since(session.last_sound_at).as_millis() as u64,
                        "Silence timeout — auto-stopping capture"
                    );
                    break StopReason::SilenceTimeout;
                }
            }
        }
    };

    let elapsed_ms = session.started_at.elapsed().as_millis() as u64;
    let clip = match session.mic.finish() {
        Ok(clip) => clip,
        Err(e) => {
            tracing::warn!(error = %e, "Capture session failed to finish — delivering empty clip");
            AudioClip::empty()
        }
    };

    tracing::debug!(?reason, bytes = clip.byte_len(), elapsed_ms, "Capture stopped");
    let _ = outcome_tx.send(CaptureOutcome { reason, clip }).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// A microphone that replays a scripted RMS sequence. Past the end of
    /// the script it reports silence.
    struct ScriptedMic {
        levels: Vec<f32>,
        cursor: Mutex<usize>,
        clip_bytes: usize,
        finished: Arc<AtomicBool>,
    }

    impl CaptureSession for ScriptedMic {
        fn rms_level(&self) -> f32 {
            let mut cursor = self.cursor.lock().unwrap();
            let level = self.levels.get(*cursor).copied().unwrap_or(0.0);
            *cursor += 1;
            level
        }

        fn finish(self: Box<Self>) -> Result<AudioClip, VoiceError> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(AudioClip::new(vec![0u8; self.clip_bytes], "audio/wav"))
        }
    }

    struct ScriptedDevice {
        levels: Vec<f32>,
        clip_bytes: usize,
        finished: Arc<AtomicBool>,
        opens: AtomicUsize,
        fail_open: bool,
    }

    impl ScriptedDevice {
        fn new(levels: Vec<f32>, clip_bytes: usize) -> (Arc<Self>, Arc<AtomicBool>) {
            let finished = Arc::new(AtomicBool::new(false));
            let device = Arc::new(Self {
                levels,
                clip_bytes,
                finished: Arc::clone(&finished),
                opens: AtomicUsize::new(0),
                fail_open: false,
            });
            (device, finished)
        }
    }

    impl AudioCaptureDevice for ScriptedDevice {
        fn open(&self) -> Result<Box<dyn CaptureSession>, VoiceError> {
            if self.fail_open {
                return Err(VoiceError::PermissionDenied);
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.finished.store(false, Ordering::SeqCst);
            Ok(Box::new(ScriptedMic {
                levels: self.levels.clone(),
                cursor: Mutex::new(0),
                clip_bytes: self.clip_bytes,
                finished: Arc::clone(&self.finished),
            }))
        }
    }

    fn fast_config() -> SilenceConfig {
        SilenceConfig {
            rms_threshold: SILENCE_RMS_THRESHOLD,
            timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn speech_then_silence_auto_stops() {
        // Loud for a few frames, then quiet — the monitor should refresh the
        // last-sound timestamp during speech and time out afterwards.
        let (device, finished) = ScriptedDevice::new(vec![0.5, 0.5, 0.5, 0.5], 4_000);
        let mut recorder = Recorder::new(device, fast_config());

        recorder.start().unwrap();
        let outcome = recorder.wait().await;

        assert_eq!(outcome.reason, StopReason::SilenceTimeout);
        assert_eq!(outcome.clip.byte_len(), 4_000);
        assert!(finished.load(Ordering::SeqCst), "session must be released");
        assert!(!recorder.is_active());
    }

    #[tokio::test]
    async fn immediate_silence_auto_stops_with_small_clip() {
        let (device, _finished) = ScriptedDevice::new(vec![], 12);
        let mut recorder = Recorder::new(device, fast_config());

        recorder.start().unwrap();
        let outcome = recorder.wait().await;

        assert_eq!(outcome.reason, StopReason::SilenceTimeout);
        assert_eq!(outcome.clip.byte_len(), 12);
    }

    #[tokio::test]
    async fn manual_stop_delivers_manual_reason() {
        // Constant speech: silence never fires, only the manual stop.
        let (device, finished) = ScriptedDevice::new(vec![0.5; 1000], 2_000);
        let mut recorder = Recorder::new(device, fast_config());

        recorder.start().unwrap();
        recorder.request_stop(StopReason::Manual);
        let outcome = recorder.wait().await;

        assert_eq!(outcome.reason, StopReason::Manual);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let (device, _) = ScriptedDevice::new(vec![0.5; 1000], 0);
        let mut recorder = Recorder::new(device, fast_config());

        recorder.start().unwrap();
        assert!(matches!(
            recorder.start(),
            Err(VoiceError::CaptureInProgress)
        ));

        recorder.request_stop(StopReason::Aborted);
        let outcome = recorder.wait().await;
        assert_eq!(outcome.reason, StopReason::Aborted);
    }

    #[tokio::test]
    async fn wait_without_active_capture_resolves_empty() {
        let (device, _) = ScriptedDevice::new(vec![], 0);
        let mut recorder = Recorder::new(device, fast_config());

        let outcome = recorder.wait().await;
        assert_eq!(outcome.reason, StopReason::Manual);
        assert!(outcome.clip.is_empty());
    }

    #[tokio::test]
    async fn repeated_cycles_release_each_session() {
        let (device, finished) = ScriptedDevice::new(vec![0.5; 1000], 100);
        let mic: Arc<dyn AudioCaptureDevice> = Arc::clone(&device) as Arc<dyn AudioCaptureDevice>;
        let mut recorder = Recorder::new(mic, fast_config());

        for _ in 0..3 {
            recorder.start().unwrap();
            recorder.request_stop(StopReason::Manual);
            let outcome = recorder.wait().await;
            assert_eq!(outcome.reason, StopReason::Manual);
            assert!(finished.load(Ordering::SeqCst));
        }
        assert_eq!(device.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn open_failure_leaves_recorder_inactive() {
        let device = Arc::new(ScriptedDevice {
            levels: vec![],
            clip_bytes: 0,
            finished: Arc::new(AtomicBool::new(false)),
            opens: AtomicUsize::new(0),
            fail_open: true,
        });
        let mut recorder = Recorder::new(device, fast_config());

        assert!(matches!(
            recorder.start(),
            Err(VoiceError::PermissionDenied)
        ));
        assert!(!recorder.is_active());

        let outcome = recorder.wait().await;
        assert!(outcome.clip.is_empty());
    }
}
