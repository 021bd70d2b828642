//! The turn controller: one async task orchestrating the spoken
//! conversation loop.
//!
//! The controller consumes [`VoiceCommand`]s, drives the capture and playback
//! units through the three remote services, and reports everything observable
//! as [`VoiceEvent`]s. State is a single [`VoiceModeState`] value; there are
//! no parallel boolean flags to fall out of sync.
//!
//! Cancellation is structural. User commands are polled with priority
//! (`biased` select), so a queued exit always beats a queued capture outcome
//! or playback completion. Exiting voice mode bumps a generation counter;
//! playback completions carry the generation captured when playback started,
//! and stale ones are ignored. No timing windows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use nyra_core::{ConversationTurn, Transcript, TurnId};

use crate::capture::{CaptureOutcome, Recorder, SilenceConfig, StopReason};
use crate::device::{AudioCaptureDevice, AudioClip, AudioPlaybackDevice};
use crate::playback::Speaker;
use crate::services::{ReplyService, SpeechSynthesis, SpeechToText};
use crate::text_utils::clean_for_speech;

/// Recordings smaller than this are treated as containing no speech and are
/// never sent to the transcription service.
pub const MIN_VIABLE_BYTES: usize = 1_000;

/// Pause between the assistant finishing an utterance and the microphone
/// reopening, so the tail of the playback is not captured as user speech.
pub const RELISTEN_DELAY_MS: u64 = 300;

/// Spoken when transcription fails outright.
const TRANSCRIPTION_APOLOGY: &str =
    "Sorry, I couldn't make out what you said. Could you try again?";

/// Spoken (and shown in place of the placeholder) when the reply service
/// fails.
const REPLY_APOLOGY: &str = "Sorry, I ran into a problem answering that. Could you try again?";

/// Where the controller is in the conversation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceModeState {
    /// Not in voice mode. Typed messages are accepted here.
    Idle,

    /// Microphone open, silence monitor running.
    Listening,

    /// Utterance captured, speech-to-text in flight.
    Transcribing,

    /// Reply (and then speech) in flight. The controller stays in this state
    /// while the assistant's reply is being spoken.
    Thinking,
}

/// What the user can ask the controller to do.
#[derive(Debug)]
pub enum VoiceCommand {
    /// The one voice button. Idle: enter voice mode. Listening: stop the
    /// recording now. While the assistant speaks: interrupt and listen.
    Primary,

    /// Leave voice mode immediately. Hard cancellation boundary: whatever is
    /// in flight is discarded without appending notices or error turns.
    ExitVoiceMode,

    /// Flip assistant audio on/off. Muting mid-utterance cuts the audio and
    /// the loop continues as if the utterance had finished.
    ToggleMute,

    /// The typed path: one text message, answered in the transcript without
    /// speech. Ignored while in voice mode.
    SendText(String),

    /// Stop the controller task.
    Shutdown,
}

/// Everything observable about the controller, in the order it happened.
#[derive(Debug, Clone, Serialize)]
pub enum VoiceEvent {
    StateChanged(VoiceModeState),

    /// A new turn was appended to the transcript (user turns, completed
    /// assistant turns, and the transient placeholder).
    TurnAppended(ConversationTurn),

    /// A placeholder turn was resolved in place with the real reply text.
    /// Always emitted before any speech for that reply starts.
    TurnResolved { id: TurnId, text: String },

    /// A transient, non-transcript message for the user (no speech detected,
    /// microphone unavailable, synthesis failed).
    Notice(String),

    MuteChanged(bool),
    SpeakingStarted,
    SpeakingFinished,
}

/// Turn loop tuning knobs.
#[derive(Debug, Clone)]
pub struct TurnControllerConfig {
    /// Minimum clip size considered a real utterance.
    pub min_viable_bytes: usize,

    /// Pause before the microphone reopens after the assistant speaks.
    pub relisten_delay: Duration,

    /// Silence detection parameters for the capture unit.
    pub silence: SilenceConfig,
}

impl Default for TurnControllerConfig {
    fn default() -> Self {
        Self {
            min_viable_bytes: MIN_VIABLE_BYTES,
            relisten_delay: Duration::from_millis(RELISTEN_DELAY_MS),
            silence: SilenceConfig::default(),
        }
    }
}

/// The three remote collaborators, bundled for construction.
#[derive(Clone)]
pub struct VoiceServices {
    pub stt: Arc<dyn SpeechToText>,
    pub chat: Arc<dyn ReplyService>,
    pub tts: Arc<dyn SpeechSynthesis>,
}

enum SpeakResult {
    /// Playback started; completion will arrive as an internal event.
    Started,

    /// Nothing to say or muted. Treated as an immediate completion.
    Skipped,

    /// Synthesis failed. The reply text is already in the transcript.
    Failed,

    /// Voice mode was exited while synthesizing; the caller stops here.
    Cancelled,
}

/// The conversation loop. Construct, then [`run`](Self::run) to completion
/// on its own task.
pub struct TurnController {
    commands: mpsc::UnboundedReceiver<VoiceCommand>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    recorder: Recorder,
    speaker: Speaker,
    services: VoiceServices,
    transcript: Transcript,
    state: VoiceModeState,
    config: TurnControllerConfig,
    shutting_down: bool,

    /// Bumped on every exit from voice mode. Playback completions are
    /// stamped with the generation current when playback started; a stale
    /// stamp means the completion belongs to an abandoned session.
    generation: u64,
    playback_done_tx: mpsc::UnboundedSender<u64>,
    playback_done_rx: mpsc::UnboundedReceiver<u64>,
}

impl TurnController {
    #[must_use]
    pub fn new(
        capture: Arc<dyn AudioCaptureDevice>,
        playback: Arc<dyn AudioPlaybackDevice>,
        services: VoiceServices,
        config: TurnControllerConfig,
        commands: mpsc::UnboundedReceiver<VoiceCommand>,
        events: mpsc::UnboundedSender<VoiceEvent>,
    ) -> Self {
        let (playback_done_tx, playback_done_rx) = mpsc::unbounded_channel();
        Self {
            commands,
            events,
            recorder: Recorder::new(capture, config.silence.clone()),
            speaker: Speaker::new(playback),
            services,
            transcript: Transcript::new(),
            state: VoiceModeState::Idle,
            config,
            shutting_down: false,
            generation: 0,
            playback_done_tx,
            playback_done_rx,
        }
    }

    /// Run the loop until [`VoiceCommand::Shutdown`] or the command channel
    /// closes. Never returns an error: every failure is converted into the
    /// loop's local recovery path.
    pub async fn run(mut self) {
        tracing::info!("Turn controller started");

        while !self.shutting_down {
            enum Wake {
                Command(Option<VoiceCommand>),
                Capture(CaptureOutcome),
                PlaybackDone(Option<u64>),
            }

            let wake = {
                let capturing = self.recorder.is_active();
                let Self {
                    commands,
                    recorder,
                    playback_done_rx,
                    ..
                } = &mut self;

                tokio::select! {
                    biased;

                    cmd = commands.recv() => Wake::Command(cmd),
                    done = playback_done_rx.recv() => Wake::PlaybackDone(done),
                    outcome = recorder.wait(), if capturing => Wake::Capture(outcome),
                }
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Capture(outcome) => self.handle_capture_outcome(outcome).await,
                Wake::PlaybackDone(Some(generation)) => {
                    self.handle_playback_done(generation).await;
                }
                Wake::PlaybackDone(None) => {}
            }
        }

        self.recorder.request_stop(StopReason::Aborted);
        self.speaker.stop();
        tracing::info!("Turn controller stopped");
    }

    async fn handle_command(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::Primary => match self.state {
                VoiceModeState::Idle => {
                    tracing::info!("Entering voice mode");
                    self.begin_listening().await;
                }
                VoiceModeState::Listening => {
                    tracing::debug!("Manual stop requested");
                    self.recorder.request_stop(StopReason::Manual);
                }
                VoiceModeState::Thinking if self.speaker.is_speaking() => {
                    tracing::debug!("Interrupting playback");
                    self.speaker.stop();
                    self.emit(VoiceEvent::SpeakingFinished);
                    // An interruption means the user wants to talk now, so
                    // the relisten delay is skipped.
                    self.begin_listening().await;
                }
                state @ (VoiceModeState::Transcribing | VoiceModeState::Thinking) => {
                    tracing::debug!(?state, "Primary ignored while a turn is in flight");
                }
            },

            VoiceCommand::ExitVoiceMode => self.exit_voice_mode(),

            VoiceCommand::ToggleMute => {
                let was_speaking = self.speaker.is_speaking();
                let muted = self.speaker.toggle_mute();
                self.emit(VoiceEvent::MuteChanged(muted));
                if muted && was_speaking {
                    // The utterance was cut short; the loop continues as if
                    // it had completed.
                    self.emit(VoiceEvent::SpeakingFinished);
                    if self.state == VoiceModeState::Thinking {
                        self.relisten().await;
                    }
                }
            }

            VoiceCommand::SendText(text) => {
                if self.state == VoiceModeState::Idle {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        self.run_reply_turn(text, false).await;
                    }
                } else {
                    tracing::debug!("Typed input ignored while in voice mode");
                }
            }

            VoiceCommand::Shutdown => {
                self.shutting_down = true;
            }
        }
    }

    /// A capture session delivered its single outcome.
    async fn handle_capture_outcome(&mut self, outcome: CaptureOutcome) {
        // Outcomes from a session the user already left are drained silently:
        // no notice or error turn may appear after an explicit exit.
        if self.state != VoiceModeState::Listening || outcome.reason == StopReason::Aborted {
            tracing::debug!(reason = ?outcome.reason, "Discarding capture outcome");
            return;
        }

        tracing::debug!(
            reason = ?outcome.reason,
            bytes = outcome.clip.byte_len(),
            "Utterance captured"
        );

        if outcome.clip.byte_len() < self.config.min_viable_bytes {
            self.emit(VoiceEvent::Notice(
                "No speech detected. Leaving voice mode.".to_string(),
            ));
            self.set_state(VoiceModeState::Idle);
            return;
        }

        self.run_voice_turn(outcome.clip).await;
    }

    /// Transcribe a viable clip and run the reply turn for it.
    async fn run_voice_turn(&mut self, clip: AudioClip) {
        self.set_state(VoiceModeState::Transcribing);

        let stt = Arc::clone(&self.services.stt);
        let result = self
            .await_cancellable(async move { stt.transcribe(&clip).await })
            .await;

        let message = match result {
            None => return,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Transcription failed");
                let id = self.transcript.push_assistant(TRANSCRIPTION_APOLOGY);
                self.emit_turn(id);
                self.set_state(VoiceModeState::Idle);
                let _ = self.speak(TRANSCRIPTION_APOLOGY).await;
                return;
            }
            Some(Ok(text)) => text.trim().to_string(),
        };

        if message.is_empty() {
            self.emit(VoiceEvent::Notice(
                "No speech detected. Leaving voice mode.".to_string(),
            ));
            self.set_state(VoiceModeState::Idle);
            return;
        }

        self.run_reply_turn(message, true).await;
    }

    /// One user message through the reply service: append the user turn and
    /// a placeholder, fetch the reply, resolve the placeholder in place.
    /// Spoken turns continue the voice loop; typed turns end back at Idle.
    async fn run_reply_turn(&mut self, message: String, spoken: bool) {
        // The history sent to the reply service covers everything before
        // this message, placeholders excluded.
        let history = self.transcript.reply_history();

        let user_id = self.transcript.push_user(message.clone());
        self.emit_turn(user_id);
        let placeholder_id = self.transcript.push_placeholder();
        self.emit_turn(placeholder_id);

        self.set_state(VoiceModeState::Thinking);

        let chat = Arc::clone(&self.services.chat);
        let result = self
            .await_cancellable(async move { chat.reply(&message, &history).await })
            .await;

        let reply = match result {
            None => return,
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Reply service failed");
                REPLY_APOLOGY.to_string()
            }
        };

        // Resolved before any speech starts, so the text is on screen while
        // (and regardless of whether) it is spoken.
        self.transcript.resolve_placeholder(placeholder_id, reply.clone());
        self.emit(VoiceEvent::TurnResolved {
            id: placeholder_id,
            text: reply.clone(),
        });

        if !spoken {
            self.set_state(VoiceModeState::Idle);
            return;
        }

        match self.speak(&reply).await {
            SpeakResult::Started | SpeakResult::Cancelled => {}
            SpeakResult::Skipped => self.relisten().await,
            SpeakResult::Failed => {
                self.emit(VoiceEvent::Notice(
                    "Speech synthesis failed. The reply is shown above.".to_string(),
                ));
                self.relisten().await;
            }
        }
    }

    /// Clean, synthesize, and start playback of one reply.
    async fn speak(&mut self, text: &str) -> SpeakResult {
        if self.speaker.is_muted() {
            tracing::debug!("Muted, skipping speech synthesis");
            return SpeakResult::Skipped;
        }

        let spoken = clean_for_speech(text);
        if spoken.is_empty() {
            return SpeakResult::Skipped;
        }

        let tts = Arc::clone(&self.services.tts);
        let clip = match self
            .await_cancellable(async move { tts.synthesize(&spoken).await })
            .await
        {
            None => return SpeakResult::Cancelled,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Speech synthesis failed");
                return SpeakResult::Failed;
            }
            Some(Ok(clip)) => clip,
        };

        if clip.is_empty() {
            return SpeakResult::Skipped;
        }

        let generation = self.generation;
        let done_tx = self.playback_done_tx.clone();
        self.emit(VoiceEvent::SpeakingStarted);
        self.speaker.play(
            clip,
            Box::new(move || {
                let _ = done_tx.send(generation);
            }),
        );
        SpeakResult::Started
    }

    /// Playback finished naturally (or completed trivially because muted or
    /// broken). Stale generations belong to an exited session.
    async fn handle_playback_done(&mut self, generation: u64) {
        if generation != self.generation {
            tracing::debug!("Stale playback completion ignored");
            return;
        }

        self.emit(VoiceEvent::SpeakingFinished);
        if self.state == VoiceModeState::Thinking {
            // The seamless loop: assistant finished, listen again.
            self.relisten().await;
        }
    }

    /// Wait out the relisten delay, then reopen the microphone. Commands
    /// arriving during the delay can still cancel the session.
    async fn relisten(&mut self) {
        let delay = tokio::time::sleep(self.config.relisten_delay);
        if self.await_cancellable(delay).await.is_some() {
            self.begin_listening().await;
        }
    }

    /// Open the microphone and enter Listening. A device failure is a
    /// notice, not a crash; the controller drops back to Idle.
    async fn begin_listening(&mut self) {
        // An aborted session may still owe its outcome; take it before
        // reopening so the recorder's one-session invariant holds.
        if self.recorder.is_active() {
            let _ = self.recorder.wait().await;
        }

        match self.recorder.start() {
            Ok(()) => self.set_state(VoiceModeState::Listening),
            Err(e) => {
                tracing::warn!(error = %e, "Could not open the microphone");
                self.emit(VoiceEvent::Notice(format!("Microphone unavailable: {e}")));
                self.set_state(VoiceModeState::Idle);
            }
        }
    }

    /// The hard cancellation boundary. Everything in flight is discarded;
    /// nothing observable happens afterwards on the old session's behalf.
    fn exit_voice_mode(&mut self) {
        tracing::info!("Exiting voice mode");
        self.generation = self.generation.wrapping_add(1);
        if self.recorder.is_active() {
            self.recorder.request_stop(StopReason::Aborted);
        }
        if self.speaker.is_speaking() {
            self.speaker.stop();
            self.emit(VoiceEvent::SpeakingFinished);
        }
        self.set_state(VoiceModeState::Idle);
    }

    /// Await a turn-phase future while still answering user commands.
    /// Returns `None` when the user exited voice mode (or shut down); the
    /// phase's work is abandoned and the exit has already been handled.
    async fn await_cancellable<T>(&mut self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::pin!(fut);
        loop {
            enum Wake<T> {
                Command(Option<VoiceCommand>),
                Done(T),
            }

            let wake = tokio::select! {
                biased;

                cmd = self.commands.recv() => Wake::Command(cmd),
                value = &mut fut => Wake::Done(value),
            };

            match wake {
                Wake::Done(value) => return Some(value),
                Wake::Command(None) => {
                    self.shutting_down = true;
                    self.exit_voice_mode();
                    return None;
                }
                Wake::Command(Some(VoiceCommand::Shutdown)) => {
                    self.shutting_down = true;
                    self.exit_voice_mode();
                    return None;
                }
                Wake::Command(Some(VoiceCommand::ExitVoiceMode)) => {
                    self.exit_voice_mode();
                    return None;
                }
                Wake::Command(Some(VoiceCommand::ToggleMute)) => {
                    let muted = self.speaker.toggle_mute();
                    self.emit(VoiceEvent::MuteChanged(muted));
                }
                Wake::Command(Some(command)) => {
                    tracing::debug!(?command, "Command ignored while a turn is in flight");
                }
            }
        }
    }

    fn set_state(&mut self, state: VoiceModeState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "State change");
            self.state = state;
            self.emit(VoiceEvent::StateChanged(state));
        }
    }

    fn emit_turn(&self, id: TurnId) {
        if let Some(turn) = self.transcript.get(id) {
            self.emit(VoiceEvent::TurnAppended(turn.clone()));
        }
    }

    fn emit(&self, event: VoiceEvent) {
        // A closed event channel means nobody is watching; the loop itself
        // keeps running until told to stop.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_named_constants() {
        let config = TurnControllerConfig::default();
        assert_eq!(config.min_viable_bytes, MIN_VIABLE_BYTES);
        assert_eq!(config.relisten_delay, Duration::from_millis(RELISTEN_DELAY_MS));
    }

    #[test]
    fn states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(VoiceModeState::Listening).unwrap(),
            "listening"
        );
    }
}
