#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

//! Terminal entry point - the composition root.
//!
//! This is the only place where real devices and the HTTP client are wired
//! into the turn controller. Everything interactive goes over the
//! controller's command/event channels.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use nyra_core::ChatRole;
use nyra_voice::capture::{
    SILENCE_POLL_INTERVAL_MS, SILENCE_RMS_THRESHOLD, SILENCE_TIMEOUT_MS, SilenceConfig,
};
use nyra_voice::controller::{
    MIN_VIABLE_BYTES, RELISTEN_DELAY_MS, TurnController, TurnControllerConfig, VoiceCommand,
    VoiceEvent, VoiceModeState, VoiceServices,
};
use nyra_voice::device::{AudioCaptureDevice, AudioPlaybackDevice};
use nyra_voice::{
    CpalMicrophone, NyraApiClient, ReplyService, RodioSpeaker, SpeechSynthesis, SpeechToText,
};

#[derive(Debug, Parser)]
#[command(name = "nyra", about = "Talk to the Nyra assistant from your terminal")]
struct Cli {
    /// Base URL of the Nyra backend.
    #[arg(long, env = "NYRA_BASE_URL", default_value = "http://localhost:3000")]
    base_url: String,

    /// Start with assistant audio muted.
    #[arg(long, env = "NYRA_MUTED")]
    muted: bool,

    /// Continuous silence (ms) before a recording auto-stops.
    #[arg(long, env = "NYRA_SILENCE_TIMEOUT_MS", default_value_t = SILENCE_TIMEOUT_MS)]
    silence_timeout_ms: u64,

    /// RMS amplitude above which a frame counts as sound.
    #[arg(long, env = "NYRA_SILENCE_RMS_THRESHOLD", default_value_t = SILENCE_RMS_THRESHOLD)]
    silence_rms_threshold: f32,

    /// How often (ms) the silence monitor samples the microphone level.
    #[arg(long, env = "NYRA_SILENCE_POLL_INTERVAL_MS", default_value_t = SILENCE_POLL_INTERVAL_MS)]
    silence_poll_interval_ms: u64,

    /// Recordings smaller than this (bytes) are treated as no speech.
    #[arg(long, env = "NYRA_MIN_VIABLE_BYTES", default_value_t = MIN_VIABLE_BYTES)]
    min_viable_bytes: usize,

    /// Pause (ms) before the microphone reopens after the assistant speaks.
    #[arg(long, env = "NYRA_RELISTEN_DELAY_MS", default_value_t = RELISTEN_DELAY_MS)]
    relisten_delay_ms: u64,
}

impl Cli {
    fn controller_config(&self) -> TurnControllerConfig {
        TurnControllerConfig {
            min_viable_bytes: self.min_viable_bytes,
            relisten_delay: Duration::from_millis(self.relisten_delay_ms),
            silence: SilenceConfig {
                rms_threshold: self.silence_rms_threshold,
                timeout: Duration::from_millis(self.silence_timeout_ms),
                poll_interval: Duration::from_millis(self.silence_poll_interval_ms),
            },
        }
    }
}

fn print_event(event: &VoiceEvent) {
    match event {
        VoiceEvent::StateChanged(state) => {
            let label = match state {
                VoiceModeState::Idle => "idle",
                VoiceModeState::Listening => "listening...",
                VoiceModeState::Transcribing => "transcribing...",
                VoiceModeState::Thinking => "thinking...",
            };
            println!("  [{label}]");
        }
        VoiceEvent::TurnAppended(turn) => {
            if turn.is_placeholder {
                println!("nyra: ...");
            } else {
                match turn.role {
                    ChatRole::User => println!("you: {}", turn.text),
                    ChatRole::Assistant => println!("nyra: {}", turn.text),
                }
            }
        }
        VoiceEvent::TurnResolved { text, .. } => println!("nyra: {text}"),
        VoiceEvent::Notice(notice) => println!("  ({notice})"),
        VoiceEvent::MuteChanged(muted) => {
            println!("  ({})", if *muted { "muted" } else { "unmuted" });
        }
        VoiceEvent::SpeakingStarted | VoiceEvent::SpeakingFinished => {}
    }
}

fn parse_line(line: &str) -> Option<VoiceCommand> {
    match line.trim() {
        "" => None,
        "/voice" => Some(VoiceCommand::Primary),
        "/exit" => Some(VoiceCommand::ExitVoiceMode),
        "/mute" => Some(VoiceCommand::ToggleMute),
        "/quit" => Some(VoiceCommand::Shutdown),
        text => Some(VoiceCommand::SendText(text.to_string())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(base_url = %cli.base_url, "Starting nyra");

    let api = Arc::new(NyraApiClient::new(cli.base_url.clone())?);
    let microphone: Arc<dyn AudioCaptureDevice> = Arc::new(CpalMicrophone::new());
    let speaker: Arc<dyn AudioPlaybackDevice> =
        Arc::new(RodioSpeaker::new().context("could not open the audio output device")?);

    let services = VoiceServices {
        stt: Arc::clone(&api) as Arc<dyn SpeechToText>,
        chat: Arc::clone(&api) as Arc<dyn ReplyService>,
        tts: api as Arc<dyn SpeechSynthesis>,
    };

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let controller = TurnController::new(
        microphone,
        speaker,
        services,
        cli.controller_config(),
        command_rx,
        event_tx,
    );
    let controller_task = tokio::spawn(controller.run());

    if cli.muted {
        let _ = command_tx.send(VoiceCommand::ToggleMute);
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    println!("nyra ready. /voice to talk, /mute, /exit, /quit. Anything else is a message.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(command) = parse_line(&line) else {
            continue;
        };
        let quitting = matches!(command, VoiceCommand::Shutdown);
        if command_tx.send(command).is_err() {
            break;
        }
        if quitting {
            break;
        }
    }

    // Stdin closed without /quit; stop the controller anyway.
    let _ = command_tx.send(VoiceCommand::Shutdown);
    controller_task.await.context("controller task panicked")?;
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands_map_to_controller_commands() {
        assert!(matches!(parse_line("/voice"), Some(VoiceCommand::Primary)));
        assert!(matches!(
            parse_line("/exit"),
            Some(VoiceCommand::ExitVoiceMode)
        ));
        assert!(matches!(parse_line("/mute"), Some(VoiceCommand::ToggleMute)));
        assert!(matches!(parse_line("/quit"), Some(VoiceCommand::Shutdown)));
    }

    #[test]
    fn plain_text_becomes_a_typed_message() {
        let Some(VoiceCommand::SendText(text)) = parse_line("  hello nyra  ") else {
            panic!("expected a typed message");
        };
        assert_eq!(text, "hello nyra");
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn cli_defaults_mirror_the_library_constants() {
        let cli = Cli::parse_from(["nyra"]);
        let config = cli.controller_config();
        assert_eq!(config.min_viable_bytes, MIN_VIABLE_BYTES);
        assert_eq!(
            config.silence.timeout,
            Duration::from_millis(SILENCE_TIMEOUT_MS)
        );
    }
}
