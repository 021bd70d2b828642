#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod audio;
pub mod capture;
pub mod controller;
pub mod device;
pub mod error;
pub mod http;
pub mod playback;
pub mod services;
pub mod text_utils;

pub use audio::{CpalMicrophone, RodioSpeaker};
pub use capture::{CaptureOutcome, Recorder, SilenceConfig, StopReason};
pub use controller::{
    TurnController, TurnControllerConfig, VoiceCommand, VoiceEvent, VoiceModeState, VoiceServices,
};
pub use device::{AudioCaptureDevice, AudioClip, AudioPlaybackDevice, CaptureSession, PlaybackDone};
pub use error::VoiceError;
pub use http::NyraApiClient;
pub use playback::Speaker;
pub use services::{ReplyService, SpeechSynthesis, SpeechToText};
pub use text_utils::clean_for_speech;
