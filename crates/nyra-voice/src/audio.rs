//! Real audio devices: a cpal-backed microphone and a rodio-backed speaker.
//!
//! Both cpal's input stream and rodio's `OutputStream` are not `Send`, so
//! each lives on a dedicated OS thread for its whole lifetime. The rest of
//! the crate talks to them through the [`crate::device`] traits using shared
//! atomics and channels.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FftFixedIn, Resampler};

use crate::device::{
    AudioCaptureDevice, AudioClip, AudioPlaybackDevice, CaptureSession, PlaybackDone,
};
use crate::error::VoiceError;

/// Sample rate of the WAV uploaded to the transcription service.
const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Input frames per resampler call.
const RESAMPLE_CHUNK: usize = 1024;

/// How often the device threads check their shutdown flag.
const THREAD_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Sample buffer and per-callback RMS level, shared between the stream
/// thread's callback and the session handle.
struct CaptureShared {
    samples: Mutex<Vec<f32>>,
    rms_bits: AtomicU32,
}

impl CaptureShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(Vec::new()),
            rms_bits: AtomicU32::new(0.0_f32.to_bits()),
        })
    }

    /// Append one callback's worth of interleaved samples and publish its
    /// RMS level.
    fn push_frame(&self, frame: impl Iterator<Item = f32>) {
        let mut sum_squares = 0.0_f32;
        let mut count = 0_usize;
        if let Ok(mut samples) = self.samples.lock() {
            for sample in frame {
                sum_squares += sample * sample;
                count += 1;
                samples.push(sample);
            }
        }
        if count > 0 {
            let rms = (sum_squares / count as f32).sqrt();
            self.rms_bits.store(rms.to_bits(), Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamFormat {
    sample_rate: u32,
    channels: u16,
}

/// The default system microphone.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AudioCaptureDevice for CpalMicrophone {
    fn open(&self) -> Result<Box<dyn CaptureSession>, VoiceError> {
        let shared = CaptureShared::new();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("nyra-mic".to_string())
            .spawn(move || capture_thread(&thread_shared, &thread_stop, &ready_tx))
            .map_err(|e| VoiceError::InputStream(e.to_string()))?;

        let format = ready_rx
            .recv()
            .map_err(|e| VoiceError::InputStream(e.to_string()))??;

        tracing::debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Microphone opened"
        );

        Ok(Box::new(CpalSession {
            shared,
            stop,
            thread: Some(handle),
            format,
        }))
    }
}

/// Owns the input stream for its whole lifetime; the stream is not `Send`.
fn capture_thread(
    shared: &Arc<CaptureShared>,
    stop: &AtomicBool,
    ready: &mpsc::Sender<Result<StreamFormat, VoiceError>>,
) {
    match build_input_stream(shared) {
        Ok((stream, format)) => {
            let _ = ready.send(Ok(format));
            while !stop.load(Ordering::SeqCst) {
                thread::park_timeout(THREAD_POLL);
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

fn build_input_stream(
    shared: &Arc<CaptureShared>,
) -> Result<(cpal::Stream, StreamFormat), VoiceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(VoiceError::NoInputDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| VoiceError::InputStream(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let err_fn = |e: cpal::StreamError| tracing::warn!(error = %e, "Input stream error");

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    shared.push_frame(data.iter().copied());
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    shared.push_frame(data.iter().map(|&s| f32::from(s) / 32_768.0));
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    shared.push_frame(data.iter().map(|&s| (f32::from(s) - 32_768.0) / 32_768.0));
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(VoiceError::InputStream(format!(
                "unsupported sample format {other:?}"
            )));
        }
    }
    .map_err(|e| VoiceError::InputStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::InputStream(e.to_string()))?;

    Ok((stream, format))
}

/// One open microphone capture backed by a stream thread.
struct CpalSession {
    shared: Arc<CaptureShared>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    format: StreamFormat,
}

impl CpalSession {
    fn stop_thread(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl CaptureSession for CpalSession {
    fn rms_level(&self) -> f32 {
        f32::from_bits(self.shared.rms_bits.load(Ordering::Relaxed))
    }

    fn finish(mut self: Box<Self>) -> Result<AudioClip, VoiceError> {
        self.stop_thread();

        let interleaved = self
            .shared
            .samples
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default();

        let mono = downmix_to_mono(&interleaved, self.format.channels);
        let mono = if self.format.sample_rate == TARGET_SAMPLE_RATE {
            mono
        } else {
            resample_to_target(&mono, self.format.sample_rate)?
        };

        encode_wav(&mono, TARGET_SAMPLE_RATE)
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample_to_target(mono: &[f32], from_rate: u32) -> Result<Vec<f32>, VoiceError> {
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        TARGET_SAMPLE_RATE as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .map_err(|e| VoiceError::Resample(e.to_string()))?;

    let estimated = mono.len() * TARGET_SAMPLE_RATE as usize / from_rate as usize;
    let mut out = Vec::with_capacity(estimated + RESAMPLE_CHUNK);

    for chunk in mono.chunks(RESAMPLE_CHUNK) {
        // The resampler wants full chunks; the tail is zero-padded.
        let mut frame = chunk.to_vec();
        frame.resize(RESAMPLE_CHUNK, 0.0);
        let mut resampled = resampler
            .process(&[frame], None)
            .map_err(|e| VoiceError::Resample(e.to_string()))?;
        out.append(&mut resampled[0]);
    }

    Ok(out)
}

fn encode_wav(mono: &[f32], sample_rate: u32) -> Result<AudioClip, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| VoiceError::InputStream(e.to_string()))?;
    for &sample in mono {
        let quantised = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(quantised)
            .map_err(|e| VoiceError::InputStream(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| VoiceError::InputStream(e.to_string()))?;

    Ok(AudioClip::new(cursor.into_inner(), "audio/wav"))
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Sink and liveness flag for the playback currently on the speaker.
///
/// `live` is the exactly-once arbiter: whoever swaps it to `false` first —
/// the completion watcher or `stop` — owns the transition, so the watcher
/// never fires the callback after an interrupt.
struct CurrentPlayback {
    sink: Arc<rodio::Sink>,
    live: Arc<AtomicBool>,
}

/// The default system audio output.
///
/// A keeper thread owns the `rodio::OutputStream` (not `Send`); playback
/// goes through its cloneable handle. Each `start` spawns a watcher thread
/// that blocks until the sink drains and then reports completion.
pub struct RodioSpeaker {
    handle: rodio::OutputStreamHandle,
    current: Mutex<Option<CurrentPlayback>>,
    keeper_stop: Arc<AtomicBool>,
    keeper: Option<thread::JoinHandle<()>>,
}

impl RodioSpeaker {
    /// Open the default output device.
    pub fn new() -> Result<Self, VoiceError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let keeper_stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&keeper_stop);

        let keeper = thread::Builder::new()
            .name("nyra-audio-out".to_string())
            .spawn(move || match rodio::OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    while !thread_stop.load(Ordering::SeqCst) {
                        thread::park_timeout(THREAD_POLL);
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::OutputStream(e.to_string())));
                }
            })
            .map_err(|e| VoiceError::OutputStream(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|e| VoiceError::OutputStream(e.to_string()))??;

        Ok(Self {
            handle,
            current: Mutex::new(None),
            keeper_stop,
            keeper: Some(keeper),
        })
    }
}

impl AudioPlaybackDevice for RodioSpeaker {
    fn start(&self, clip: AudioClip, on_done: PlaybackDone) -> Result<(), VoiceError> {
        let source = rodio::Decoder::new(Cursor::new(clip.into_bytes()))
            .map_err(|e| VoiceError::Decode(e.to_string()))?;
        let sink = rodio::Sink::try_new(&self.handle)
            .map_err(|e| VoiceError::OutputStream(e.to_string()))?;
        sink.append(source);

        let sink = Arc::new(sink);
        let live = Arc::new(AtomicBool::new(true));

        let watcher_sink = Arc::clone(&sink);
        let watcher_live = Arc::clone(&live);
        thread::Builder::new()
            .name("nyra-playback-watch".to_string())
            .spawn(move || {
                watcher_sink.sleep_until_end();
                if watcher_live.swap(false, Ordering::SeqCst) {
                    on_done();
                }
            })
            .map_err(|e| {
                sink.stop();
                VoiceError::OutputStream(e.to_string())
            })?;

        if let Ok(mut current) = self.current.lock() {
            *current = Some(CurrentPlayback { sink, live });
        }
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(playback) = current.take() {
                if playback.live.swap(false, Ordering::SeqCst) {
                    playback.sink.stop();
                }
            }
        }
    }

    fn is_playing(&self) -> bool {
        self.current
            .lock()
            .map(|current| {
                current
                    .as_ref()
                    .is_some_and(|p| p.live.load(Ordering::SeqCst))
            })
            .unwrap_or(false)
    }
}

impl Drop for RodioSpeaker {
    fn drop(&mut self) {
        self.stop();
        self.keeper_stop.store(true, Ordering::SeqCst);
        if let Some(keeper) = self.keeper.take() {
            keeper.thread().unpark();
            let _ = keeper.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_downmix_averages_channels() {
        let interleaved = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&interleaved, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn mono_downmix_is_identity() {
        let samples = [0.1, -0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples.to_vec());
    }

    #[test]
    fn resampling_halves_48k_to_16k_within_padding_slack() {
        let input = vec![0.0_f32; 4_800];
        let output = resample_to_target(&input, 48_000).unwrap();
        let expected = input.len() / 3;
        // Zero padding of the final chunk adds at most one chunk's worth.
        assert!(output.len() >= expected);
        assert!(output.len() <= expected + RESAMPLE_CHUNK);
    }

    #[test]
    fn encoded_wav_reads_back_with_target_spec() {
        let clip = encode_wav(&[0.0, 0.5, -0.5, 1.0], TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(clip.mime_type(), "audio/wav");

        let reader = hound::WavReader::new(Cursor::new(clip.into_bytes())).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn full_scale_samples_clamp_instead_of_wrapping() {
        let clip = encode_wav(&[2.0, -2.0], TARGET_SAMPLE_RATE).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(clip.into_bytes())).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }
}
