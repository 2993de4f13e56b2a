//! Audio capture from microphone

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use super::codec::{FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use super::device::InputStream;
use crate::{Error, Result};

/// Input chunk size fed to the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Captures audio from the default input device
///
/// The cpal stream lives on its own thread because streams are not `Send`.
/// Frames of [`FRAME_SAMPLES`] mono samples at 16 kHz are offered to the
/// session with `try_send`; when the session is not keeping up they are dropped.
pub struct AudioCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the default microphone and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or it cannot be started
    pub fn open(frames: mpsc::Sender<Vec<f32>>) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("focusup-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(frames) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Park until closed; a dropped sender also ends capture
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::DeviceAccess("capture thread exited".to_string()))??;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl InputStream for AudioCapture {
    fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(frames: mpsc::Sender<Vec<f32>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceAccess("no input device available".to_string()))?;

    // Prefer native 16 kHz mono, otherwise take the device default and convert
    let config: StreamConfig = match device
        .supported_input_configs()
        .map_err(|e| Error::DeviceAccess(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
        }) {
        Some(c) => c.with_sample_rate(SampleRate(INPUT_SAMPLE_RATE)).config(),
        None => device
            .default_input_config()
            .map_err(|e| Error::DeviceAccess(e.to_string()))?
            .config(),
    };

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio capture initialized"
    );

    let mut framer = CaptureFramer::new(config.sample_rate.0, usize::from(config.channels))?;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in framer.push(data) {
                    // Never block the audio thread
                    let _ = frames.try_send(frame);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceAccess(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceAccess(e.to_string()))?;

    Ok(stream)
}

/// Turns raw interleaved device audio into fixed-size 16 kHz mono frames
pub struct CaptureFramer {
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    pending_in: Vec<f32>,
    pending_out: Vec<f32>,
}

impl CaptureFramer {
    /// Create a framer for a device running at `sample_rate` with `channels`
    ///
    /// # Errors
    ///
    /// Returns error if a resampler is needed and cannot be built
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self> {
        let resampler = if sample_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    sample_rate as usize,
                    INPUT_SAMPLE_RATE as usize,
                    RESAMPLE_CHUNK,
                    2,
                    1,
                )
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?,
            )
        };

        Ok(Self {
            channels: channels.max(1),
            resampler,
            pending_in: Vec::new(),
            pending_out: Vec::with_capacity(FRAME_SAMPLES * 2),
        })
    }

    /// Feed interleaved samples, returning every completed frame
    pub fn push(&mut self, data: &[f32]) -> Vec<Vec<f32>> {
        #[allow(clippy::cast_precision_loss)]
        let mono = data
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32);

        match self.resampler.as_mut() {
            None => self.pending_out.extend(mono),
            Some(resampler) => {
                self.pending_in.extend(mono);
                while self.pending_in.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = self.pending_in.drain(..RESAMPLE_CHUNK).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(out) => self.pending_out.extend_from_slice(&out[0]),
                        Err(e) => tracing::warn!(error = %e, "capture resample failed"),
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while self.pending_out.len() >= FRAME_SAMPLES {
            frames.push(self.pending_out.drain(..FRAME_SAMPLES).collect());
        }
        frames
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_rate_frames_are_fixed_size() {
        let mut framer = CaptureFramer::new(INPUT_SAMPLE_RATE, 1).unwrap();
        assert!(framer.push(&vec![0.1; FRAME_SAMPLES - 1]).is_empty());
        let frames = framer.push(&vec![0.1; FRAME_SAMPLES + 1]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_SAMPLES);
    }

    #[test]
    fn stereo_is_downmixed() {
        let mut framer = CaptureFramer::new(INPUT_SAMPLE_RATE, 2).unwrap();
        let interleaved: Vec<f32> = (0..FRAME_SAMPLES).flat_map(|_| [0.2, 0.4]).collect();
        let frames = framer.push(&interleaved);
        assert_eq!(frames.len(), 1);
        assert!((frames[0][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn higher_rate_is_resampled_down() {
        let mut framer = CaptureFramer::new(48_000, 1).unwrap();
        // One second at 48 kHz yields roughly one second at 16 kHz
        let frames = framer.push(&vec![0.0; 48_000]);
        let total: usize = frames.iter().map(Vec::len).sum();
        assert!(total >= FRAME_SAMPLES * 3, "got {total}");
        assert!(frames.iter().all(|f| f.len() == FRAME_SAMPLES));
    }

    #[test]
    fn wav_has_riff_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
