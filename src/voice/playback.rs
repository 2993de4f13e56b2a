//! Audio playback to speakers

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::{OUTPUT_SAMPLE_RATE, PcmBuffer};
use super::device::{OutputStream, SegmentId};
use crate::{Error, Result};

/// Plays scheduled segments on the default output device
///
/// A single cpal stream runs for the whole session on a dedicated thread and
/// renders from a shared [`Mixer`]; the mixer's frame counter is the playback clock.
pub struct AudioPlayback {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or it cannot be started
    pub fn open(ended: mpsc::UnboundedSender<SegmentId>) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(u32, Arc<Mutex<Mixer>>)>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("focusup-playback".to_string())
            .spawn(move || {
                let (stream, rate, mixer) = match build_stream(ended) {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((rate, mixer)));

                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })?;

        let (sample_rate, mixer) = ready_rx
            .recv()
            .map_err(|_| Error::DeviceAccess("playback thread exited".to_string()))??;

        Ok(Self {
            mixer,
            sample_rate,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn mixer(&self) -> std::sync::MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputStream for AudioPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.mixer().current_time()
    }

    fn start_segment(&mut self, id: SegmentId, buffer: PcmBuffer, start_time: f64) -> Result<()> {
        if self.thread.is_none() {
            return Err(Error::Audio("output stream closed".to_string()));
        }
        self.mixer().add(id, buffer.samples, start_time);
        Ok(())
    }

    fn halt(&mut self, id: SegmentId) -> Result<()> {
        if self.mixer().remove(id) {
            Ok(())
        } else {
            Err(Error::Audio(format!("segment {id} is not playing")))
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("playback thread panicked");
            }
        }
        self.mixer().clear();
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    ended: mpsc::UnboundedSender<SegmentId>,
) -> Result<(Stream, u32, Arc<Mutex<Mixer>>)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceAccess("no output device available".to_string()))?;

    let supports_wire_rate = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
    };

    let config: StreamConfig = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceAccess(e.to_string()))?
        .find(|c| supports_wire_rate(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports_wire_rate(c, 2))
        })
        .map(|c| c.with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE)).config())
        .map_or_else(
            // Last resort: device default, decoded audio gets resampled
            || {
                device
                    .default_output_config()
                    .map(|c| c.config())
                    .map_err(|e| Error::DeviceAccess(e.to_string()))
            },
            Ok,
        )?;

    let sample_rate = config.sample_rate.0;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
    let render_mixer = Arc::clone(&mixer);
    let mut finished = Vec::new();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Ok(mut m) = render_mixer.lock() {
                    m.render(data, channels, &mut finished);
                } else {
                    data.fill(0.0);
                }
                for id in finished.drain(..) {
                    let _ = ended.send(id);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::DeviceAccess(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceAccess(e.to_string()))?;

    Ok((stream, sample_rate, mixer))
}

struct Voice {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled segments into the output at their start frames
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    /// Playback clock in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    /// Queue `samples` to begin at `start_time` seconds
    ///
    /// A start time the clock has already passed plays from the next frame,
    /// first sample included.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn add(&mut self, id: SegmentId, samples: Vec<f32>, start_time: f64) {
        let requested = (start_time.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let start_frame = requested.max(self.frames_rendered);
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
    }

    /// Drop a queued or sounding segment; returns whether it existed
    pub fn remove(&mut self, id: SegmentId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Fill interleaved `out`, pushing ids of segments that finished onto `finished`
    #[allow(clippy::cast_possible_truncation)]
    pub fn render(&mut self, out: &mut [f32], channels: usize, finished: &mut Vec<SegmentId>) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let t = self.frames_rendered;
            let mut sample = 0.0;
            for voice in &self.voices {
                if t >= voice.start_frame && t < voice.end_frame() {
                    sample += voice.samples[(t - voice.start_frame) as usize];
                }
            }
            frame.fill(sample.clamp(-1.0, 1.0));
            self.frames_rendered += 1;
        }

        let now = self.frames_rendered;
        self.voices.retain(|v| {
            let done = v.end_frame() <= now;
            if done {
                finished.push(v.id);
            }
            !done
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_segment_at_start_frame() {
        let mut mixer = Mixer::new(10);
        mixer.add(1, vec![0.5, 0.5], 0.2);
        let mut out = vec![0.0; 5];
        let mut finished = Vec::new();
        mixer.render(&mut out, 1, &mut finished);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.0]);
        assert_eq!(finished, vec![1]);
    }

    #[test]
    fn clock_advances_per_frame_not_per_channel() {
        let mut mixer = Mixer::new(10);
        let mut out = vec![0.0; 10];
        mixer.render(&mut out, 2, &mut Vec::new());
        assert!((mixer.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn back_to_back_segments_leave_no_gap() {
        let mut mixer = Mixer::new(4);
        mixer.add(1, vec![0.1; 2], 0.0);
        mixer.add(2, vec![0.2; 2], 0.5);
        let mut out = vec![0.0; 4];
        let mut finished = Vec::new();
        mixer.render(&mut out, 1, &mut finished);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(finished, vec![1, 2]);
    }

    #[test]
    fn segment_added_after_its_start_time_plays_in_full() {
        let mut mixer = Mixer::new(10);
        // The clock read for scheduling said 0.0, then a callback ran
        let mut out = vec![0.0; 3];
        mixer.render(&mut out, 1, &mut Vec::new());

        mixer.add(1, vec![0.1, 0.2, 0.3], 0.0);
        let mut out = vec![0.0; 4];
        let mut finished = Vec::new();
        mixer.render(&mut out, 1, &mut finished);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.0]);
        assert_eq!(finished, vec![1]);
    }

    #[test]
    fn removed_segment_is_silent_and_not_reported() {
        let mut mixer = Mixer::new(10);
        mixer.add(7, vec![1.0; 3], 0.0);
        assert!(mixer.remove(7));
        assert!(!mixer.remove(7));
        let mut out = vec![0.0; 3];
        let mut finished = Vec::new();
        mixer.render(&mut out, 1, &mut finished);
        assert_eq!(out, vec![0.0; 3]);
        assert!(finished.is_empty());
    }
}
