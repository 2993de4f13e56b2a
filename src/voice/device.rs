//! Audio device provider seam
//!
//! The session owns one input and one output stream for its lifetime and
//! releases both with `close()` on teardown. Device callbacks never touch
//! session state directly: capture frames and playback completions are
//! delivered over channels.

use tokio::sync::mpsc;

use super::capture::AudioCapture;
use super::codec::PcmBuffer;
use super::playback::AudioPlayback;
use crate::Result;

/// Identifier of a scheduled playback segment
pub type SegmentId = u64;

/// An open microphone stream
pub trait InputStream: Send {
    /// Stop capturing and release the device
    fn close(&mut self);
}

/// An open output stream with a monotonic playback clock
pub trait OutputStream: Send {
    /// Sample rate buffers must be rendered at
    fn sample_rate(&self) -> u32;

    /// Seconds of audio rendered since the stream was opened
    fn current_time(&self) -> f64;

    /// Begin playing `buffer` at `start_time` on the playback clock
    ///
    /// # Errors
    ///
    /// Returns error if the stream is closed
    fn start_segment(&mut self, id: SegmentId, buffer: PcmBuffer, start_time: f64) -> Result<()>;

    /// Stop a segment before it finishes
    ///
    /// # Errors
    ///
    /// Returns error if the segment is not playing
    fn halt(&mut self, id: SegmentId) -> Result<()>;

    /// Stop rendering and release the device
    fn close(&mut self);
}

/// Opens capture and output devices
pub trait AudioDevices: Send + Sync {
    /// Open the microphone; frames of captured mono audio at 16 kHz are
    /// offered to `frames` without blocking
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    fn open_input(&self, frames: mpsc::Sender<Vec<f32>>) -> Result<Box<dyn InputStream>>;

    /// Open the speaker; ids of segments that finish naturally are sent to `ended`
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    fn open_output(&self, ended: mpsc::UnboundedSender<SegmentId>)
    -> Result<Box<dyn OutputStream>>;
}

/// Default system devices via cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_input(&self, frames: mpsc::Sender<Vec<f32>>) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(AudioCapture::open(frames)?))
    }

    fn open_output(
        &self,
        ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn OutputStream>> {
        Ok(Box::new(AudioPlayback::open(ended)?))
    }
}
