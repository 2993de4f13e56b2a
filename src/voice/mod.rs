//! Audio module
//!
//! Wire codec, gapless playback scheduling, and cpal-backed capture/output devices.

mod capture;
pub mod codec;
mod device;
mod playback;
mod scheduler;

pub use capture::{AudioCapture, CaptureFramer, samples_to_wav};
pub use codec::{
    FRAME_SAMPLES, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PcmBuffer,
};
pub use device::{AudioDevices, CpalDevices, InputStream, OutputStream, SegmentId};
pub use playback::{AudioPlayback, Mixer};
pub use scheduler::{PlaybackScheduler, ScheduledSegment};
