//! Gapless playback scheduling
//!
//! Segments arrive independently and are laid end to end on the output clock:
//! each starts at `max(next_start_time, now)`. Completion order does not
//! matter; the live set becoming empty is the only "done speaking" signal.

use std::collections::BTreeMap;

use super::codec::PcmBuffer;
use super::device::{OutputStream, SegmentId};
use crate::Result;

/// A segment handed to the output stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    /// Start on the playback clock, in seconds
    pub start_time: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledSegment {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Queues decoded audio back to back on one output stream
pub struct PlaybackScheduler {
    output: Box<dyn OutputStream>,
    next_start_time: f64,
    live: BTreeMap<SegmentId, ScheduledSegment>,
    next_id: SegmentId,
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(output: Box<dyn OutputStream>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            live: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rate decoded audio must be rendered at
    #[must_use]
    pub fn output_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    /// Schedule `buffer` right after everything already queued
    ///
    /// Empty buffers are ignored and return `None`.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream rejects the segment
    pub fn schedule(&mut self, buffer: PcmBuffer) -> Result<Option<ScheduledSegment>> {
        if buffer.is_empty() {
            return Ok(None);
        }

        let start_time = self.next_start_time.max(self.output.current_time());
        let id = self.next_id;
        self.next_id += 1;

        let segment = ScheduledSegment {
            id,
            start_time,
            duration: buffer.duration(),
        };

        self.output.start_segment(id, buffer, start_time)?;
        self.next_start_time = segment.end_time();
        self.live.insert(id, segment);

        tracing::trace!(
            id,
            start = segment.start_time,
            duration = segment.duration,
            "segment scheduled"
        );
        Ok(Some(segment))
    }

    /// Record that a segment finished playing
    ///
    /// Returns `true` if this emptied the live set.
    pub fn complete(&mut self, id: SegmentId) -> bool {
        self.live.remove(&id).is_some() && self.live.is_empty()
    }

    /// Whether nothing is currently sounding or queued
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Halt every live segment and reset the queue position
    ///
    /// Halt failures mean the segment already stopped and are ignored.
    pub fn halt_all(&mut self) {
        for id in std::mem::take(&mut self.live).into_keys() {
            if let Err(e) = self.output.halt(id) {
                tracing::debug!(id, error = %e, "halt ignored");
            }
        }
        self.next_start_time = 0.0;
    }

    /// Halt everything and release the output device
    pub fn shutdown(&mut self) {
        self.halt_all();
        self.output.close();
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::Error;

    #[derive(Default)]
    struct Clock {
        now: f64,
        started: Vec<(SegmentId, f64)>,
        halted: Vec<SegmentId>,
        closed: bool,
    }

    struct FakeOutput(Arc<Mutex<Clock>>);

    impl OutputStream for FakeOutput {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn current_time(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn start_segment(&mut self, id: SegmentId, _: PcmBuffer, start: f64) -> Result<()> {
            self.0.lock().unwrap().started.push((id, start));
            Ok(())
        }

        fn halt(&mut self, id: SegmentId) -> Result<()> {
            let mut c = self.0.lock().unwrap();
            c.halted.push(id);
            if id % 2 == 0 {
                return Err(Error::Audio("already stopped".to_string()));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed = true;
        }
    }

    fn seconds(secs: f64) -> PcmBuffer {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (secs * 24_000.0) as usize;
        PcmBuffer::new(vec![0.0; n], 24_000)
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Mutex<Clock>>) {
        let clock = Arc::new(Mutex::new(Clock::default()));
        (PlaybackScheduler::new(Box::new(FakeOutput(clock.clone()))), clock)
    }

    #[test]
    fn segments_are_laid_back_to_back() {
        let (mut s, _) = scheduler();
        let a = s.schedule(seconds(1.0)).unwrap().unwrap();
        let b = s.schedule(seconds(0.5)).unwrap().unwrap();
        let c = s.schedule(seconds(0.25)).unwrap().unwrap();

        assert!((a.start_time - 0.0).abs() < 1e-9);
        assert!((b.start_time - a.end_time()).abs() < 1e-9);
        assert!((c.start_time - b.end_time()).abs() < 1e-9);
        assert!((s.next_start_time() - 1.75).abs() < 1e-9);
    }

    #[test]
    fn late_segment_starts_at_current_time() {
        let (mut s, clock) = scheduler();
        s.schedule(seconds(1.0)).unwrap();
        clock.lock().unwrap().now = 3.0;
        let late = s.schedule(seconds(1.0)).unwrap().unwrap();
        assert!((late.start_time - 3.0).abs() < 1e-9);
    }

    #[test]
    fn only_empty_live_set_signals_idle() {
        let (mut s, _) = scheduler();
        let a = s.schedule(seconds(1.0)).unwrap().unwrap();
        let b = s.schedule(seconds(0.1)).unwrap().unwrap();

        // Later segment finishes first
        assert!(!s.complete(b.id));
        assert!(!s.is_idle());
        assert!(s.complete(a.id));
        assert!(s.is_idle());
        // Unknown or repeated completions don't re-signal
        assert!(!s.complete(a.id));
    }

    #[test]
    fn empty_buffer_is_not_scheduled() {
        let (mut s, clock) = scheduler();
        assert!(s.schedule(PcmBuffer::new(Vec::new(), 24_000)).unwrap().is_none());
        assert!(clock.lock().unwrap().started.is_empty());
        assert!(s.is_idle());
    }

    #[test]
    fn halt_all_swallows_failures_and_resets() {
        let (mut s, clock) = scheduler();
        s.schedule(seconds(1.0)).unwrap();
        s.schedule(seconds(1.0)).unwrap();
        s.halt_all();

        assert!(s.is_idle());
        assert!(s.next_start_time().abs() < f64::EPSILON);
        assert_eq!(clock.lock().unwrap().halted, vec![1, 2]);
    }

    #[test]
    fn drop_closes_output() {
        let (mut s, clock) = scheduler();
        s.schedule(seconds(1.0)).unwrap();
        drop(s);
        let c = clock.lock().unwrap();
        assert!(c.closed);
        assert_eq!(c.halted, vec![1]);
    }
}
