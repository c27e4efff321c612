//! Gapless playback scheduling
//!
//! Every inbound chunk is anchored to the end of the one before it, so chunks
//! abut exactly on the sink's timeline no matter how bursty their arrival is.
//! If the timeline has fallen behind the sink clock (a pause between turns),
//! the next chunk starts at "now" instead of building a backlog.

use crate::audio::codec::AudioFrame;
use crate::audio::{OutputSink, PlaybackId};
use crate::{Result, VoiceError};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Where and for how long a chunk was placed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledPlayback {
    pub id: PlaybackId,
    pub start: u64,
    pub frames: u64,
}

impl ScheduledPlayback {
    pub fn end(&self) -> u64 {
        self.start + self.frames
    }
}

pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    next_start: u64,
    active: HashSet<PlaybackId>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        let next_start = sink.now();
        Self {
            sink,
            next_start,
            active: HashSet::new(),
            next_id: 0,
        }
    }

    /// Schedule a playback frame right after everything already queued.
    ///
    /// Empty frames are ignored and return `None`. A frame at the wrong rate
    /// is rejected without touching the timeline.
    pub fn enqueue(&mut self, frame: AudioFrame) -> Result<Option<ScheduledPlayback>> {
        if frame.sample_rate() != self.sink.sample_rate() {
            return Err(VoiceError::DecodeError(format!(
                "Playback frame at {} Hz, sink runs at {} Hz",
                frame.sample_rate(),
                self.sink.sample_rate()
            )));
        }
        if frame.is_empty() {
            return Ok(None);
        }

        let samples = frame.to_float();
        let frames = samples.len() as u64;
        let start = self.next_start.max(self.sink.now());

        self.next_id += 1;
        let id = PlaybackId(self.next_id);

        // Only commit timeline state once the sink accepted the buffer
        self.sink.schedule(id, samples, start)?;
        self.active.insert(id);
        self.next_start = start + frames;

        debug!(%id, start, frames, "Scheduled playback");

        Ok(Some(ScheduledPlayback { id, start, frames }))
    }

    /// Record natural completion of a handle.
    ///
    /// Returns true when this completion left nothing audible. Unknown or
    /// already-stopped handles are ignored.
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Stop everything immediately and pull the timeline back to now.
    ///
    /// Safe to call repeatedly. Returns how many handles were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.drain() {
            self.sink.stop(id);
        }
        self.next_start = self.sink.now();

        if stopped > 0 {
            debug!(stopped, "Playback interrupted");
        }
        stopped
    }

    /// Stop all playback and release the output device
    pub fn close(&mut self) {
        self.interrupt();
        self.sink.close();
    }

    pub fn is_audible(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    pub fn now(&self) -> u64 {
        self.sink.now()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sink.sample_rate()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            warn!(active = self.active.len(), "Scheduler dropped with audible handles");
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::FrameRole;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct SinkLog {
        now: u64,
        scheduled: Vec<(PlaybackId, u64, usize)>,
        stopped: Vec<PlaybackId>,
        closed: bool,
        refuse: bool,
    }

    struct LogSink(Arc<Mutex<SinkLog>>);

    impl OutputSink for LogSink {
        fn sample_rate(&self) -> u32 {
            24000
        }
        fn now(&self) -> u64 {
            self.0.lock().now
        }
        fn schedule(&mut self, id: PlaybackId, samples: Vec<f32>, start: u64) -> Result<()> {
            let mut log = self.0.lock();
            if log.refuse {
                return Err(VoiceError::DeviceError("gone".into()));
            }
            log.scheduled.push((id, start, samples.len()));
            Ok(())
        }
        fn stop(&mut self, id: PlaybackId) {
            self.0.lock().stopped.push(id);
        }
        fn close(&mut self) {
            self.0.lock().closed = true;
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (PlaybackScheduler::new(Box::new(LogSink(log.clone()))), log)
    }

    fn chunk(ms: u64) -> AudioFrame {
        AudioFrame::new(vec![1000; (24 * ms) as usize], 24000, FrameRole::Playback)
    }

    #[test]
    fn test_sequential_chunks_abut() {
        let (mut s, log) = scheduler();
        log.lock().now = 500;

        let a = s.enqueue(chunk(100)).unwrap().unwrap();
        let b = s.enqueue(chunk(40)).unwrap().unwrap();
        let c = s.enqueue(chunk(60)).unwrap().unwrap();

        assert_eq!(a.start, 500);
        assert_eq!(b.start, a.end());
        assert_eq!(c.start, b.end());
        assert_eq!(c.end(), 500 + 2400 + 960 + 1440);
        assert_eq!(s.active_len(), 3);
    }

    #[test]
    fn test_late_chunk_clamps_to_now() {
        let (mut s, log) = scheduler();
        let a = s.enqueue(chunk(100)).unwrap().unwrap();
        log.lock().now = a.end() + 10_000;
        let b = s.enqueue(chunk(100)).unwrap().unwrap();
        assert_eq!(b.start, a.end() + 10_000);
    }

    #[test]
    fn test_completion_reports_silence_once() {
        let (mut s, _) = scheduler();
        let a = s.enqueue(chunk(10)).unwrap().unwrap();
        let b = s.enqueue(chunk(10)).unwrap().unwrap();

        assert!(!s.complete(a.id));
        assert!(s.complete(b.id));
        assert!(!s.complete(b.id));
        assert!(!s.is_audible());
    }

    #[test]
    fn test_interrupt_stops_all_and_resets_cursor() {
        let (mut s, log) = scheduler();
        let a = s.enqueue(chunk(100)).unwrap().unwrap();
        let b = s.enqueue(chunk(100)).unwrap().unwrap();
        log.lock().now = 1200;

        assert_eq!(s.interrupt(), 2);
        assert_eq!(s.active_len(), 0);
        let mut stopped = log.lock().stopped.clone();
        stopped.sort();
        assert_eq!(stopped, vec![a.id, b.id]);

        let c = s.enqueue(chunk(100)).unwrap().unwrap();
        assert_eq!(c.start, 1200);
    }

    #[test]
    fn test_interrupt_is_idempotent() {
        let (mut s, log) = scheduler();
        assert_eq!(s.interrupt(), 0);
        assert_eq!(s.interrupt(), 0);
        assert!(log.lock().stopped.is_empty());
    }

    #[test]
    fn test_completion_after_interrupt_is_ignored() {
        let (mut s, _) = scheduler();
        let a = s.enqueue(chunk(10)).unwrap().unwrap();
        s.interrupt();
        assert!(!s.complete(a.id));
    }

    #[test]
    fn test_refused_schedule_leaves_timeline_untouched() {
        let (mut s, log) = scheduler();
        let before = s.next_start();
        log.lock().refuse = true;
        assert!(s.enqueue(chunk(100)).is_err());
        assert_eq!(s.next_start(), before);
        assert_eq!(s.active_len(), 0);
    }

    #[test]
    fn test_wrong_rate_and_empty_frames() {
        let (mut s, _) = scheduler();
        let wrong = AudioFrame::new(vec![0; 160], 16000, FrameRole::Playback);
        assert!(matches!(s.enqueue(wrong), Err(VoiceError::DecodeError(_))));
        let empty = AudioFrame::new(vec![], 24000, FrameRole::Playback);
        assert_eq!(s.enqueue(empty).unwrap(), None);
    }

    #[test]
    fn test_close_releases_sink() {
        let (mut s, log) = scheduler();
        s.enqueue(chunk(10)).unwrap();
        s.close();
        assert!(log.lock().closed);
        assert_eq!(log.lock().stopped.len(), 1);
    }
}
