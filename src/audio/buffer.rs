use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;

/// Thread-safe ring of the most recent samples on one side of the call.
///
/// Writers never block on readers for longer than a copy; when full, the
/// oldest samples are overwritten. Used as a tap for metering.
pub struct AudioRingBuffer {
    buffer: Arc<Mutex<HeapRb<f32>>>,
}

impl AudioRingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity.max(1)))),
        }
    }

    /// Append samples, dropping the oldest on overflow
    pub fn write(&self, samples: &[f32]) {
        let mut buffer = self.buffer.lock();
        let cap = buffer.capacity().get();
        // Only the tail can survive anyway
        let tail = &samples[samples.len().saturating_sub(cap)..];

        for &sample in tail {
            if buffer.try_push(sample).is_err() {
                let _ = buffer.try_pop();
                let _ = buffer.try_push(sample);
            }
        }
    }

    /// Copy out up to `count` of the newest samples, oldest first, without consuming
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let buffer = self.buffer.lock();
        let len = buffer.occupied_len();
        buffer
            .iter()
            .skip(len.saturating_sub(count))
            .copied()
            .collect()
    }

    /// Get the number of samples held
    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity().get()
    }
}

impl Clone for AudioRingBuffer {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_latest() {
        let buffer = AudioRingBuffer::new(1024);
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        buffer.write(&data);

        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.latest(3), vec![97.0, 98.0, 99.0]);
        // Reading does not consume
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let buffer = AudioRingBuffer::new(10);
        let data: Vec<f32> = (0..25).map(|i| i as f32).collect();
        buffer.write(&data);

        let held = buffer.latest(100);
        assert_eq!(held.len(), 10);
        assert_eq!(held[0], 15.0);
        assert_eq!(held[9], 24.0);
    }

    #[test]
    fn test_clones_share_storage() {
        let a = AudioRingBuffer::new(8);
        let b = a.clone();
        a.write(&[1.0, 2.0]);
        assert_eq!(b.latest(2), vec![1.0, 2.0]);
        b.clear();
        assert!(a.is_empty());
    }
}
