//! Bounded frame queue between the capture supervisor and the pipeline
//! worker. Overflow drops the oldest frame so the pipeline always sees the
//! most recent audio; drops are counted and logged by the producer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::frame::AudioFrame;

pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        })
    }

    /// Push a frame, evicting the oldest when full. Returns true when an
    /// eviction happened.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let mut frames = self.frames.lock().unwrap();
        let mut overflowed = false;
        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            overflowed = true;
        }
        frames.push_back(frame);
        drop(frames);
        self.available.notify_one();
        overflowed
    }

    /// Pop the next frame, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        let mut frames = self.frames.lock().unwrap();
        if frames.is_empty() {
            let (guard, _) = self
                .available
                .wait_timeout_while(frames, timeout, |f| f.is_empty())
                .unwrap();
            frames = guard;
        }
        frames.pop_front()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i16) -> AudioFrame {
        AudioFrame::new(vec![tag; 4])
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = FrameQueue::new(3);
        for i in 0..5 {
            queue.push(frame(i));
        }
        assert_eq!(queue.dropped_total(), 2);
        // Oldest surviving frame is #2.
        let first = queue.pop_timeout(Duration::from_millis(1)).unwrap();
        assert_eq!(first.samples()[0], 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pop_times_out_on_empty() {
        let queue = FrameQueue::new(2);
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn pop_wakes_on_push() {
        let queue = FrameQueue::new(2);
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(2)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(frame(7));
        let got = consumer.join().unwrap().unwrap();
        assert_eq!(got.samples()[0], 7);
    }
}
