//! Pre-roll ring of recent frames with their speech tags.
//!
//! While a dictation is armed but not yet triggered, the last
//! `RING_BUFFER_DURATION_MS` of frames wait here; when VAD trips, the ring is
//! flushed into the dictation buffer so the first syllables are not lost.

use std::collections::VecDeque;

use super::frame::AudioFrame;

pub struct PreRollBuffer {
    frames: VecDeque<(AudioFrame, bool)>,
    capacity: usize,
}

impl PreRollBuffer {
    /// `ring_ms` of pre-roll at `frame_ms` per frame.
    pub fn new(ring_ms: u32, frame_ms: u32) -> Self {
        let capacity = (ring_ms / frame_ms.max(1)).max(1) as usize;
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: AudioFrame, is_speech: bool) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back((frame, is_speech));
    }

    pub fn voiced_count(&self) -> usize {
        self.frames.iter().filter(|(_, speech)| *speech).count()
    }

    /// Trigger rule: more than half of the ring's capacity is speech.
    pub fn majority_voiced(&self) -> bool {
        self.voiced_count() * 2 > self.capacity
    }

    /// Flush all buffered frames in capture order, clearing the ring.
    pub fn drain(&mut self) -> Vec<AudioFrame> {
        self.frames.drain(..).map(|(frame, _)| frame).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i16) -> AudioFrame {
        AudioFrame::new(vec![tag; 4])
    }

    #[test]
    fn ring_is_bounded_and_ordered() {
        let mut ring = PreRollBuffer::new(120, 30); // 4 frames
        assert_eq!(ring.capacity(), 4);
        for i in 0..6 {
            ring.push(frame(i), false);
        }
        let drained = ring.drain();
        let tags: Vec<i16> = drained.iter().map(|f| f.samples()[0]).collect();
        assert_eq!(tags, vec![2, 3, 4, 5]);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn majority_trigger_counts_against_capacity() {
        let mut ring = PreRollBuffer::new(600, 30); // 20 frames
        for _ in 0..10 {
            ring.push(frame(100), true);
        }
        // Exactly half is not a majority.
        assert!(!ring.majority_voiced());
        ring.push(frame(100), true);
        assert!(ring.majority_voiced());
    }
}
