//! Growable dictation buffer.
//!
//! An ordered sequence of frames owned by the pipeline worker and moved, by
//! value, to the transcriber when the utterance ends. Concatenation into one
//! PCM blob is deferred until that hand-off. Unbounded by design; callers
//! watch `warn_due` to surface very long dictations without truncating them.

use crate::config::{FRAME_DURATION_MS, LONG_DICTATION_WARN_FRAMES};

use super::frame::AudioFrame;

#[derive(Debug, Default)]
pub struct DictationBuffer {
    frames: Vec<AudioFrame>,
    warned_at: usize,
}

impl DictationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    pub fn extend(&mut self, frames: Vec<AudioFrame>) {
        self.frames.extend(frames);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 * FRAME_DURATION_MS as f64 / 1000.0
    }

    /// True once per additional 5 minutes of buffered audio.
    pub fn warn_due(&mut self) -> bool {
        if self.frames.len() >= self.warned_at + LONG_DICTATION_WARN_FRAMES {
            self.warned_at = self.frames.len();
            true
        } else {
            false
        }
    }

    /// Single-pass concatenation into one contiguous PCM16 blob.
    pub fn concat(&self) -> Vec<i16> {
        let total: usize = self.frames.iter().map(AudioFrame::len).sum();
        let mut pcm = Vec::with_capacity(total);
        for frame in &self.frames {
            pcm.extend_from_slice(frame.samples());
        }
        pcm
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.warned_at = 0;
    }

    /// Move the buffered frames out, leaving the buffer empty.
    pub fn take(&mut self) -> DictationBuffer {
        std::mem::take(self)
    }
}
