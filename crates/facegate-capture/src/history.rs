//! Bounded ring buffer of recent frames.
//!
//! The temporal analyses (liveness, anti-spoofing) operate on a snapshot of
//! this buffer. Memory use stays bounded regardless of session length.

use crate::frame::Frame;
use std::collections::VecDeque;

/// Default number of frames retained.
pub const DEFAULT_CAPACITY: usize = 10;

/// FIFO buffer of the most recent frames, capacity fixed at construction.
pub struct FrameHistory {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        // A zero-capacity buffer would grow without bound; clamp to one.
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest once at capacity.
    pub fn push(&mut self, frame: Frame) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Immutable ordered copy, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.iter().cloned().collect()
    }

    /// Most recently pushed frame, if any.
    pub fn latest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all retained frames (session teardown).
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u32) -> Frame {
        Frame::from_rgba(vec![0u8; 4], 1, 1, seq).unwrap()
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut history = FrameHistory::new(10);
        for seq in 0..25 {
            history.push(frame(seq));
            assert!(history.len() <= 10);
        }
        assert_eq!(history.len(), 10);
    }

    #[test]
    fn test_fifo_eviction_keeps_last_n_in_order() {
        // After pushing N+k frames, the buffer holds exactly the last N,
        // oldest first.
        let mut history = FrameHistory::new(10);
        for seq in 0..13 {
            history.push(frame(seq));
        }
        let seqs: Vec<u32> = history.snapshot().iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, (3..13).collect::<Vec<u32>>());
    }

    #[test]
    fn test_latest_tracks_newest() {
        let mut history = FrameHistory::new(3);
        assert!(history.latest().is_none());
        history.push(frame(1));
        history.push(frame(2));
        assert_eq!(history.latest().unwrap().sequence, 2);
    }

    #[test]
    fn test_clear_empties() {
        let mut history = FrameHistory::new(3);
        history.push(frame(0));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 3);
    }

    #[test]
    fn test_zero_capacity_stays_bounded() {
        let mut history = FrameHistory::new(0);
        assert_eq!(history.capacity(), 1);
        for seq in 0..5 {
            history.push(frame(seq));
            assert_eq!(history.len(), 1);
        }
        assert_eq!(history.latest().unwrap().sequence, 4);
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(FrameHistory::default().capacity(), DEFAULT_CAPACITY);
    }
}
