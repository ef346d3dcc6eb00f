//! Fixed-capacity frame ring between capture and the segmenter.
//!
//! The ring is the decoupling point of the pipeline: a model inference burst
//! must never stall audio capture, so `push` overwrites the oldest frame
//! instead of blocking. Consumed frames are retained in the window until
//! overwritten, which is what gives the segmenter its pre-speech lookback.

use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Result of a consumer-side dequeue.
#[derive(Debug)]
pub enum PopResult {
    /// The next unread frame.
    Frame(Frame),
    /// No frame arrived within the deadline.
    Timeout,
    /// Producer closed the ring and all unread frames were drained.
    Closed,
}

struct RingState {
    /// Window of retained frames, oldest at the front.
    frames: VecDeque<Frame>,
    /// Offset from the front of the next unread frame.
    read_pos: usize,
    /// Frames destroyed before the consumer ever saw them.
    overwritten: u64,
    closed: bool,
}

/// Single-producer/single-consumer frame ring with bounded lookback.
pub struct FrameRing {
    state: Mutex<RingState>,
    available: Condvar,
    capacity: usize,
}

impl FrameRing {
    /// Creates a ring retaining at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            state: Mutex::new(RingState {
                frames: VecDeque::with_capacity(capacity),
                read_pos: 0,
                overwritten: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Appends a frame, overwriting the oldest when full. Never blocks.
    ///
    /// Returns the number of unread frames destroyed by this push (0 or 1);
    /// already-consumed frames leave the window silently.
    pub fn push(&self, frame: Frame) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut dropped = 0;

        if state.frames.len() == self.capacity {
            state.frames.pop_front();
            if state.read_pos > 0 {
                state.read_pos -= 1;
            } else {
                state.overwritten += 1;
                dropped = 1;
            }
        }

        state.frames.push_back(frame);
        drop(state);
        self.available.notify_one();
        dropped
    }

    /// Dequeues the next unread frame, waiting up to `deadline`.
    pub fn pop_or_wait(&self, deadline: Duration) -> PopResult {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.read_pos < state.frames.len() {
                let frame = state.frames[state.read_pos].clone();
                state.read_pos += 1;
                return PopResult::Frame(frame);
            }
            if state.closed {
                return PopResult::Closed;
            }
            let (next, timeout) = self.available.wait_timeout(state, deadline).unwrap();
            state = next;
            if timeout.timed_out() && state.read_pos >= state.frames.len() {
                return if state.closed {
                    PopResult::Closed
                } else {
                    PopResult::Timeout
                };
            }
        }
    }

    /// Copies the samples of up to `max_frames` frames whose index precedes
    /// `before_index`, in stream order. Used for the pre-speech pad; returns
    /// fewer frames near session start.
    pub fn snapshot_before(&self, before_index: u64, max_frames: usize) -> Vec<i16> {
        let state = self.state.lock().unwrap();
        let preceding: Vec<&Frame> = state
            .frames
            .iter()
            .filter(|f| f.index < before_index)
            .collect();

        let start = preceding.len().saturating_sub(max_frames);
        preceding[start..]
            .iter()
            .flat_map(|f| f.samples.iter().copied())
            .collect()
    }

    /// Marks the ring closed; consumers drain remaining frames then see
    /// [`PopResult::Closed`].
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    /// Total unread frames destroyed by overwrites across the session.
    pub fn overwritten(&self) -> u64 {
        self.state.lock().unwrap().overwritten
    }

    /// Number of frames currently waiting to be consumed.
    pub fn unread(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.frames.len() - state.read_pos
    }
}
