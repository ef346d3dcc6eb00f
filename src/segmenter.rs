//! Segmenter: carves the frame stream into utterance segments.
//!
//! Consumes frames from the ring, runs the voice detector over sliding
//! windows, and emits pre-/post-padded segments with monotonic, gap-free
//! ids. Runs on a single thread; ids never need synchronization.
//!
//! The VAD window is rounded to whole capture frames so all duration
//! arithmetic stays exact in sample counts.

use crate::audio::ring::{FrameRing, PopResult};
use crate::config::SegmenterConfig;
use crate::defaults;
use crate::session::{Escalation, SessionCounters};
use crate::types::{Frame, Segment};
use crate::vad::VoiceDetector;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Segmentation state while consuming the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating frames into a rolling window, no open utterance.
    Listening,
    /// Open utterance, last window was speech.
    Recording,
    /// Open utterance, counting contiguous silence toward the close
    /// threshold.
    SilencePending,
}

/// An utterance being accumulated.
struct OpenSegment {
    pcm: Vec<i16>,
    /// Frame index of the first sample in `pcm`.
    first_frame_index: u64,
    /// `pcm` length at the end of the last speech-positive window. The
    /// trailing silence past this point gets trimmed to the post pad.
    last_speech_len: usize,
    /// Contiguous non-speech accumulated since the last speech window, in
    /// samples.
    silence_samples: usize,
}

/// Handle to the running segmenter thread.
pub struct SegmenterHandle {
    join: Option<JoinHandle<()>>,
}

impl SegmenterHandle {
    pub fn join(mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// The segmenter stage. Construct with the session geometry, then
/// [`Segmenter::spawn`].
pub struct Segmenter {
    config: SegmenterConfig,
    sample_rate: u32,
    frame_size_ms: u32,
    session_start: DateTime<Utc>,
}

impl Segmenter {
    pub fn new(
        config: SegmenterConfig,
        sample_rate: u32,
        frame_size_ms: u32,
        session_start: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            sample_rate,
            frame_size_ms,
            session_start,
        }
    }

    /// Spawns the segmenter thread.
    ///
    /// Emitted segments move into `segment_tx` (the pool input; blocking on
    /// a full channel is the pipeline's only back-pressure). An independent
    /// copy goes to `audio_tap` for persistence, which must never stall the
    /// stream, so tap failures are ignored.
    pub fn spawn(
        self,
        mut detector: Box<dyn VoiceDetector>,
        ring: Arc<FrameRing>,
        segment_tx: Sender<Segment>,
        audio_tap: Sender<Segment>,
        counters: Arc<SessionCounters>,
        running: Arc<AtomicBool>,
        escalation: Sender<Escalation>,
    ) -> SegmenterHandle {
        let join = thread::spawn(move || {
            // Cancellation reaches the segmenter through the ring: capture
            // stops first and closes it, so the flag itself is only held to
            // keep the drain contract visible at the call site.
            let _running = running;
            let mut worker = SegmenterWorker::new(
                self,
                &mut *detector,
                &ring,
                segment_tx,
                audio_tap,
                counters,
                escalation,
            );
            worker.run();
        });

        SegmenterHandle { join: Some(join) }
    }
}

struct SegmenterWorker<'a> {
    sample_rate: u32,
    session_start: DateTime<Utc>,
    frame_size: usize,
    frame_duration_us: i64,
    window_frames: usize,
    pre_pad_frames: usize,
    post_pad_samples: usize,
    min_samples: usize,
    silence_threshold_samples: usize,
    vad_threshold: f32,

    detector: &'a mut dyn VoiceDetector,
    ring: &'a FrameRing,
    segment_tx: Sender<Segment>,
    audio_tap: Sender<Segment>,
    counters: Arc<SessionCounters>,
    escalation: Sender<Escalation>,

    state: State,
    active: Option<OpenSegment>,
    window: Vec<i16>,
    window_frame_count: usize,
    window_first_index: u64,
    expected_next_index: Option<u64>,
    next_segment_id: u64,
    consecutive_vad_errors: u32,
    escalated: bool,
    downstream_closed: bool,
}

impl<'a> SegmenterWorker<'a> {
    fn new(
        segmenter: Segmenter,
        detector: &'a mut dyn VoiceDetector,
        ring: &'a FrameRing,
        segment_tx: Sender<Segment>,
        audio_tap: Sender<Segment>,
        counters: Arc<SessionCounters>,
        escalation: Sender<Escalation>,
    ) -> Self {
        let rate = segmenter.sample_rate;
        let cfg = &segmenter.config;
        let frame_size = defaults::frame_size_samples(rate, segmenter.frame_size_ms);
        let frame_sec = segmenter.frame_size_ms as f64 / 1000.0;
        let samples = |sec: f64| (sec * rate as f64).round() as usize;

        Self {
            sample_rate: rate,
            session_start: segmenter.session_start,
            frame_size,
            frame_duration_us: segmenter.frame_size_ms as i64 * 1000,
            window_frames: ((cfg.vad_window_sec / frame_sec).round() as usize).max(1),
            pre_pad_frames: samples(cfg.pre_speech_pad_sec) / frame_size.max(1),
            post_pad_samples: samples(cfg.post_speech_pad_sec),
            min_samples: samples(cfg.min_speech_duration_sec),
            silence_threshold_samples: samples(cfg.silence_threshold_sec).max(1),
            vad_threshold: cfg.vad_threshold,
            detector,
            ring,
            segment_tx,
            audio_tap,
            counters,
            escalation,
            state: State::Listening,
            active: None,
            window: Vec::new(),
            window_frame_count: 0,
            window_first_index: 0,
            expected_next_index: None,
            next_segment_id: 1,
            consecutive_vad_errors: 0,
            escalated: false,
            downstream_closed: false,
        }
    }

    fn run(&mut self) {
        loop {
            if self.downstream_closed {
                break;
            }
            match self.ring.pop_or_wait(Duration::from_millis(100)) {
                PopResult::Frame(frame) => self.handle_frame(frame),
                PopResult::Timeout => continue,
                PopResult::Closed => break,
            }
        }

        // Cancellation or end of stream: flush the in-flight segment.
        self.close_segment(false);
        info!(segments = self.next_segment_id - 1, "segmenter exited");
    }

    fn handle_frame(&mut self, frame: Frame) {
        if let Some(expected) = self.expected_next_index
            && frame.index != expected
        {
            // Frames were overwritten under stall: utterance continuity is
            // broken, so the open segment closes as-is.
            warn!(
                expected,
                got = frame.index,
                "frame gap detected, closing open segment"
            );
            self.close_segment(false);
            self.window.clear();
            self.window_frame_count = 0;
        }
        self.expected_next_index = Some(frame.index + 1);

        if self.window.is_empty() {
            self.window_first_index = frame.index;
        }
        self.window.extend_from_slice(&frame.samples);
        self.window_frame_count += 1;

        if self.state != State::Listening
            && let Some(active) = self.active.as_mut()
        {
            active.pcm.extend_from_slice(&frame.samples);
        }

        if self.window_frame_count >= self.window_frames {
            self.evaluate_window();
            self.window.clear();
            self.window_frame_count = 0;
        }
    }

    fn evaluate_window(&mut self) {
        let is_speech = match self.detector.score(&self.window) {
            Ok(score) => {
                self.consecutive_vad_errors = 0;
                score >= self.vad_threshold
            }
            Err(e) => {
                // A failed window counts as non-speech.
                self.counters.vad_errors.fetch_add(1, Ordering::Relaxed);
                self.consecutive_vad_errors += 1;
                warn!(error = %e, "voice detector error, treating window as silence");
                if self.consecutive_vad_errors >= defaults::VAD_ERROR_ESCALATION && !self.escalated
                {
                    self.escalated = true;
                    let _ = self.escalation.send(Escalation {
                        source: "segmenter",
                        message: format!("persistent voice detector failure: {}", e),
                    });
                }
                false
            }
        };

        match (self.state, is_speech) {
            (State::Listening, true) => self.open_segment(),
            (State::Listening, false) => {}
            (State::Recording, true) => self.mark_speech(),
            (State::Recording, false) => {
                self.state = State::SilencePending;
                self.accumulate_silence();
            }
            (State::SilencePending, true) => {
                // Speech resumed: the silence run resets.
                if let Some(active) = self.active.as_mut() {
                    active.silence_samples = 0;
                }
                self.mark_speech();
                self.state = State::Recording;
            }
            (State::SilencePending, false) => self.accumulate_silence(),
        }
    }

    fn open_segment(&mut self) {
        let pre_pad = self
            .ring
            .snapshot_before(self.window_first_index, self.pre_pad_frames);
        let pre_frames = pre_pad.len() / self.frame_size.max(1);
        let first_frame_index = self.window_first_index - pre_frames as u64;

        let mut pcm = pre_pad;
        pcm.extend_from_slice(&self.window);
        let last_speech_len = pcm.len();

        debug!(
            first_frame = first_frame_index,
            pre_frames, "speech onset, segment opened"
        );
        self.active = Some(OpenSegment {
            pcm,
            first_frame_index,
            last_speech_len,
            silence_samples: 0,
        });
        self.state = State::Recording;
    }

    fn mark_speech(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.last_speech_len = active.pcm.len();
        }
    }

    fn accumulate_silence(&mut self) {
        let threshold = self.silence_threshold_samples;
        let crossed = if let Some(active) = self.active.as_mut() {
            active.silence_samples += self.window.len();
            active.silence_samples >= threshold
        } else {
            false
        };
        if crossed {
            self.close_segment(true);
        }
    }

    /// Closes the open utterance, if any. With `trim` the trailing silence
    /// is cut back to the post-speech pad; a forced close (frame gap,
    /// shutdown flush) emits the buffer as-is.
    fn close_segment(&mut self, trim: bool) {
        let Some(mut active) = self.active.take() else {
            self.state = State::Listening;
            return;
        };
        self.state = State::Listening;

        if trim {
            let end = (active.last_speech_len + self.post_pad_samples).min(active.pcm.len());
            active.pcm.truncate(end);
        }

        if active.pcm.len() < self.min_samples {
            self.counters.rejected_short.fetch_add(1, Ordering::Relaxed);
            debug!(
                samples = active.pcm.len(),
                "segment below minimum speech duration, dropped"
            );
            return;
        }

        let start_ts = self.session_start
            + chrono::Duration::microseconds(
                active.first_frame_index as i64 * self.frame_duration_us,
            );
        let id = self.next_segment_id;
        self.next_segment_id += 1;

        let segment = Segment::new(id, start_ts, active.pcm, self.sample_rate);
        info!(id, duration_sec = segment.duration_sec, "segment emitted");
        self.counters
            .segments_emitted
            .fetch_add(1, Ordering::Relaxed);

        // Persistence gets its own copy and can never stall the stream.
        let _ = self.audio_tap.send(segment.clone());

        // The pool input is bounded: this send is the only place the
        // pipeline applies back-pressure.
        if self.segment_tx.send(segment).is_err() {
            warn!("segment channel closed, stopping segmenter");
            self.downstream_closed = true;
        }
    }
}
