//! Data types that flow between pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fixed-size block of signed 16-bit PCM samples with a monotonic index.
///
/// Frames are the only currency between capture and the segmenter. The index
/// is gap-free as produced; a gap observed downstream means the ring dropped
/// frames under segmentation stall.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame index, starting at 0 for the session.
    pub index: u64,
    /// PCM samples (16-bit signed integers), exactly one frame's worth.
    pub samples: Vec<i16>,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(index: u64, samples: Vec<i16>) -> Self {
        Self { index, samples }
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_sec(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate as f64
    }
}

/// An utterance carved from the stream by the segmenter.
///
/// The PCM begins with the configured pre-speech pad and ends with the
/// post-speech pad. Ownership moves across channel boundaries; only
/// persistence receives an independent copy.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Monotonically increasing, gap-free id, starting at 1.
    pub id: u64,
    /// Wall clock of the first sample, derived from frame index.
    pub start_ts: DateTime<Utc>,
    /// Wall clock of the last sample.
    pub end_ts: DateTime<Utc>,
    /// Owned contiguous PCM buffer.
    pub pcm: Vec<i16>,
    /// Length of `pcm` in seconds.
    pub duration_sec: f64,
}

impl Segment {
    /// Builds a segment, deriving `end_ts` and `duration_sec` from the PCM
    /// length so `end_ts - start_ts == duration_sec` holds by construction.
    pub fn new(id: u64, start_ts: DateTime<Utc>, pcm: Vec<i16>, sample_rate: u32) -> Self {
        let duration_sec = pcm.len() as f64 / sample_rate as f64;
        let end_ts = start_ts + chrono::Duration::microseconds((duration_sec * 1e6) as i64);
        Self {
            id,
            start_ts,
            end_ts,
            pcm,
            duration_sec,
        }
    }
}

/// Raw output of the speech-recognition model for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Transcribed text.
    pub text: String,
    /// Detected language, BCP-47 lowercase (e.g. "en", "pt").
    pub language: String,
    /// Confidence in [0.0, 1.0] if the model reports one.
    pub confidence: Option<f32>,
}

/// Translation attached to an event by the translator stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationInfo {
    /// Translated text.
    pub text: String,
    /// Target language, BCP-47 lowercase.
    pub language: String,
    /// Name of the backend that produced the translation.
    pub backend: String,
}

/// A finished transcription, immutable once constructed.
///
/// Shared by reference across hub subscribers; extension fields live in
/// `extras` so consumers never break on additions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionEvent {
    /// Segment id this event was produced from.
    pub id: u64,
    /// Wall clock of the utterance start, ISO 8601 UTC.
    pub timestamp: DateTime<Utc>,
    /// Non-empty transcribed text (post hallucination filter).
    pub text: String,
    /// Detected language, BCP-47 lowercase.
    pub language: String,
    /// Model confidence, absent when the model reports none.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<f32>,
    /// Translation, absent when disabled, skipped, or failed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub translation: Option<TranslationInfo>,
    /// Extension fields.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub extras: HashMap<String, serde_json::Value>,
}

impl TranscriptionEvent {
    /// Builds an event from a segment's identity and the model output.
    pub fn from_transcription(id: u64, timestamp: DateTime<Utc>, tr: Transcription) -> Self {
        Self {
            id,
            timestamp,
            text: tr.text,
            language: tr.language,
            confidence: tr.confidence,
            translation: None,
            extras: HashMap::new(),
        }
    }
}
