//! Default configuration constants for livecap.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Default capture frame duration in milliseconds.
pub const FRAME_SIZE_MS: u32 = 20;

/// Default ring buffer capacity in seconds of audio.
///
/// The single knob that trades memory for the longest segmentation stall the
/// pipeline can absorb without dropping frames.
pub const RING_CAPACITY_SEC: f64 = 10.0;

/// Default speech-probability cutoff for the voice detector (0.0 to 1.0).
pub const VAD_THRESHOLD: f32 = 0.5;

/// Default voice-detector window duration in seconds.
pub const VAD_WINDOW_SEC: f64 = 0.5;

/// Default contiguous silence in seconds before an open utterance is closed.
///
/// 1.5 seconds allows for natural pauses in speech without prematurely
/// cutting an utterance in two.
pub const SILENCE_THRESHOLD_SEC: f64 = 1.5;

/// Default audio prepended to a segment from the ring's lookback, in seconds.
pub const PRE_SPEECH_PAD_SEC: f64 = 0.5;

/// Default audio kept after the last speech-positive window, in seconds.
pub const POST_SPEECH_PAD_SEC: f64 = 0.5;

/// Segments shorter than this are silently discarded, in seconds.
pub const MIN_SPEECH_DURATION_SEC: f64 = 0.5;

/// Default number of transcription pool workers.
pub const POOL_WORKERS: usize = 2;

/// Consecutive voice-detector failures before the segmenter escalates.
pub const VAD_ERROR_ESCALATION: u32 = 5;

/// Consecutive device read failures before capture gives up.
pub const DEVICE_ERROR_ESCALATION: u32 = 10;

/// Default hallucination filter: longest token run length inspected.
pub const HALLUCINATION_MIN_TOKEN_RUN: usize = 3;

/// Default hallucination filter: contiguous repeats that reject a text.
pub const HALLUCINATION_MIN_REPEAT_COUNT: usize = 3;

/// Default translation backend request timeout in milliseconds.
pub const BACKEND_TIMEOUT_MS: u64 = 5000;

/// Default translation backend rate limit, requests per second.
pub const BACKEND_RATE_LIMIT_PER_SEC: f64 = 5.0;

/// Default hub bind address. Loopback by contract; subscribers are local.
pub const HUB_BIND_ADDRESS: &str = "127.0.0.1";

/// Default hub port.
pub const HUB_PORT: u16 = 8765;

/// Default cap on concurrently connected subscribers.
pub const HUB_MAX_SUBSCRIBERS: usize = 32;

/// Default number of recent events replayed to a new subscriber.
pub const HUB_HISTORY_CAP: usize = 100;

/// Default per-subscriber outbound queue depth.
pub const HUB_SUBSCRIBER_QUEUE: usize = 256;

/// Default grace window in seconds before a persistently-full subscriber
/// queue gets the connection closed.
pub const SLOW_CLIENT_GRACE_SEC: u64 = 30;

/// Default per-stage drain budget at shutdown, in seconds.
pub const SHUTDOWN_DRAIN_SEC: u64 = 3;

/// Default interval between supervisor status log lines, in seconds.
pub const STATUS_INTERVAL_SEC: u64 = 5;

/// Number of samples in one frame at the given rate and frame duration.
pub const fn frame_size_samples(sample_rate: u32, frame_size_ms: u32) -> usize {
    (sample_rate as usize * frame_size_ms as usize) / 1000
}

/// Number of whole frames covering `seconds` of audio at the given geometry.
pub fn frames_for_duration(seconds: f64, sample_rate: u32, frame_size_ms: u32) -> usize {
    let samples = (seconds * sample_rate as f64).round() as usize;
    let frame = frame_size_samples(sample_rate, frame_size_ms);
    samples.div_ceil(frame.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_at_defaults_is_320_samples() {
        assert_eq!(frame_size_samples(SAMPLE_RATE, FRAME_SIZE_MS), 320);
    }

    #[test]
    fn frames_for_duration_rounds_up() {
        // 0.5s at 16kHz / 20ms frames = 25 frames exactly
        assert_eq!(frames_for_duration(0.5, 16000, 20), 25);
        // slightly more than 0.5s needs one extra frame
        assert_eq!(frames_for_duration(0.51, 16000, 20), 26);
    }

    #[test]
    fn frames_for_duration_zero_is_zero() {
        assert_eq!(frames_for_duration(0.0, 16000, 20), 0);
    }
}
