//! Voice activity detection.
//!
//! The segmenter consumes a speech probability per window through the
//! [`VoiceDetector`] trait; the external VAD model of the full system lives
//! behind it. [`EnergyDetector`] is the built-in RMS-based implementation.

use crate::error::{LivecapError, Result};
use std::collections::VecDeque;

/// Produces a speech probability in [0.0, 1.0] for a PCM window.
pub trait VoiceDetector: Send {
    fn score(&mut self, window: &[i16]) -> Result<f32>;
}

/// Configuration for the energy-based detector.
#[derive(Debug, Clone, Copy)]
pub struct EnergyDetectorConfig {
    /// RMS level mapped to probability 1.0. Typical speech at conversational
    /// microphone distance sits around 0.05 normalized RMS.
    pub reference_rms: f32,
}

impl Default for EnergyDetectorConfig {
    fn default() -> Self {
        Self {
            reference_rms: 0.05,
        }
    }
}

/// RMS-threshold detector: maps normalized signal energy onto a probability
/// scale so the same `vad_threshold` cutoff applies as for a model-based
/// detector.
#[derive(Debug, Clone, Default)]
pub struct EnergyDetector {
    config: EnergyDetectorConfig,
}

impl EnergyDetector {
    pub fn new(config: EnergyDetectorConfig) -> Self {
        Self { config }
    }
}

impl VoiceDetector for EnergyDetector {
    fn score(&mut self, window: &[i16]) -> Result<f32> {
        if window.is_empty() {
            return Err(LivecapError::VoiceDetection {
                message: "empty window".to_string(),
            });
        }
        Ok((calculate_rms(window) / self.config.reference_rms).min(1.0))
    }
}

/// Normalized root-mean-square level of a PCM window, in [0.0, 1.0].
///
/// 0.0 is silence; a full-scale square wave reaches 1.0 and a full-scale
/// sine sits near 0.707.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let full_scale = f64::from(i16::MAX);
    let mut energy = 0.0f64;
    for &sample in samples {
        let level = f64::from(sample) / full_scale;
        energy += level * level;
    }
    (energy / samples.len() as f64).sqrt() as f32
}

/// One scripted response of the mock detector.
#[derive(Debug, Clone)]
pub enum ScriptedScore {
    /// Definite speech (1.0).
    Speech,
    /// Definite silence (0.0).
    Silence,
    /// An explicit probability.
    Score(f32),
    /// A detector failure.
    Error(String),
}

/// Mock detector for testing: plays back a script, then reports silence.
#[derive(Debug, Clone, Default)]
pub struct MockDetector {
    script: VecDeque<ScriptedScore>,
    calls: u64,
}

impl MockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends scripted responses, consumed one per call.
    pub fn with_script(mut self, script: Vec<ScriptedScore>) -> Self {
        self.script.extend(script);
        self
    }

    /// Number of times `score` was invoked.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl VoiceDetector for MockDetector {
    fn score(&mut self, _window: &[i16]) -> Result<f32> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(ScriptedScore::Speech) => Ok(1.0),
            Some(ScriptedScore::Silence) => Ok(0.0),
            Some(ScriptedScore::Score(p)) => Ok(p),
            Some(ScriptedScore::Error(message)) => Err(LivecapError::VoiceDetection { message }),
            None => Ok(0.0),
        }
    }
}
