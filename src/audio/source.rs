use crate::error::{LivecapError, Result};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// A source produces raw 16-bit PCM at the session sample rate; the capture
/// stage assembles fixed-size frames from whatever a read returns.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples have accumulated since the last read.
    ///
    /// An empty vector means no data yet for live sources, or exhaustion for
    /// finite ones (see [`AudioSource::is_finite`]).
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Whether an empty read means the source is exhausted.
    ///
    /// Real devices return `false`: an empty read just means no new data.
    fn is_finite(&self) -> bool {
        false
    }
}

/// One phase of a scripted mock source: `count` reads each returning
/// `samples`.
#[derive(Debug, Clone)]
pub struct FramePhase {
    pub samples: Vec<i16>,
    pub count: u32,
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    phases: Option<Vec<FramePhase>>,
    phase_index: usize,
    phase_reads: u32,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            phases: None,
            phase_index: 0,
            phase_reads: 0,
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to play a finite sequence of phases, then report
    /// exhaustion with empty reads.
    pub fn with_frame_sequence(mut self, phases: Vec<FramePhase>) -> Self {
        self.phases = Some(phases);
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(LivecapError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(LivecapError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = false;
            Ok(())
        }
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(LivecapError::AudioCapture {
                message: self.error_message.clone(),
            });
        }

        match &self.phases {
            Some(phases) => {
                while self.phase_index < phases.len() {
                    let phase = &phases[self.phase_index];
                    if self.phase_reads < phase.count {
                        self.phase_reads += 1;
                        return Ok(phase.samples.clone());
                    }
                    self.phase_index += 1;
                    self.phase_reads = 0;
                }
                Ok(Vec::new())
            }
            None => Ok(self.samples.clone()),
        }
    }

    fn is_finite(&self) -> bool {
        self.phases.is_some()
    }
}
