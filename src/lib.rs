//! livecap - live transcription and translation pipeline
//!
//! Turns a continuous microphone or system-audio stream into a timestamped
//! sequence of transcribed (and optionally translated) utterances,
//! broadcast in real time to loopback subscribers and persisted to disk.
//!
//! The pipeline: capture → ring buffer → segmenter (VAD) → transcription
//! pool → translator → broadcast hub, with persistence tapping the
//! segmenter and the post-translation stream. The speech model, VAD model
//! and translation services are external collaborators behind the
//! [`stt::SpeechEngine`], [`vad::VoiceDetector`] and
//! [`translate::TranslationBackend`] seams.

pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod hub;
pub mod persist;
pub mod segmenter;
pub mod session;
pub mod stt;
pub mod supervisor;
pub mod translate;
pub mod types;
pub mod vad;

pub use config::Config;
pub use error::{LivecapError, Result};
pub use session::{SessionState, SessionSummary};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use types::{Frame, Segment, Transcription, TranscriptionEvent, TranslationInfo};
