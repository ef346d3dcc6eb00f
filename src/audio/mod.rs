//! Audio capture: device sources, the frame ring, and WAV I/O.

pub mod capture;
pub mod ring;
pub mod source;
pub mod wav;

pub use capture::{CaptureConfig, CaptureStage, CaptureState, CpalAudioSource, list_devices};
pub use ring::FrameRing;
pub use source::{AudioSource, FramePhase, MockAudioSource};
