//! Speech-to-text: the engine seam, hallucination filtering, and the
//! order-preserving transcription pool.

pub mod engine;
pub mod hallucination;
pub mod pool;
pub mod reorder;

pub use engine::{MockEngine, SpeechEngine};
pub use hallucination::HallucinationFilter;
pub use pool::{PoolHandle, TranscriptionPool};
pub use reorder::ReorderBuffer;
