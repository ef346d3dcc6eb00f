//! The speech-recognition engine seam.
//!
//! The model itself is an external collaborator; the pool only needs a
//! black box turning a PCM buffer into text plus a detected language.

use crate::error::{LivecapError, Result};
use crate::types::Transcription;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for speech-to-text engines.
///
/// Implementations must be callable from several pool workers at once.
pub trait SpeechEngine: Send + Sync {
    /// Transcribe audio samples to text with a detected language.
    ///
    /// # Arguments
    /// * `audio` - Audio samples as 16-bit PCM, mono, session sample rate
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the engine is ready
    fn is_ready(&self) -> bool;
}

/// Implement SpeechEngine for Arc<T> to allow sharing across workers.
impl<T: SpeechEngine + ?Sized> SpeechEngine for Arc<T> {
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// One scripted response of the mock engine.
#[derive(Debug, Clone)]
enum ScriptedResult {
    Ok(Transcription),
    Err(String),
}

/// Mock engine for testing.
///
/// Returns a fixed response by default; `with_script` plays responses (and
/// failures) in segment order instead, one per call.
#[derive(Debug, Clone)]
pub struct MockEngine {
    model_name: String,
    response: Transcription,
    script: Arc<Mutex<VecDeque<ScriptedResult>>>,
    always_fail: bool,
    calls: Arc<AtomicU64>,
}

impl MockEngine {
    /// Create a new mock engine with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: Transcription {
                text: "mock transcription".to_string(),
                language: "en".to_string(),
                confidence: Some(1.0),
            },
            script: Arc::new(Mutex::new(VecDeque::new())),
            always_fail: false,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Configure the mock to return a specific text (language "en").
    pub fn with_response(mut self, text: &str) -> Self {
        self.response.text = text.to_string();
        self
    }

    /// Configure the detected language of the fixed response.
    pub fn with_language(mut self, language: &str) -> Self {
        self.response.language = language.to_string();
        self
    }

    /// Configure the confidence of the fixed response.
    pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
        self.response.confidence = confidence;
        self
    }

    /// Configure the mock to fail on every call.
    pub fn with_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Queue a scripted successful response.
    pub fn push_response(&self, text: &str, language: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedResult::Ok(Transcription {
                text: text.to_string(),
                language: language.to_string(),
                confidence: Some(1.0),
            }));
    }

    /// Queue a scripted failure.
    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedResult::Err(message.to_string()));
    }

    /// Number of transcribe calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl SpeechEngine for MockEngine {
    fn transcribe(&self, _audio: &[i16]) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.always_fail {
            return Err(LivecapError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedResult::Ok(tr)) => Ok(tr),
            Some(ScriptedResult::Err(message)) => Err(LivecapError::Transcription { message }),
            None => Ok(self.response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.always_fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_engine_returns_response() {
        let engine = MockEngine::new("test-model")
            .with_response("Hello, this is a test")
            .with_language("pt")
            .with_confidence(Some(0.8));

        let audio = vec![0i16; 1000];
        let result = engine.transcribe(&audio).unwrap();

        assert_eq!(result.text, "Hello, this is a test");
        assert_eq!(result.language, "pt");
        assert_eq!(result.confidence, Some(0.8));
    }

    #[test]
    fn test_mock_engine_failure() {
        let engine = MockEngine::new("test-model").with_failure();

        let result = engine.transcribe(&[0i16; 100]);

        assert!(result.is_err());
        match result {
            Err(LivecapError::Transcription { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            _ => panic!("Expected Transcription error"),
        }
        assert!(!engine.is_ready());
    }

    #[test]
    fn test_mock_engine_script_plays_in_order() {
        let engine = MockEngine::new("test-model").with_response("fallback");
        engine.push_response("first", "en");
        engine.push_failure("flaky");
        engine.push_response("second", "pt");

        assert_eq!(engine.transcribe(&[]).unwrap().text, "first");
        assert!(engine.transcribe(&[]).is_err());
        let second = engine.transcribe(&[]).unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(second.language, "pt");
        // Script exhausted: fixed response again
        assert_eq!(engine.transcribe(&[]).unwrap().text, "fallback");
        assert_eq!(engine.calls(), 4);
    }

    #[test]
    fn test_mock_engine_model_name() {
        let engine = MockEngine::new("whisper-base");
        assert_eq!(engine.model_name(), "whisper-base");
    }

    #[test]
    fn test_engine_trait_is_object_safe() {
        let engine: Box<dyn SpeechEngine> =
            Box::new(MockEngine::new("test-model").with_response("boxed test"));

        assert_eq!(engine.model_name(), "test-model");
        assert!(engine.is_ready());
        assert_eq!(engine.transcribe(&[0i16; 100]).unwrap().text, "boxed test");
    }

    #[test]
    fn test_arc_engine_shares_script() {
        let engine = Arc::new(MockEngine::new("shared"));
        engine.push_response("once", "en");

        let cloned = engine.clone();
        assert_eq!(cloned.transcribe(&[]).unwrap().text, "once");
        // Fixed default afterwards, through either handle
        assert_eq!(engine.transcribe(&[]).unwrap().text, "mock transcription");
        assert_eq!(engine.calls(), 2);
    }
}
