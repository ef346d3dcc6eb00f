//! Translation stage: ordered backends with fallback and rate limits.
//!
//! Each backend implements the [`TranslationBackend`] capability; the
//! [`Translator`] tries them in configured order and attaches the first
//! success to the event. When every backend fails the event passes through
//! untranslated.

pub mod rest;

use crate::clock::Clock;
use crate::config::{SourcePolicy, TranslationConfig};
use crate::error::Result;
use crate::session::SessionCounters;
use crate::types::{TranscriptionEvent, TranslationInfo};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a single backend attempt failed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status: {0}")]
    Status(u16),

    #[error("empty translation")]
    Empty,

    #[error("request timed out")]
    Timeout,
}

/// Capability implemented by every translation backend.
pub trait TranslationBackend: Send {
    /// Configured backend name (e.g. "local_rest").
    fn name(&self) -> &str;

    /// Translate `text` from `source` to `target` language.
    fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<String, BackendError>;
}

/// Per-backend token bucket. An exhausted bucket skips the backend for the
/// current event, which counts as that backend failing.
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    rate_per_sec: f64,
    last_refill: Instant,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
        let capacity = rate_per_sec.max(1.0);
        Self {
            capacity,
            tokens: capacity,
            rate_per_sec,
            last_refill: clock.now(),
            clock,
        }
    }

    /// Takes a token if one is available.
    pub fn try_acquire(&mut self) -> bool {
        let now = self.clock.now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Entry {
    backend: Box<dyn TranslationBackend>,
    bucket: TokenBucket,
}

/// The translation stage. Applies the configured policy to each event.
pub struct Translator {
    enabled: bool,
    source_policy: SourcePolicy,
    source_language: Option<String>,
    target_language: String,
    entries: Vec<Entry>,
    counters: Arc<SessionCounters>,
}

impl Translator {
    /// Builds the translator from configuration, constructing REST backends
    /// for every configured entry.
    pub fn from_config(
        config: &TranslationConfig,
        counters: Arc<SessionCounters>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut backends: Vec<(Box<dyn TranslationBackend>, f64)> = Vec::new();
        for backend in &config.backends {
            if backend.name == "none" {
                continue;
            }
            backends.push((
                Box::new(rest::RestBackend::new(
                    &backend.name,
                    &backend.endpoint,
                    backend.timeout_ms,
                )?),
                backend.rate_limit_per_sec,
            ));
        }
        Ok(Self::with_backends(config, backends, counters, clock))
    }

    /// Builds the translator over explicit backends (tests use mocks here).
    pub fn with_backends(
        config: &TranslationConfig,
        backends: Vec<(Box<dyn TranslationBackend>, f64)>,
        counters: Arc<SessionCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let entries = backends
            .into_iter()
            .map(|(backend, rate)| Entry {
                backend,
                bucket: TokenBucket::new(rate, clock.clone()),
            })
            .collect();
        Self {
            enabled: config.enabled,
            source_policy: config.source_policy,
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
            entries,
            counters,
        }
    }

    /// Attaches a translation to the event, or leaves it untouched per the
    /// fallback rules.
    pub fn apply(&mut self, event: &mut TranscriptionEvent) {
        if !self.enabled || self.entries.is_empty() {
            return;
        }

        let source = match self.source_policy {
            SourcePolicy::Detected => event.language.clone(),
            SourcePolicy::Explicit => self
                .source_language
                .clone()
                .unwrap_or_else(|| event.language.clone()),
        };
        if source == self.target_language {
            return;
        }
        if is_trivial_text(&event.text) {
            debug!(id = event.id, "text too trivial to translate");
            return;
        }

        for entry in &mut self.entries {
            let name = entry.backend.name().to_string();
            if !entry.bucket.try_acquire() {
                debug!(id = event.id, backend = %name, "rate limit exhausted, skipping backend");
                continue;
            }
            match entry
                .backend
                .translate(&event.text, &source, &self.target_language)
            {
                Ok(text) if !text.trim().is_empty() => {
                    event.translation = Some(TranslationInfo {
                        text,
                        language: self.target_language.clone(),
                        backend: name,
                    });
                    return;
                }
                Ok(_) => {
                    warn!(id = event.id, backend = %name, "backend returned empty translation");
                }
                Err(e) => {
                    warn!(id = event.id, backend = %name, error = %e, "backend failed");
                }
            }
        }

        self.counters
            .translation_failed
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Text not worth a backend round-trip: shorter than three characters or
/// punctuation-only.
fn is_trivial_text(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() < 3 || trimmed.chars().all(|c| !c.is_alphanumeric())
}

/// Handle to the running translator thread.
pub struct TranslatorHandle {
    join: Option<JoinHandle<()>>,
}

impl TranslatorHandle {
    pub fn join(mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns the translator thread: events in, translated events fanned out to
/// every output in input order.
///
/// Outputs are unbounded taps (hub bridge, persistence); a dropped receiver
/// is ignored so one dead consumer never stalls the stream.
pub fn spawn_translator(
    mut translator: Translator,
    event_rx: Receiver<TranscriptionEvent>,
    outputs: Vec<Sender<TranscriptionEvent>>,
) -> TranslatorHandle {
    let join = thread::spawn(move || {
        let mut processed: u64 = 0;
        while let Ok(mut event) = event_rx.recv() {
            translator.apply(&mut event);
            processed += 1;
            for output in &outputs {
                let _ = output.send(event.clone());
            }
        }
        info!(processed, "translator drained");
    });
    TranslatorHandle { join: Some(join) }
}

/// Mock backend for tests.
pub struct MockBackend {
    name: String,
    result: std::result::Result<String, u16>,
    calls: Arc<std::sync::atomic::AtomicU64>,
}

impl MockBackend {
    pub fn succeeding(name: &str, translation: &str) -> Self {
        Self {
            name: name.to_string(),
            result: Ok(translation.to_string()),
            calls: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn failing(name: &str, status: u16) -> Self {
        Self {
            name: name.to_string(),
            result: Err(status),
            calls: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Shared call counter, usable after the backend moves into the
    /// translator.
    pub fn call_probe(&self) -> Arc<std::sync::atomic::AtomicU64> {
        self.calls.clone()
    }
}

impl TranslationBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(
        &self,
        _text: &str,
        _source: &str,
        _target: &str,
    ) -> std::result::Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match &self.result {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(BackendError::Status(*status)),
        }
    }
}
