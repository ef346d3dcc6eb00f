use crate::defaults;
use crate::error::{LivecapError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub segmenter: SegmenterConfig,
    pub pool: PoolConfig,
    pub translation: TranslationConfig,
    pub hub: HubConfig,
    pub persistence: PersistenceConfig,
    /// Seconds between supervisor status log lines. 0 disables the log.
    pub status_interval_sec: u64,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_size_ms: u32,
    pub ring_capacity_sec: f64,
}

/// Segmenter (voice-activity) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub vad_threshold: f32,
    pub vad_window_sec: f64,
    pub silence_threshold_sec: f64,
    pub pre_speech_pad_sec: f64,
    pub post_speech_pad_sec: f64,
    pub min_speech_duration_sec: f64,
}

/// Transcription pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub hallucination: HallucinationConfig,
}

/// Hallucination filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HallucinationConfig {
    pub enabled: bool,
    pub min_token_run: usize,
    pub min_repeat_count: usize,
}

/// Which source language translation requests declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    /// Use the language detected by the speech model.
    #[default]
    Detected,
    /// Use the configured `source_language`.
    Explicit,
}

/// Translation stage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub source_policy: SourcePolicy,
    /// Required when `source_policy = "explicit"`.
    pub source_language: Option<String>,
    pub target_language: String,
    pub backends: Vec<BackendConfig>,
}

/// One translation backend in fallback order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// One of the recognized names: local_rest, remote_rest_primary,
    /// remote_rest_secondary, none.
    pub name: String,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub rate_limit_per_sec: f64,
}

/// Broadcast hub configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_subscribers: usize,
    pub history_cap: usize,
    pub subscriber_queue: usize,
    pub slow_client_grace_sec: u64,
    pub shutdown_drain_sec: u64,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub keep_segments: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            segmenter: SegmenterConfig::default(),
            pool: PoolConfig::default(),
            translation: TranslationConfig::default(),
            hub: HubConfig::default(),
            persistence: PersistenceConfig::default(),
            status_interval_sec: defaults::STATUS_INTERVAL_SEC,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_size_ms: defaults::FRAME_SIZE_MS,
            ring_capacity_sec: defaults::RING_CAPACITY_SEC,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            vad_threshold: defaults::VAD_THRESHOLD,
            vad_window_sec: defaults::VAD_WINDOW_SEC,
            silence_threshold_sec: defaults::SILENCE_THRESHOLD_SEC,
            pre_speech_pad_sec: defaults::PRE_SPEECH_PAD_SEC,
            post_speech_pad_sec: defaults::POST_SPEECH_PAD_SEC,
            min_speech_duration_sec: defaults::MIN_SPEECH_DURATION_SEC,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: defaults::POOL_WORKERS,
            hallucination: HallucinationConfig::default(),
        }
    }
}

impl Default for HallucinationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_token_run: defaults::HALLUCINATION_MIN_TOKEN_RUN,
            min_repeat_count: defaults::HALLUCINATION_MIN_REPEAT_COUNT,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source_policy: SourcePolicy::Detected,
            source_language: None,
            target_language: "en".to_string(),
            backends: Vec::new(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: "local_rest".to_string(),
            endpoint: String::new(),
            timeout_ms: defaults::BACKEND_TIMEOUT_MS,
            rate_limit_per_sec: defaults::BACKEND_RATE_LIMIT_PER_SEC,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::HUB_BIND_ADDRESS.to_string(),
            port: defaults::HUB_PORT,
            max_subscribers: defaults::HUB_MAX_SUBSCRIBERS,
            history_cap: defaults::HUB_HISTORY_CAP,
            subscriber_queue: defaults::HUB_SUBSCRIBER_QUEUE,
            slow_client_grace_sec: defaults::SLOW_CLIENT_GRACE_SEC,
            shutdown_drain_sec: defaults::SHUTDOWN_DRAIN_SEC,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("livecap-data"),
            keep_segments: false,
        }
    }
}

/// Backend names the translator recognizes.
const KNOWN_BACKENDS: &[&str] = &[
    "local_rest",
    "remote_rest_primary",
    "remote_rest_secondary",
    "none",
];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LIVECAP_DEVICE → audio.device
    /// - LIVECAP_DATA_DIR → persistence.data_dir
    /// - LIVECAP_TARGET_LANGUAGE → translation.target_language
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("LIVECAP_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(dir) = std::env::var("LIVECAP_DATA_DIR")
            && !dir.is_empty()
        {
            self.persistence.data_dir = PathBuf::from(dir);
        }

        if let Ok(lang) = std::env::var("LIVECAP_TARGET_LANGUAGE")
            && !lang.is_empty()
        {
            self.translation.target_language = lang;
        }

        self
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// Called once at startup; any error here refuses to start the session.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> LivecapError {
            LivecapError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.frame_size_ms == 0 {
            return Err(invalid("audio.frame_size_ms", "must be positive"));
        }
        if self.audio.ring_capacity_sec <= 0.0 {
            return Err(invalid("audio.ring_capacity_sec", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.segmenter.vad_threshold) {
            return Err(invalid("segmenter.vad_threshold", "must be in [0, 1]"));
        }
        if self.segmenter.vad_window_sec <= 0.0 {
            return Err(invalid("segmenter.vad_window_sec", "must be positive"));
        }
        if self.segmenter.silence_threshold_sec <= 0.0 {
            return Err(invalid("segmenter.silence_threshold_sec", "must be positive"));
        }
        if self.segmenter.pre_speech_pad_sec < 0.0 || self.segmenter.post_speech_pad_sec < 0.0 {
            return Err(invalid("segmenter.pad", "pads must not be negative"));
        }
        if self.segmenter.min_speech_duration_sec < 0.0 {
            return Err(invalid(
                "segmenter.min_speech_duration_sec",
                "must not be negative",
            ));
        }
        if self.pool.workers == 0 {
            return Err(invalid("pool.workers", "must be at least 1"));
        }
        if self.pool.hallucination.min_token_run == 0 {
            return Err(invalid("pool.hallucination.min_token_run", "must be at least 1"));
        }
        if self.pool.hallucination.min_repeat_count < 2 {
            return Err(invalid(
                "pool.hallucination.min_repeat_count",
                "must be at least 2",
            ));
        }
        if self.translation.enabled {
            if self.translation.target_language.is_empty() {
                return Err(invalid("translation.target_language", "must not be empty"));
            }
            if self.translation.source_policy == SourcePolicy::Explicit
                && self
                    .translation
                    .source_language
                    .as_deref()
                    .unwrap_or("")
                    .is_empty()
            {
                return Err(invalid(
                    "translation.source_language",
                    "required when source_policy is explicit",
                ));
            }
            for backend in &self.translation.backends {
                if !KNOWN_BACKENDS.contains(&backend.name.as_str()) {
                    return Err(invalid(
                        "translation.backends.name",
                        &format!("unrecognized backend '{}'", backend.name),
                    ));
                }
                if backend.name != "none" && backend.endpoint.is_empty() {
                    return Err(invalid(
                        "translation.backends.endpoint",
                        &format!("backend '{}' needs an endpoint", backend.name),
                    ));
                }
            }
        }
        if self.hub.max_subscribers == 0 {
            return Err(invalid("hub.max_subscribers", "must be at least 1"));
        }
        if self.hub.subscriber_queue == 0 {
            return Err(invalid("hub.subscriber_queue", "must be at least 1"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/livecap/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("livecap")
            .join("config.toml")
    }
}
