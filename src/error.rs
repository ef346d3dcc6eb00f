//! Error types for livecap.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LivecapError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio device failed permanently: {message}")]
    AudioDeviceFailed { message: String },

    // Segmentation errors
    #[error("Voice detection failed: {message}")]
    VoiceDetection { message: String },

    #[error("Segmenter failed: {message}")]
    Segmenter { message: String },

    // Transcription errors
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    // Translation errors
    #[error("Translation failed: {message}")]
    Translation { message: String },

    // Broadcast hub errors
    #[error("Hub socket error: {message}")]
    HubSocket { message: String },

    #[error("Hub protocol error: {message}")]
    HubProtocol { message: String },

    // Persistence errors
    #[error("Persistence failed for {path}: {message}")]
    Persistence { path: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LivecapError>;
