//! REST translation backend.
//!
//! Speaks the LibreTranslate-style JSON contract: POST `{q, source,
//! target, format}` to the endpoint, read `{translatedText}` back. Both the
//! local service and the remote fallbacks use this shape.

use crate::error::{LivecapError, Result};
use crate::translate::{BackendError, TranslationBackend};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
}

/// A translation backend addressed by an HTTP endpoint.
pub struct RestBackend {
    name: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl RestBackend {
    pub fn new(name: &str, endpoint: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| LivecapError::Translation {
                message: format!("failed to build HTTP client for {}: {}", name, e),
            })?;

        Ok(Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

impl TranslationBackend for RestBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<String, BackendError> {
        let request = TranslateRequest {
            q: text,
            source,
            target,
            format: "text",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| BackendError::Network(format!("invalid JSON response: {}", e)))?;

        debug!(backend = %self.name, "translation response received");
        parse_translated_text(&body)
    }
}

/// Extracts a non-empty `translatedText` field from a response body.
fn parse_translated_text(body: &serde_json::Value) -> std::result::Result<String, BackendError> {
    match body.get("translatedText").and_then(|v| v.as_str()) {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(BackendError::Empty),
    }
}
