//! Hallucination filter for model output.
//!
//! Speech models looping on noise tend to produce the same token or short
//! phrase over and over. The filter rejects a transcription when any token
//! run of length 1..=`min_token_run` repeats at least `min_repeat_count`
//! times contiguously.

use crate::config::HallucinationConfig;

/// Detects repeated-token-run hallucinations in transcribed text.
#[derive(Debug, Clone)]
pub struct HallucinationFilter {
    config: HallucinationConfig,
}

impl HallucinationFilter {
    pub fn new(config: HallucinationConfig) -> Self {
        Self { config }
    }

    /// Returns true when the text should be rejected.
    ///
    /// Tokens are whitespace-separated and compared case-insensitively, so
    /// "Check check CHECK" counts as one repeated token.
    pub fn is_hallucination(&self, text: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let tokens: Vec<String> = text
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return false;
        }

        for run_len in 1..=self.config.min_token_run.min(tokens.len()) {
            if has_contiguous_repeat(&tokens, run_len, self.config.min_repeat_count) {
                return true;
            }
        }
        false
    }
}

impl Default for HallucinationFilter {
    fn default() -> Self {
        Self::new(HallucinationConfig::default())
    }
}

/// Checks whether any `run_len`-token sequence repeats `min_repeats` times
/// back-to-back.
fn has_contiguous_repeat(tokens: &[String], run_len: usize, min_repeats: usize) -> bool {
    if run_len == 0 || tokens.len() < run_len * min_repeats {
        return false;
    }

    for start in 0..=(tokens.len() - run_len * min_repeats) {
        let pattern = &tokens[start..start + run_len];
        let mut repeats = 1;
        let mut pos = start + run_len;
        while pos + run_len <= tokens.len() && &tokens[pos..pos + run_len] == pattern {
            repeats += 1;
            pos += run_len;
        }
        if repeats >= min_repeats {
            return true;
        }
    }
    false
}
