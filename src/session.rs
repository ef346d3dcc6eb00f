//! Process-wide session state and counters.
//!
//! Constructed once by the supervisor and passed explicitly to each
//! component; there are no globals.

use crate::config::Config;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity and layout of one supervisor run.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Session id, derived from the start timestamp (e.g. `20250601_120000`).
    pub session_id: String,
    /// Wall clock the session started; segment timestamps are derived from
    /// this plus frame arithmetic.
    pub started_at: DateTime<Utc>,
    /// Root output directory.
    pub data_dir: PathBuf,
    /// `<data_dir>/recordings`
    pub recordings_dir: PathBuf,
    /// `<data_dir>/transcripts`
    pub transcripts_dir: PathBuf,
    /// `<data_dir>/translations`
    pub translations_dir: PathBuf,
    /// Full configuration snapshot for the session lifetime.
    pub config: Config,
}

impl SessionState {
    /// Creates session state rooted at the configured data directory.
    pub fn new(config: Config, started_at: DateTime<Utc>) -> Self {
        let session_id = started_at.format("%Y%m%d_%H%M%S").to_string();
        let data_dir = config.persistence.data_dir.clone();
        Self {
            session_id,
            started_at,
            recordings_dir: data_dir.join("recordings"),
            transcripts_dir: data_dir.join("transcripts"),
            translations_dir: data_dir.join("translations"),
            data_dir,
            config,
        }
    }

    /// Path of the combined recording produced at shutdown.
    pub fn combined_recording_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("combined_recording_{}.wav", self.session_id))
    }
}

/// A fatal condition reported by a stage to the supervisor.
///
/// Only unrecoverable failures travel this path; everything recoverable is
/// a counter increment. The supervisor reacts by starting orderly shutdown.
#[derive(Debug, Clone)]
pub struct Escalation {
    /// Stage that raised the condition (e.g. "capture", "segmenter").
    pub source: &'static str,
    pub message: String,
}

/// Session-wide counters, shared across stages as `Arc<SessionCounters>`.
///
/// Everything here is monotonic and recovered-error accounting; fatal
/// conditions travel the escalation channel instead.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_captured: AtomicU64,
    pub frames_overwritten: AtomicU64,
    pub device_underruns: AtomicU64,
    pub segments_emitted: AtomicU64,
    pub rejected_short: AtomicU64,
    pub rejected_hallucination: AtomicU64,
    pub model_errors: AtomicU64,
    pub vad_errors: AtomicU64,
    pub translation_failed: AtomicU64,
    pub subscribers_connected: AtomicU64,
    pub slow_client_drops: AtomicU64,
    pub persistence_errors: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for the shutdown report and the periodic status line.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            device_underruns: self.device_underruns.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            rejected_short: self.rejected_short.load(Ordering::Relaxed),
            rejected_hallucination: self.rejected_hallucination.load(Ordering::Relaxed),
            model_errors: self.model_errors.load(Ordering::Relaxed),
            vad_errors: self.vad_errors.load(Ordering::Relaxed),
            translation_failed: self.translation_failed.load(Ordering::Relaxed),
            subscribers_connected: self.subscribers_connected.load(Ordering::Relaxed),
            slow_client_drops: self.slow_client_drops.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_captured: u64,
    pub frames_overwritten: u64,
    pub device_underruns: u64,
    pub segments_emitted: u64,
    pub rejected_short: u64,
    pub rejected_hallucination: u64,
    pub model_errors: u64,
    pub vad_errors: u64,
    pub translation_failed: u64,
    pub subscribers_connected: u64,
    pub slow_client_drops: u64,
    pub persistence_errors: u64,
}

impl SessionSummary {
    /// Renders the shutdown report. The supervisor prints this to stdout.
    pub fn render(&self, session_id: &str) -> String {
        format!(
            "session {id} summary:\n\
             \x20 captured frames:       {frames}\n\
             \x20 overwritten frames:    {overwritten}\n\
             \x20 device underruns:      {underruns}\n\
             \x20 emitted segments:      {segments}\n\
             \x20 rejected short:        {short}\n\
             \x20 rejected hallucination:{hallucination}\n\
             \x20 model errors:          {model}\n\
             \x20 vad errors:            {vad}\n\
             \x20 translation failures:  {translation}\n\
             \x20 subscribers connected: {subscribers}\n\
             \x20 slow client drops:     {slow}\n\
             \x20 persistence errors:    {persistence}",
            id = session_id,
            frames = self.frames_captured,
            overwritten = self.frames_overwritten,
            underruns = self.device_underruns,
            segments = self.segments_emitted,
            short = self.rejected_short,
            hallucination = self.rejected_hallucination,
            model = self.model_errors,
            vad = self.vad_errors,
            translation = self.translation_failed,
            subscribers = self.subscribers_connected,
            slow = self.slow_client_drops,
            persistence = self.persistence_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_session_id_from_timestamp() {
        let state = SessionState::new(Config::default(), started());
        assert_eq!(state.session_id, "20250601_120000");
    }

    #[test]
    fn test_session_directories_under_data_dir() {
        let mut config = Config::default();
        config.persistence.data_dir = PathBuf::from("/tmp/lc");
        let state = SessionState::new(config, started());

        assert_eq!(state.recordings_dir, PathBuf::from("/tmp/lc/recordings"));
        assert_eq!(state.transcripts_dir, PathBuf::from("/tmp/lc/transcripts"));
        assert_eq!(
            state.translations_dir,
            PathBuf::from("/tmp/lc/translations")
        );
        assert_eq!(
            state.combined_recording_path(),
            PathBuf::from("/tmp/lc/combined_recording_20250601_120000.wav")
        );
    }

    #[test]
    fn test_counters_start_at_zero() {
        let counters = SessionCounters::new();
        let summary = counters.summary();
        assert_eq!(summary.frames_captured, 0);
        assert_eq!(summary.segments_emitted, 0);
        assert_eq!(summary.persistence_errors, 0);
    }

    #[test]
    fn test_counters_snapshot_reflects_increments() {
        let counters = SessionCounters::new();
        counters.frames_captured.fetch_add(100, Ordering::Relaxed);
        counters.rejected_short.fetch_add(2, Ordering::Relaxed);

        let summary = counters.summary();
        assert_eq!(summary.frames_captured, 100);
        assert_eq!(summary.rejected_short, 2);
        assert_eq!(summary.rejected_hallucination, 0);
    }

    #[test]
    fn test_summary_render_contains_all_counts() {
        let counters = SessionCounters::new();
        counters.segments_emitted.fetch_add(7, Ordering::Relaxed);
        counters.slow_client_drops.fetch_add(44, Ordering::Relaxed);

        let rendered = counters.summary().render("20250601_120000");
        assert!(rendered.contains("session 20250601_120000 summary"));
        assert!(rendered.contains("emitted segments:      7"));
        assert!(rendered.contains("slow client drops:     44"));
    }
}
