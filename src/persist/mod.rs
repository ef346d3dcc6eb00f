//! Durable, append-only session artifacts.
//!
//! A single writer thread receives independent copies of segments and
//! events, writes per-segment WAVs, appends transcript and translation
//! lines, and on shutdown concatenates the per-segment audio into one
//! session recording. Disk trouble is logged and counted; it never reaches
//! the live pipeline.

use crate::audio::wav;
use crate::error::{LivecapError, Result};
use crate::session::{SessionCounters, SessionState};
use crate::types::{Segment, TranscriptionEvent};
use crossbeam_channel::Receiver;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Handle to the persistence thread.
pub struct PersistenceHandle {
    join: Option<JoinHandle<()>>,
}

impl PersistenceHandle {
    /// Waits until every queued artifact is written and the combined
    /// recording exists.
    pub fn join(mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// The persistence stage.
pub struct Persistence {
    session: SessionState,
    counters: Arc<SessionCounters>,
}

impl Persistence {
    /// Creates the output directory tree. Failing here refuses startup.
    pub fn new(session: SessionState, counters: Arc<SessionCounters>) -> Result<Self> {
        for dir in [
            &session.data_dir,
            &session.recordings_dir,
            &session.transcripts_dir,
            &session.translations_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| LivecapError::Persistence {
                path: dir.display().to_string(),
                message: format!("failed to create directory: {}", e),
            })?;
        }
        Ok(Self { session, counters })
    }

    /// Spawns the writer thread. It drains both inputs and finalizes the
    /// session once both channels close.
    pub fn spawn(
        self,
        segment_rx: Receiver<Segment>,
        event_rx: Receiver<TranscriptionEvent>,
    ) -> PersistenceHandle {
        let join = thread::spawn(move || {
            let mut writer = Writer {
                session: self.session,
                counters: self.counters,
                written_segments: Vec::new(),
            };
            writer.run(segment_rx, event_rx);
        });
        PersistenceHandle { join: Some(join) }
    }
}

struct Writer {
    session: SessionState,
    counters: Arc<SessionCounters>,
    written_segments: Vec<u64>,
}

impl Writer {
    fn run(&mut self, segment_rx: Receiver<Segment>, event_rx: Receiver<TranscriptionEvent>) {
        let never_segments = crossbeam_channel::never::<Segment>();
        let never_events = crossbeam_channel::never::<TranscriptionEvent>();
        let mut segments_open = true;
        let mut events_open = true;

        while segments_open || events_open {
            // A closed input is swapped for a never-ready channel so the
            // loop keeps draining the other without spinning.
            let segments = if segments_open { &segment_rx } else { &never_segments };
            let events = if events_open { &event_rx } else { &never_events };
            crossbeam_channel::select! {
                recv(segments) -> msg => match msg {
                    Ok(segment) => self.write_segment(&segment),
                    Err(_) => segments_open = false,
                },
                recv(events) -> msg => match msg {
                    Ok(event) => self.write_event(&event),
                    Err(_) => events_open = false,
                },
            }
        }

        self.finalize();
    }

    fn record_error(&self, err: &LivecapError) {
        self.counters
            .persistence_errors
            .fetch_add(1, Ordering::Relaxed);
        error!(error = %err, "persistence error");
    }

    fn segment_path(&self, id: u64) -> PathBuf {
        self.session
            .recordings_dir
            .join(format!("segment_{}.wav", id))
    }

    fn write_segment(&mut self, segment: &Segment) {
        let path = self.segment_path(segment.id);
        match wav::write_wav(&path, &segment.pcm, self.session.config.audio.sample_rate) {
            Ok(()) => self.written_segments.push(segment.id),
            Err(e) => self.record_error(&e),
        }
    }

    fn write_event(&mut self, event: &TranscriptionEvent) {
        let transcript_path = self
            .session
            .transcripts_dir
            .join(format!("transcript_{}.txt", self.session.session_id));
        let line = format!("[{}] {}\n", event.language, event.text);
        if let Err(e) = append_line(&transcript_path, &line) {
            self.record_error(&e);
        }

        if let Some(translation) = &event.translation {
            let translation_path = self
                .session
                .translations_dir
                .join(format!("translation_{}.txt", self.session.session_id));
            let block = format!(
                "[{}] {}\n[{}] {}\n\n",
                event.language, event.text, translation.language, translation.text
            );
            if let Err(e) = append_line(&translation_path, &block) {
                self.record_error(&e);
            }
        }
    }

    /// Combines per-segment audio in id order, then removes the segment
    /// files unless configured to keep them.
    fn finalize(&mut self) {
        if self.written_segments.is_empty() {
            info!("no segments persisted, skipping combined recording");
            return;
        }

        self.written_segments.sort_unstable();
        let inputs: Vec<PathBuf> = self
            .written_segments
            .iter()
            .map(|&id| self.segment_path(id))
            .collect();
        let output = self.session.combined_recording_path();

        match wav::combine_wavs(&inputs, &output, self.session.config.audio.sample_rate) {
            Ok(samples) => {
                info!(path = %output.display(), samples, "combined recording written");
                if !self.session.config.persistence.keep_segments {
                    for input in &inputs {
                        if let Err(e) = std::fs::remove_file(input) {
                            warn!(path = %input.display(), error = %e, "failed to remove segment");
                        }
                    }
                }
            }
            Err(e) => self.record_error(&e),
        }
    }
}

/// Append with a write-then-flush discipline; a crash mid-append may leave
/// a truncated last line, which readers tolerate.
fn append_line(path: &PathBuf, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LivecapError::Persistence {
            path: path.display().to_string(),
            message: format!("failed to open for append: {}", e),
        })?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| LivecapError::Persistence {
            path: path.display().to_string(),
            message: format!("failed to append: {}", e),
        })
}
