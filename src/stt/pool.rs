//! Order-preserving parallel transcription pool.
//!
//! Workers draw segments from a bounded input channel and run the speech
//! engine concurrently; a single emitter drains a reorder buffer so events
//! leave in strict segment-id order. For every segment id the emitter sees
//! exactly one of an event or a skip marker, so it can never stall behind a
//! hallucinated or failed segment.

use crate::config::HallucinationConfig;
use crate::session::{Escalation, SessionCounters};
use crate::stt::engine::SpeechEngine;
use crate::stt::hallucination::HallucinationFilter;
use crate::stt::reorder::ReorderBuffer;
use crate::types::{Segment, TranscriptionEvent};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Handle to the running pool threads.
pub struct PoolHandle {
    workers: Vec<JoinHandle<()>>,
    emitter: Option<JoinHandle<()>>,
}

impl PoolHandle {
    /// Waits for all workers and the emitter to finish draining.
    pub fn join(mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.emitter.take() {
            let _ = handle.join();
        }
    }
}

/// The transcription pool stage.
pub struct TranscriptionPool {
    workers: usize,
    hallucination: HallucinationConfig,
}

impl TranscriptionPool {
    pub fn new(workers: usize, hallucination: HallucinationConfig) -> Self {
        assert!(workers > 0, "pool needs at least one worker");
        Self {
            workers,
            hallucination,
        }
    }

    /// Spawns workers and the emitter.
    ///
    /// Returns the bounded segment input (capacity `2 × workers`; the
    /// segmenter blocks here when the pool is saturated) and the join
    /// handle. Events leave through `event_tx` in id order.
    pub fn spawn(
        self,
        engine: Arc<dyn SpeechEngine>,
        event_tx: Sender<TranscriptionEvent>,
        counters: Arc<SessionCounters>,
        escalation: Sender<Escalation>,
    ) -> (Sender<Segment>, PoolHandle) {
        let (segment_tx, segment_rx) = bounded::<Segment>(self.workers * 2);
        let (done_tx, done_rx) = unbounded::<(u64, Option<TranscriptionEvent>)>();
        let filter = HallucinationFilter::new(self.hallucination);

        let mut workers = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let rx = segment_rx.clone();
            let tx = done_tx.clone();
            let engine = engine.clone();
            let filter = filter.clone();
            let counters = counters.clone();

            workers.push(thread::spawn(move || {
                worker_loop(worker_id, rx, tx, engine, filter, counters);
            }));
        }
        // Workers hold the only clones; the emitter sees disconnect once
        // they all drain and exit.
        drop(done_tx);
        drop(segment_rx);

        let emitter = thread::spawn(move || emitter_loop(done_rx, event_tx, escalation));

        (
            segment_tx,
            PoolHandle {
                workers,
                emitter: Some(emitter),
            },
        )
    }
}

fn worker_loop(
    worker_id: usize,
    segment_rx: Receiver<Segment>,
    done_tx: Sender<(u64, Option<TranscriptionEvent>)>,
    engine: Arc<dyn SpeechEngine>,
    filter: HallucinationFilter,
    counters: Arc<SessionCounters>,
) {
    while let Ok(segment) = segment_rx.recv() {
        let id = segment.id;
        let outcome = transcribe_with_retry(&*engine, &segment, &counters);

        let entry = match outcome {
            Some(tr) if tr.text.trim().is_empty() => {
                debug!(id, "model returned empty text, skipping");
                None
            }
            Some(tr) if filter.is_hallucination(&tr.text) => {
                counters
                    .rejected_hallucination
                    .fetch_add(1, Ordering::Relaxed);
                warn!(id, text = %tr.text, "hallucination rejected");
                None
            }
            Some(tr) => {
                debug!(id, language = %tr.language, "transcription ready");
                Some(TranscriptionEvent::from_transcription(
                    id,
                    segment.start_ts,
                    tr,
                ))
            }
            None => None,
        };

        if done_tx.send((id, entry)).is_err() {
            break;
        }
    }
    debug!(worker_id, "pool worker exited");
}

/// One retry with the same segment; a second failure yields a skip.
fn transcribe_with_retry(
    engine: &dyn SpeechEngine,
    segment: &Segment,
    counters: &SessionCounters,
) -> Option<crate::types::Transcription> {
    match engine.transcribe(&segment.pcm) {
        Ok(tr) => Some(tr),
        Err(first) => {
            warn!(id = segment.id, error = %first, "model error, retrying once");
            match engine.transcribe(&segment.pcm) {
                Ok(tr) => Some(tr),
                Err(second) => {
                    counters.model_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(id = segment.id, error = %second, "model failed twice, skipping id");
                    None
                }
            }
        }
    }
}

fn emitter_loop(
    done_rx: Receiver<(u64, Option<TranscriptionEvent>)>,
    event_tx: Sender<TranscriptionEvent>,
    escalation: Sender<Escalation>,
) {
    let mut reorder = ReorderBuffer::new(1);
    let mut emitted: u64 = 0;

    while let Ok((id, entry)) = done_rx.recv() {
        match entry {
            Some(event) => reorder.insert(id, event),
            None => reorder.skip(id),
        }
        for event in reorder.drain_ready() {
            if event_tx.send(event).is_err() {
                // Downstream is gone; the pipeline cannot continue.
                let _ = escalation.send(Escalation {
                    source: "pool",
                    message: "event channel closed downstream".to_string(),
                });
                return;
            }
            emitted += 1;
        }
    }
    info!(emitted, "pool emitter drained");
}
