//! Supervisor: lifecycle owner of one capture-to-broadcast session.
//!
//! Builds the session state, wires every stage with bounded channels, and
//! owns the shutdown order: capture stops first, then each stage drains
//! into the next, the hub says goodbye, and persistence writes the
//! combined recording before the summary is reported.

use crate::audio::capture::{CaptureConfig, CaptureHandle, CaptureStage};
use crate::audio::ring::FrameRing;
use crate::audio::source::AudioSource;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::hub::server::{BroadcastHub, HubHandle};
use crate::persist::{Persistence, PersistenceHandle};
use crate::segmenter::{Segmenter, SegmenterHandle};
use crate::session::{Escalation, SessionCounters, SessionState, SessionSummary};
use crate::stt::engine::SpeechEngine;
use crate::stt::pool::{PoolHandle, TranscriptionPool};
use crate::translate::{Translator, TranslatorHandle, spawn_translator};
use crate::vad::VoiceDetector;
use chrono::Utc;
use crossbeam_channel::{Receiver, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

/// The supervisor. Construct with configuration and the three external
/// collaborators (device source, voice detector, speech engine), then
/// [`Supervisor::start`].
pub struct Supervisor {
    config: Config,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Validates configuration, opens the session, and starts every stage.
    /// Capture starts last so nothing is ever dropped on the floor.
    pub fn start(
        self,
        source: Box<dyn AudioSource>,
        detector: Box<dyn VoiceDetector>,
        engine: Arc<dyn SpeechEngine>,
    ) -> Result<SupervisorHandle> {
        self.config.validate()?;

        let session = SessionState::new(self.config.clone(), Utc::now());
        let counters = Arc::new(SessionCounters::new());
        let running = Arc::new(AtomicBool::new(true));
        let clock = Arc::new(SystemClock);
        let (escalation_tx, escalation_rx) = unbounded::<Escalation>();

        info!(session = %session.session_id, "starting session");

        // Persistence first: if the output tree cannot be created, the
        // session refuses to start.
        let persistence = Persistence::new(session.clone(), counters.clone())?;
        let (segment_persist_tx, segment_persist_rx) = unbounded();
        let (event_persist_tx, event_persist_rx) = unbounded();
        let persistence = persistence.spawn(segment_persist_rx, event_persist_rx);

        // Hub next, so subscribers can connect before the first utterance.
        let hub = BroadcastHub::new(
            self.config.hub.clone(),
            &session.session_id,
            session.started_at,
            counters.clone(),
            clock.clone(),
        )
        .spawn()?;

        // Bridge from the synchronous pipeline into the hub's runtime.
        let (hub_tx, hub_rx) = unbounded();
        let hub_event_tx = hub.event_sender();
        let bridge = std::thread::spawn(move || {
            while let Ok(event) = hub_rx.recv() {
                if hub_event_tx.send(event).is_err() {
                    break;
                }
            }
        });

        let translator =
            Translator::from_config(&self.config.translation, counters.clone(), clock.clone())?;
        let (event_tx, event_rx) = unbounded();
        let translator = spawn_translator(translator, event_rx, vec![hub_tx, event_persist_tx]);

        let (segment_tx, pool) = TranscriptionPool::new(
            self.config.pool.workers,
            self.config.pool.hallucination.clone(),
        )
        .spawn(engine, event_tx, counters.clone(), escalation_tx.clone());

        let ring_frames = ring_capacity_frames(&self.config);
        let ring = Arc::new(FrameRing::new(ring_frames));

        let segmenter = Segmenter::new(
            self.config.segmenter.clone(),
            self.config.audio.sample_rate,
            self.config.audio.frame_size_ms,
            session.started_at,
        )
        .spawn(
            detector,
            ring.clone(),
            segment_tx,
            segment_persist_tx,
            counters.clone(),
            running.clone(),
            escalation_tx.clone(),
        );

        let capture = CaptureStage::new(CaptureConfig {
            sample_rate: self.config.audio.sample_rate,
            frame_size_ms: self.config.audio.frame_size_ms,
            poll_interval: Duration::from_millis(10),
        })
        .spawn(
            source,
            ring,
            counters.clone(),
            running.clone(),
            escalation_tx,
        )?;

        let status = spawn_status_loop(
            self.config.status_interval_sec,
            counters.clone(),
            running.clone(),
        );

        Ok(SupervisorHandle {
            hub_addr: hub.local_addr(),
            session,
            counters,
            running,
            escalation_rx,
            capture,
            segmenter,
            pool,
            translator,
            bridge: Some(bridge),
            hub: Some(hub),
            persistence,
            status,
        })
    }
}

fn ring_capacity_frames(config: &Config) -> usize {
    defaults::frames_for_duration(
        config.audio.ring_capacity_sec,
        config.audio.sample_rate,
        config.audio.frame_size_ms,
    )
    .max(1)
}

/// Periodic status line, the session's heartbeat in the log.
fn spawn_status_loop(
    interval_sec: u64,
    counters: Arc<SessionCounters>,
    running: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    if interval_sec == 0 {
        return None;
    }
    Some(std::thread::spawn(move || {
        let mut elapsed = 0u64;
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(1));
            elapsed += 1;
            if elapsed >= interval_sec {
                elapsed = 0;
                let s = counters.summary();
                info!(
                    frames = s.frames_captured,
                    segments = s.segments_emitted,
                    subscribers = s.subscribers_connected,
                    slow_drops = s.slow_client_drops,
                    "session status"
                );
            }
        }
    }))
}

/// Handle to a running session.
pub struct SupervisorHandle {
    hub_addr: std::net::SocketAddr,
    session: SessionState,
    counters: Arc<SessionCounters>,
    running: Arc<AtomicBool>,
    escalation_rx: Receiver<Escalation>,
    capture: CaptureHandle,
    segmenter: SegmenterHandle,
    pool: PoolHandle,
    translator: TranslatorHandle,
    bridge: Option<JoinHandle<()>>,
    hub: Option<HubHandle>,
    persistence: PersistenceHandle,
    status: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Cancellation token shared with every stage; external signal handlers
    /// clear it to request shutdown.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Session identity, for logs and tests.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Address the hub actually bound (differs from the configured port
    /// when it was 0).
    pub fn hub_addr(&self) -> std::net::SocketAddr {
        self.hub_addr
    }

    /// Blocks until a stage escalates a fatal condition or the cancel flag
    /// clears. Either way the pipeline should be shut down afterwards.
    pub fn wait(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            match self.escalation_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(escalation) => {
                    error!(
                        source = escalation.source,
                        message = %escalation.message,
                        "fatal condition escalated, shutting down"
                    );
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Orderly shutdown: capture first, then each stage drains into the
    /// next, the hub closes its subscribers, persistence finalizes, and the
    /// summary is printed to stdout.
    pub fn shutdown(mut self) -> SessionSummary {
        info!(session = %self.session.session_id, "shutting down session");
        self.running.store(false, Ordering::SeqCst);

        // Capture exits and closes the ring; the segmenter drains it into a
        // final segment and drops the pool input; the pool drains what was
        // enqueued; the translator drains what was emitted.
        self.capture.join();
        self.segmenter.join();
        self.pool.join();
        self.translator.join();

        // The translator dropped the hub bridge input, so the bridge ends,
        // and the hub can say goodbye.
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.join();
        }
        if let Some(hub) = self.hub.take() {
            hub.shutdown();
        }

        // Both persistence inputs are closed by now; wait for the combined
        // recording.
        self.persistence.join();

        if let Some(status) = self.status.take() {
            let _ = status.join();
        }

        let summary = self.counters.summary();
        // Contract: the session summary goes to standard output.
        println!("{}", summary.render(&self.session.session_id));
        summary
    }
}
