//! End-to-end pipeline scenarios on mock collaborators.
//!
//! Each test drives a full session (capture → segmenter → pool →
//! translator → hub → persistence) with a scripted audio source, the
//! energy detector, and the mock engine. No audio hardware or network
//! services are required; translation tests run tiny local HTTP servers.

use livecap::audio::source::{FramePhase, MockAudioSource};
use livecap::config::{BackendConfig, Config, SourcePolicy};
use livecap::hub::protocol::{ByeReason, HubMessage};
use livecap::stt::engine::MockEngine;
use livecap::supervisor::Supervisor;
use livecap::types::TranscriptionEvent;
use livecap::vad::EnergyDetector;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FRAME: usize = 160; // 10ms at 16kHz

fn base_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.data_dir = dir.path().to_path_buf();
    config.audio.frame_size_ms = 10;
    config.hub.port = 0;
    config.status_interval_sec = 0;
    config
}

fn silence(seconds: f64) -> FramePhase {
    FramePhase {
        samples: vec![0i16; FRAME],
        count: (seconds * 100.0).round() as u32,
    }
}

fn speech(seconds: f64) -> FramePhase {
    FramePhase {
        samples: vec![9000i16; FRAME],
        count: (seconds * 100.0).round() as u32,
    }
}

/// Subscriber helper collecting every event it sees, whether replayed in
/// the history frame or delivered live, until the hub says goodbye.
struct Subscriber {
    reader: BufReader<TcpStream>,
}

impl Subscriber {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    fn collect_until_bye(mut self) -> (Vec<TranscriptionEvent>, Option<ByeReason>) {
        let mut events = Vec::new();
        let mut bye = None;
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match HubMessage::from_json(line.trim()) {
                Ok(HubMessage::History { events: replayed }) => events.extend(replayed),
                Ok(HubMessage::Event { event }) => events.push(event),
                Ok(HubMessage::Bye { reason }) => {
                    bye = Some(reason);
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        (events, bye)
    }
}

/// Minimal one-shot HTTP server for translation backend tests. Serves
/// `count` requests with a fixed status and body, then exits.
fn serve_http(status: u16, body: &'static str, count: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for _ in 0..count {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let reason = if status == 200 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    addr
}

fn backend(name: &str, addr: SocketAddr) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        endpoint: format!("http://{}/translate", addr),
        timeout_ms: 2000,
        rate_limit_per_sec: 100.0,
    }
}

#[test]
fn clean_utterance_produces_one_event() {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir);

    let source = MockAudioSource::new().with_frame_sequence(vec![
        silence(0.5),
        speech(2.0),
        silence(2.0),
    ]);
    let engine = MockEngine::new("test-model").with_response("the quick brown fox");

    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(engine),
        )
        .unwrap();

    let subscriber = Subscriber::connect(handle.hub_addr());

    std::thread::sleep(Duration::from_millis(500));
    let summary = handle.shutdown();
    let (events, bye) = subscriber.collect_until_bye();

    assert_eq!(summary.segments_emitted, 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 1);
    assert_eq!(events[0].text, "the quick brown fox");
    assert!(!events[0].text.is_empty());
    assert_eq!(bye, Some(ByeReason::Shutdown));
}

#[test]
fn too_short_blip_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.segmenter.vad_window_sec = 0.1;
    config.segmenter.pre_speech_pad_sec = 0.0;
    config.segmenter.post_speech_pad_sec = 0.0;

    let source = MockAudioSource::new().with_frame_sequence(vec![
        silence(0.5),
        speech(0.3),
        silence(2.0),
    ]);

    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(MockEngine::new("test-model")),
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(400));
    let summary = handle.shutdown();

    assert_eq!(summary.segments_emitted, 0);
    assert_eq!(summary.rejected_short, 1);
}

#[test]
fn hallucination_is_skipped_and_next_id_survives() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    // One worker keeps the scripted engine responses aligned with ids.
    config.pool.workers = 1;

    // Two utterances separated by closing silence.
    let source = MockAudioSource::new().with_frame_sequence(vec![
        speech(1.0),
        silence(2.0),
        speech(1.0),
        silence(2.0),
    ]);
    let engine = MockEngine::new("test-model");
    engine.push_response("check check check check", "en");
    engine.push_response("a real sentence", "en");

    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(engine),
        )
        .unwrap();
    let subscriber = Subscriber::connect(handle.hub_addr());

    std::thread::sleep(Duration::from_millis(700));
    let summary = handle.shutdown();
    let (events, _) = subscriber.collect_until_bye();

    assert_eq!(summary.rejected_hallucination, 1);
    assert_eq!(summary.segments_emitted, 2);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 2, "the pool skipped id 1, not renumbered");
    assert_eq!(events[0].text, "a real sentence");
}

#[test]
fn translation_falls_back_to_secondary_backend() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);

    let primary = serve_http(500, "{\"error\":\"overloaded\"}", 4);
    let secondary = serve_http(200, "{\"translatedText\":\"OL\u{c1}\"}", 4);
    config.translation.enabled = true;
    config.translation.source_policy = SourcePolicy::Detected;
    config.translation.target_language = "pt".to_string();
    config.translation.backends = vec![
        backend("remote_rest_primary", primary),
        backend("remote_rest_secondary", secondary),
    ];

    let source = MockAudioSource::new().with_frame_sequence(vec![
        speech(1.0),
        silence(2.0),
    ]);
    let engine = MockEngine::new("test-model").with_response("hello");

    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(engine),
        )
        .unwrap();
    let subscriber = Subscriber::connect(handle.hub_addr());

    std::thread::sleep(Duration::from_millis(800));
    let summary = handle.shutdown();
    let (events, _) = subscriber.collect_until_bye();

    assert_eq!(events.len(), 1);
    let translation = events[0].translation.as_ref().expect("translation expected");
    assert_eq!(translation.text, "OLÁ");
    assert_eq!(translation.language, "pt");
    assert_eq!(translation.backend, "remote_rest_secondary");
    assert_eq!(
        summary.translation_failed, 0,
        "a fallback success is not a failure"
    );
}

#[test]
fn all_backends_failing_passes_event_through() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);

    let broken = serve_http(503, "{}", 4);
    config.translation.enabled = true;
    config.translation.target_language = "pt".to_string();
    config.translation.backends = vec![backend("remote_rest_primary", broken)];

    let source = MockAudioSource::new().with_frame_sequence(vec![
        speech(1.0),
        silence(2.0),
    ]);

    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(MockEngine::new("test-model").with_response("hello there")),
        )
        .unwrap();
    let subscriber = Subscriber::connect(handle.hub_addr());

    std::thread::sleep(Duration::from_millis(800));
    let summary = handle.shutdown();
    let (events, _) = subscriber.collect_until_bye();

    assert_eq!(events.len(), 1);
    assert!(events[0].translation.is_none());
    assert_eq!(summary.translation_failed, 1);
}

#[test]
fn shutdown_drains_pending_work_and_combines_audio() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.persistence.keep_segments = true;

    let source = MockAudioSource::new().with_frame_sequence(vec![
        speech(1.0),
        silence(2.0),
        speech(1.0),
        silence(2.0),
        speech(1.0),
        silence(2.0),
    ]);

    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(MockEngine::new("test-model").with_response("draining")),
        )
        .unwrap();
    let session = handle.session().clone();
    let subscriber = Subscriber::connect(handle.hub_addr());

    std::thread::sleep(Duration::from_millis(900));
    let summary = handle.shutdown();
    let (events, bye) = subscriber.collect_until_bye();

    // Every enqueued segment produced an event before the session closed.
    assert_eq!(summary.segments_emitted, 3);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(bye, Some(ByeReason::Shutdown));

    // The combined recording equals the ordered concatenation of the
    // per-segment files.
    let mut expected = Vec::new();
    for id in 1..=3u64 {
        expected.extend(
            livecap::audio::wav::read_wav(
                &session.recordings_dir.join(format!("segment_{}.wav", id)),
            )
            .unwrap(),
        );
    }
    let combined = livecap::audio::wav::read_wav(&session.combined_recording_path()).unwrap();
    assert_eq!(combined, expected);

    // The transcript holds all three lines in order.
    let transcript = std::fs::read_to_string(
        session
            .transcripts_dir
            .join(format!("transcript_{}.txt", session.session_id)),
    )
    .unwrap();
    assert_eq!(transcript.lines().count(), 3);
    assert!(transcript.lines().all(|l| l == "[en] draining"));
}

#[test]
fn replaying_session_audio_reproduces_transcript() {
    // Run a session keeping its per-segment audio, then feed that audio
    // through a fresh pipeline and expect the same transcript lines.
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.persistence.keep_segments = true;

    let source = MockAudioSource::new().with_frame_sequence(vec![
        speech(1.0),
        silence(2.0),
    ]);
    let handle = Supervisor::new(config)
        .start(
            Box::new(source),
            Box::new(EnergyDetector::default()),
            Arc::new(MockEngine::new("test-model").with_response("replayed")),
        )
        .unwrap();
    let first_session = handle.session().clone();
    std::thread::sleep(Duration::from_millis(500));
    handle.shutdown();

    let recorded = livecap::audio::wav::read_wav(
        &first_session.recordings_dir.join("segment_1.wav"),
    )
    .unwrap();

    // Detached replay: the recorded segment becomes the captured stream.
    let replay_dir = TempDir::new().unwrap();
    let mut replay_config = base_config(&replay_dir);
    replay_config.persistence.keep_segments = true;
    let mut phases: Vec<FramePhase> = recorded
        .chunks(FRAME)
        .map(|chunk| {
            let mut samples = chunk.to_vec();
            samples.resize(FRAME, 0);
            FramePhase { samples, count: 1 }
        })
        .collect();
    phases.push(silence(2.0));

    let replay = Supervisor::new(replay_config)
        .start(
            Box::new(MockAudioSource::new().with_frame_sequence(phases)),
            Box::new(EnergyDetector::default()),
            Arc::new(MockEngine::new("test-model").with_response("replayed")),
        )
        .unwrap();
    let replay_session = replay.session().clone();
    std::thread::sleep(Duration::from_millis(500));
    replay.shutdown();

    let original = std::fs::read_to_string(
        first_session
            .transcripts_dir
            .join(format!("transcript_{}.txt", first_session.session_id)),
    )
    .unwrap();
    let replayed = std::fs::read_to_string(
        replay_session
            .transcripts_dir
            .join(format!("transcript_{}.txt", replay_session.session_id)),
    )
    .unwrap();
    assert_eq!(original, replayed);
    assert_eq!(original, "[en] replayed\n");
}
