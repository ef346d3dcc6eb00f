//! Broadcast hub: loopback socket fanning transcription events out to any
//! number of subscribers.
//!
//! The hub owns a dedicated thread running a tokio runtime. Events arrive
//! through an unbounded channel (the hub never back-pressures the
//! translator) and are fanned out to per-subscriber bounded queues; a
//! subscriber that cannot keep up first loses events, then loses the
//! connection after a grace window.

use crate::clock::Clock;
use crate::config::HubConfig;
use crate::error::{LivecapError, Result};
use crate::hub::protocol::{ByeReason, HubMessage};
use crate::session::SessionCounters;
use crate::types::TranscriptionEvent;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

struct Subscriber {
    queue: mpsc::Sender<HubMessage>,
    /// Set when the queue was ever observed full.
    slow_mark: bool,
    /// When the current full-queue streak began.
    slow_since: Option<std::time::Instant>,
    writer: tokio::task::JoinHandle<()>,
    reader: tokio::task::JoinHandle<()>,
}

struct HubState {
    subscribers: HashMap<u64, Subscriber>,
    history: VecDeque<TranscriptionEvent>,
    next_subscriber_id: u64,
}

type SharedState = Arc<Mutex<HubState>>;

/// The broadcast hub stage. Construct, then [`BroadcastHub::spawn`].
pub struct BroadcastHub {
    config: HubConfig,
    session_id: String,
    started_at: DateTime<Utc>,
    counters: Arc<SessionCounters>,
    clock: Arc<dyn Clock>,
}

/// Handle to the running hub.
pub struct HubHandle {
    event_tx: mpsc::UnboundedSender<TranscriptionEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl HubHandle {
    /// Enqueues an event for fan-out. Never blocks.
    pub fn send_event(&self, event: TranscriptionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Clonable sender feeding the fan-out loop; bridge threads use this.
    /// The hub stays alive as long as this handle exists, regardless of
    /// how many sender clones have been dropped.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<TranscriptionEvent> {
        self.event_tx.clone()
    }

    /// Address the hub is listening on (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends `bye` to every subscriber, drains their queues for up to the
    /// configured budget, then closes the socket.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl BroadcastHub {
    pub fn new(
        config: HubConfig,
        session_id: &str,
        started_at: DateTime<Utc>,
        counters: Arc<SessionCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            session_id: session_id.to_string(),
            started_at,
            counters,
            clock,
        }
    }

    /// Binds the listener and starts the accept loop on a dedicated
    /// runtime thread. Bind errors surface here, at startup.
    pub fn spawn(self) -> Result<HubHandle> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| LivecapError::HubSocket {
                message: format!("failed to build hub runtime: {}", e),
            })?;

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = runtime
            .block_on(TcpListener::bind(&bind_addr))
            .map_err(|e| LivecapError::HubSocket {
                message: format!("failed to bind {}: {}", bind_addr, e),
            })?;
        let local_addr = listener.local_addr().map_err(|e| LivecapError::HubSocket {
            message: format!("failed to read local address: {}", e),
        })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let state: SharedState = Arc::new(Mutex::new(HubState {
            subscribers: HashMap::new(),
            history: VecDeque::with_capacity(self.config.history_cap),
            next_subscriber_id: 1,
        }));

        info!(addr = %local_addr, "broadcast hub listening");
        let thread = std::thread::spawn(move || {
            runtime.block_on(accept_loop(self, listener, event_rx, shutdown_rx, state));
        });

        Ok(HubHandle {
            event_tx,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
            local_addr,
        })
    }
}

async fn accept_loop(
    hub: BroadcastHub,
    listener: TcpListener,
    mut event_rx: mpsc::UnboundedReceiver<TranscriptionEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    state: SharedState,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => handle_accept(&hub, stream, addr, &state),
                Err(e) => warn!(error = %e, "accept failed"),
            },
            maybe_event = event_rx.recv() => match maybe_event {
                Some(event) => dispatch_event(&hub, event, &state),
                // Every sender is gone; nothing further can arrive.
                None => break,
            },
            _ = &mut shutdown_rx => break,
        }
    }

    drop(listener);
    shutdown_subscribers(&hub, &state).await;
    info!("broadcast hub closed");
}

fn handle_accept(hub: &BroadcastHub, stream: TcpStream, addr: SocketAddr, state: &SharedState) {
    let mut st = state.lock().unwrap();
    if st.subscribers.len() >= hub.config.max_subscribers {
        warn!(%addr, "subscriber limit reached, refusing connection");
        drop(stream);
        return;
    }

    let id = st.next_subscriber_id;
    st.next_subscriber_id += 1;

    let (queue_tx, queue_rx) = mpsc::channel(hub.config.subscriber_queue);
    let hello = HubMessage::hello(&hub.session_id, hub.started_at);
    let history: Vec<TranscriptionEvent> = st.history.iter().cloned().collect();

    let (read_half, write_half) = stream.into_split();

    let writer_state = state.clone();
    let writer = tokio::spawn(writer_task(
        write_half,
        hello,
        history,
        queue_rx,
        writer_state,
        id,
    ));

    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        // Inbound frames are ignored; the read half exists to notice the
        // client going away.
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(_)) = lines.next_line().await {}
        remove_subscriber(&reader_state, id, true, false);
    });

    st.subscribers.insert(
        id,
        Subscriber {
            queue: queue_tx,
            slow_mark: false,
            slow_since: None,
            writer,
            reader,
        },
    );
    let total = st.subscribers.len();
    drop(st);

    hub.counters
        .subscribers_connected
        .fetch_add(1, Ordering::Relaxed);
    info!(subscriber = id, %addr, total, "subscriber connected");
    broadcast_status(state, true);
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    hello: HubMessage,
    history: Vec<TranscriptionEvent>,
    mut queue_rx: mpsc::Receiver<HubMessage>,
    state: SharedState,
    id: u64,
) {
    if write_message(&mut write_half, &hello).await.is_err() {
        remove_subscriber(&state, id, false, true);
        return;
    }
    let history_msg = HubMessage::History { events: history };
    if write_message(&mut write_half, &history_msg).await.is_err() {
        remove_subscriber(&state, id, false, true);
        return;
    }

    while let Some(msg) = queue_rx.recv().await {
        let is_bye = matches!(msg, HubMessage::Bye { .. });
        if write_message(&mut write_half, &msg).await.is_err() {
            break;
        }
        if is_bye {
            break;
        }
    }
    remove_subscriber(&state, id, false, true);
}

async fn write_message(write_half: &mut OwnedWriteHalf, msg: &HubMessage) -> std::io::Result<()> {
    let mut line = msg
        .to_json()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await
}

/// Fans one event out to every subscriber.
///
/// The subscriber map is snapshotted first so no lock is held while queues
/// are touched; slow-client accounting is applied under a second short
/// lock.
fn dispatch_event(hub: &BroadcastHub, event: TranscriptionEvent, state: &SharedState) {
    let msg = HubMessage::Event {
        event: event.clone(),
    };

    let targets: Vec<(u64, mpsc::Sender<HubMessage>)> = {
        let mut st = state.lock().unwrap();
        st.history.push_back(event);
        while st.history.len() > hub.config.history_cap {
            st.history.pop_front();
        }
        st.subscribers
            .iter()
            .map(|(&id, sub)| (id, sub.queue.clone()))
            .collect()
    };

    let mut full: Vec<u64> = Vec::new();
    let mut closed: Vec<u64> = Vec::new();
    let mut delivered: Vec<u64> = Vec::new();
    for (id, queue) in targets {
        match queue.try_send(msg.clone()) {
            Ok(()) => delivered.push(id),
            Err(mpsc::error::TrySendError::Full(_)) => full.push(id),
            Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
        }
    }

    let grace = Duration::from_secs(hub.config.slow_client_grace_sec);
    let now = hub.clock.now();
    let mut removed_any = false;
    {
        let mut st = state.lock().unwrap();
        for id in delivered {
            if let Some(sub) = st.subscribers.get_mut(&id) {
                sub.slow_since = None;
            }
        }
        for id in full {
            let expired = match st.subscribers.get_mut(&id) {
                Some(sub) => {
                    hub.counters
                        .slow_client_drops
                        .fetch_add(1, Ordering::Relaxed);
                    sub.slow_mark = true;
                    match sub.slow_since {
                        None => {
                            sub.slow_since = Some(now);
                            false
                        }
                        Some(since) => now.duration_since(since) > grace,
                    }
                }
                None => false,
            };
            if expired {
                warn!(subscriber = id, "slow client exceeded grace, disconnecting");
                if let Some(sub) = st.subscribers.remove(&id) {
                    sub.writer.abort();
                    sub.reader.abort();
                    removed_any = true;
                }
            }
        }
        for id in closed {
            if let Some(sub) = st.subscribers.remove(&id) {
                sub.writer.abort();
                sub.reader.abort();
                removed_any = true;
            }
        }
    }
    if removed_any {
        broadcast_status(state, false);
    }
}

/// Removes a subscriber from the map, aborting the requested peer task.
fn remove_subscriber(state: &SharedState, id: u64, abort_writer: bool, abort_reader: bool) {
    let removed = {
        let mut st = state.lock().unwrap();
        st.subscribers.remove(&id)
    };
    if let Some(sub) = removed {
        if abort_writer {
            sub.writer.abort();
        }
        if abort_reader {
            sub.reader.abort();
        }
        debug!(subscriber = id, "subscriber removed");
        broadcast_status(state, false);
    }
}

/// Best-effort churn notification; a full queue just misses it.
fn broadcast_status(state: &SharedState, connected: bool) {
    let (count, targets): (usize, Vec<mpsc::Sender<HubMessage>>) = {
        let st = state.lock().unwrap();
        (
            st.subscribers.len(),
            st.subscribers.values().map(|s| s.queue.clone()).collect(),
        )
    };
    let msg = HubMessage::Status {
        connected,
        subscribers: count,
    };
    for queue in targets {
        let _ = queue.try_send(msg.clone());
    }
}

/// Queues `bye` everywhere, lets writers drain within the budget, then
/// force-closes whatever is left.
async fn shutdown_subscribers(hub: &BroadcastHub, state: &SharedState) {
    let drained: Vec<(u64, Subscriber)> = {
        let mut st = state.lock().unwrap();
        for sub in st.subscribers.values() {
            let _ = sub.queue.try_send(HubMessage::Bye {
                reason: ByeReason::Shutdown,
            });
        }
        st.subscribers.drain().collect()
    };

    let budget = Duration::from_secs(hub.config.shutdown_drain_sec);
    for (id, sub) in drained {
        // Dropping the queue sender lets the writer drain naturally and
        // exit after the bye frame.
        let Subscriber {
            mut writer,
            reader,
            queue,
            ..
        } = sub;
        drop(queue);
        if tokio::time::timeout(budget, &mut writer).await.is_err() {
            debug!(subscriber = id, "drain budget exceeded, forcing close");
            writer.abort();
        }
        reader.abort();
    }
}
