use crate::config::SyncConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::heartbeat::HeartbeatTimer;
use crate::transport::{ChannelIo, InboundEvent, OutboundFrame, Transport};
use jobdash_core::realtime::{is_heartbeat_reply, is_normal_close, CLOSE_ABNORMAL, CLOSE_NORMAL};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: Url,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub heartbeat_ping: String,
    pub heartbeat_pong: String,
}

impl ConnectionSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            url: config.channel_url.clone(),
            heartbeat_interval: config.heartbeat_interval,
            reconnect_delay: config.reconnect_delay,
            heartbeat_ping: config.heartbeat_ping.clone(),
            heartbeat_pong: config.heartbeat_pong.clone(),
        }
    }
}

// The heartbeat lives inside `Open`; any transition away drops (and stops) it.
enum Phase {
    Idle,
    Connecting,
    Open {
        outbound: mpsc::Sender<OutboundFrame>,
        _heartbeat: HeartbeatTimer,
    },
    Closing,
    Closed,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Open { .. } => ConnectionState::Open,
            Phase::Closing => ConnectionState::Closing,
            Phase::Closed => ConnectionState::Closed,
        }
    }
}

struct Inner {
    phase: Phase,
    // Bumped on every attempt and every local teardown; events carrying an
    // older generation belong to a socket nobody owns any more.
    generation: u64,
    attempt: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Shared {
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    dispatcher: NotificationDispatcher,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

/// The single push channel of a process. All mutation goes through
/// `connect`, `disconnect`, `shutdown` and the socket's own completion
/// handlers. Must be driven from inside a tokio runtime.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(
        mut settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        settings.heartbeat_interval = settings.heartbeat_interval.max(MIN_TIMER_PERIOD);
        let (state_tx, _rx) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                settings,
                transport,
                dispatcher,
                inner: Mutex::new(Inner {
                    phase: Phase::Idle,
                    generation: 0,
                    attempt: None,
                    reconnect: None,
                }),
                state_tx,
            }),
        }
    }

    /// No-op while connecting or open.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Closes an open channel with a normal code. A connect still in flight
    /// is left alone and will open normally. Also cancels a pending
    /// reconnect so a torn-down session never reopens the channel.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Cancels everything, including an in-flight attempt.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().phase.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, next: Phase) {
        let from = inner.phase.state();
        let to = next.state();
        inner.phase = next;
        if from != to {
            debug!("channel_state: {from} -> {to}");
        }
        self.state_tx.send_if_modified(|current| {
            if *current == to {
                false
            } else {
                *current = to;
                true
            }
        });
    }

    fn connect(self: &Arc<Self>) {
        let mut inner = self.lock();
        self.connect_locked(&mut inner);
    }

    fn connect_locked(self: &Arc<Self>, inner: &mut Inner) {
        match inner.phase {
            Phase::Connecting | Phase::Open { .. } => {
                debug!("channel_connect_skipped: state={}", inner.phase.state());
                return;
            }
            Phase::Idle | Phase::Closing | Phase::Closed => {}
        }
        if let Some(pending) = inner.reconnect.take() {
            pending.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;
        self.transition(inner, Phase::Connecting);
        info!("channel_connecting: url={}", self.settings.url);
        let weak = Arc::downgrade(self);
        inner.attempt = Some(tokio::spawn(run_attempt(weak, generation)));
    }

    fn disconnect(&self) {
        let mut inner = self.lock();
        if let Some(pending) = inner.reconnect.take() {
            pending.abort();
            // a reconnect task already past its sleep must see a new generation
            inner.generation += 1;
            debug!("channel_reconnect_cancelled");
        }
        let outbound = match &inner.phase {
            Phase::Connecting => {
                debug!("channel_disconnect_deferred: connect in flight");
                return;
            }
            Phase::Open { outbound, .. } => outbound.clone(),
            Phase::Idle | Phase::Closing | Phase::Closed => return,
        };
        inner.generation += 1;
        self.transition(&mut inner, Phase::Closing);
        if let Err(err) = outbound.try_send(OutboundFrame::Close(CLOSE_NORMAL)) {
            warn!("channel_close_send_error: {err}");
        }
        drop(outbound);
        self.transition(&mut inner, Phase::Closed);
        info!("channel_disconnected");
    }

    fn shutdown(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(pending) = inner.reconnect.take() {
            pending.abort();
        }
        if let Some(attempt) = inner.attempt.take() {
            attempt.abort();
        }
        if let Phase::Open { outbound, .. } = &inner.phase {
            let _ = outbound.try_send(OutboundFrame::Close(CLOSE_NORMAL));
        }
        if !matches!(inner.phase, Phase::Idle | Phase::Closed) {
            self.transition(&mut inner, Phase::Closed);
        }
        debug!("channel_shutdown");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn handle_open(&self, generation: u64, outbound: mpsc::Sender<OutboundFrame>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || !matches!(inner.phase, Phase::Connecting) {
            return false;
        }
        let heartbeat = HeartbeatTimer::start(
            outbound.clone(),
            self.settings.heartbeat_interval,
            self.settings.heartbeat_ping.clone(),
        );
        self.transition(
            &mut inner,
            Phase::Open {
                outbound,
                _heartbeat: heartbeat,
            },
        );
        info!("channel_open: url={}", self.settings.url);
        true
    }

    fn handle_text(&self, text: &str) {
        if is_heartbeat_reply(text, &self.settings.heartbeat_pong) {
            return;
        }
        self.dispatcher.handle_frame(text);
    }

    fn handle_transport_error(&self, message: &str) {
        if self.lock().phase.state() != ConnectionState::Closed {
            warn!("channel_transport_error: {message}");
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        self.transition(&mut inner, Phase::Closed);
        if is_normal_close(code) {
            info!("channel_closed: code={code}");
            return;
        }
        warn!(
            "channel_closed_abnormally: code={code}; reconnecting in {}ms",
            self.settings.reconnect_delay.as_millis()
        );
        self.schedule_reconnect(&mut inner);
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) {
        if let Some(previous) = inner.reconnect.take() {
            previous.abort();
        }
        let weak = Arc::downgrade(self);
        let delay = self.settings.reconnect_delay;
        let scheduled_at = inner.generation;
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.reconnect_due(scheduled_at);
            }
        }));
    }

    fn reconnect_due(self: &Arc<Self>, scheduled_at: u64) {
        let mut inner = self.lock();
        if inner.generation != scheduled_at || inner.reconnect.is_none() {
            debug!("channel_reconnect_skipped: cancelled");
            return;
        }
        // runs on the reconnect task itself, so the handle is dropped, not aborted
        inner.reconnect = None;
        debug!("channel_reconnect_due");
        self.connect_locked(&mut inner);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = inner.reconnect.take() {
            pending.abort();
        }
        if let Some(attempt) = inner.attempt.take() {
            attempt.abort();
        }
    }
}

async fn run_attempt(weak: Weak<Shared>, generation: u64) {
    let (transport, url) = match weak.upgrade() {
        Some(shared) => (shared.transport.clone(), shared.settings.url.clone()),
        None => return,
    };
    let opened = transport.open(&url).await;
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let ChannelIo {
        outbound,
        mut inbound,
    } = match opened {
        Ok(io) => io,
        Err(err) => {
            warn!("channel_connect_error: {err}");
            shared.handle_close(generation, CLOSE_ABNORMAL);
            return;
        }
    };
    if !shared.handle_open(generation, outbound) {
        debug!("channel_open_discarded: generation={generation}");
        return;
    }
    drop(shared);

    while let Some(event) = inbound.recv().await {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if !shared.is_current(generation) {
            return;
        }
        match event {
            InboundEvent::Text(text) => shared.handle_text(&text),
            InboundEvent::Error(message) => shared.handle_transport_error(&message),
            InboundEvent::Closed { code } => {
                shared.handle_close(generation, code);
                return;
            }
        }
    }
    if let Some(shared) = weak.upgrade() {
        shared.handle_close(generation, CLOSE_ABNORMAL);
    }
}
