use crate::api::{ApiError, DashboardApi};
use crate::transport::{ChannelIo, InboundEvent, OutboundFrame, Transport, TransportError};
use async_trait::async_trait;
use jobdash_core::AgentRecord;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Notify};
use url::Url;

/// Lets spawned tasks run until they park again.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Server side of one mocked channel. Dropping it looks like the socket
/// vanishing without a close frame.
pub(crate) struct MockPeer {
    pub(crate) inbound: mpsc::Sender<InboundEvent>,
    pub(crate) outbound: mpsc::Receiver<OutboundFrame>,
}

impl MockPeer {
    pub(crate) async fn push_text(&self, text: &str) {
        let _ = self.inbound.send(InboundEvent::Text(text.to_string())).await;
        settle().await;
    }

    pub(crate) async fn push_error(&self, message: &str) {
        let _ = self
            .inbound
            .send(InboundEvent::Error(message.to_string()))
            .await;
        settle().await;
    }

    pub(crate) async fn close(&self, code: u16) {
        let _ = self.inbound.send(InboundEvent::Closed { code }).await;
        settle().await;
    }
}

pub(crate) struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    opens: AtomicUsize,
    fail_next: AtomicBool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers,
            opens: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            gate: Mutex::new(None),
        });
        (transport, rx)
    }

    /// Holds the next `open` until the returned sender fires.
    pub(crate) fn gate_next_open(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().expect("gate lock") = Some(rx);
        tx
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &Url) -> Result<ChannelIo, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().expect("gate lock").take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let _ = self.peers.send(MockPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        });
        Ok(ChannelIo {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[derive(Default)]
pub(crate) struct MockApi {
    roster: Mutex<Vec<AgentRecord>>,
    unread: Mutex<Vec<Value>>,
    fail_roster: AtomicBool,
    fail_unread: AtomicBool,
    roster_calls: AtomicUsize,
    unread_calls: AtomicUsize,
    hold: AtomicBool,
    released: Notify,
}

impl MockApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_roster(&self, records: Vec<AgentRecord>) {
        *self.roster.lock().expect("roster lock") = records;
    }

    pub(crate) fn fail_roster(&self, fail: bool) {
        self.fail_roster.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_unread(&self, count: usize) {
        *self.unread.lock().expect("unread lock") =
            (0..count).map(|id| json!({ "id": id })).collect();
    }

    pub(crate) fn fail_unread(&self, fail: bool) {
        self.fail_unread.store(fail, Ordering::SeqCst);
    }

    /// Parks every request until `release_responses`. The response is
    /// captured when the request arrives.
    pub(crate) fn hold_responses(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_responses(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn wait_for_release(&self) {
        loop {
            let released = self.released.notified();
            if !self.hold.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    pub(crate) fn roster_calls(&self) -> usize {
        self.roster_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn unread_calls(&self) -> usize {
        self.unread_calls.load(Ordering::SeqCst)
    }
}

fn unavailable() -> ApiError {
    ApiError::UnexpectedStatus {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "upstream unavailable".to_string(),
    }
}

#[async_trait]
impl DashboardApi for MockApi {
    async fn unread_notifications(&self) -> Result<Vec<Value>, ApiError> {
        self.unread_calls.fetch_add(1, Ordering::SeqCst);
        let response = if self.fail_unread.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(self.unread.lock().expect("unread lock").clone())
        };
        self.wait_for_release().await;
        response
    }

    async fn agent_roster(&self) -> Result<Vec<AgentRecord>, ApiError> {
        self.roster_calls.fetch_add(1, Ordering::SeqCst);
        let response = if self.fail_roster.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(self.roster.lock().expect("roster lock").clone())
        };
        self.wait_for_release().await;
        response
    }
}
