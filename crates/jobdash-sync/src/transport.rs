use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use jobdash_core::realtime::{CLOSE_ABNORMAL, CLOSE_NO_STATUS};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

const CHANNEL_QUEUE_CAPACITY: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Error(String),
    Closed { code: u16 },
}

/// Both ends of one live channel. Dropping `outbound` asks the transport to
/// close the socket; `inbound` ends after a `Closed` event.
pub struct ChannelIo {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<InboundEvent>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel connect failed: {0}")]
    Connect(String),
    #[error("invalid channel request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<ChannelIo, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    auth_token: Option<String>,
}

impl WsTransport {
    pub fn new(auth_token: Option<String>) -> Self {
        Self { auth_token }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url) -> Result<ChannelIo, TransportError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (ws, _) = connect_async(request)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        tokio::spawn(pump(ws, outbound_rx, inbound_tx));
        Ok(ChannelIo {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn pump(
    mut ws: WsStream,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    inbound: mpsc::Sender<InboundEvent>,
) {
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(InboundEvent::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_NO_STATUS);
                        // flushes the queued close reply
                        let _ = ws.flush().await;
                        let _ = inbound.send(InboundEvent::Closed { code }).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = inbound.send(InboundEvent::Error(err.to_string())).await;
                        let _ = inbound.send(InboundEvent::Closed { code: CLOSE_ABNORMAL }).await;
                        return;
                    }
                    None => {
                        let _ = inbound.send(InboundEvent::Closed { code: CLOSE_ABNORMAL }).await;
                        return;
                    }
                }
            }
            out = outbound.recv() => {
                match out {
                    Some(OutboundFrame::Text(text)) => {
                        if let Err(err) = ws.send(Message::Text(text)).await {
                            debug!("channel_send_error: {err}");
                        }
                    }
                    Some(OutboundFrame::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: Cow::Borrowed(""),
                        };
                        if let Err(err) = ws.close(Some(frame)).await {
                            debug!("channel_close_error: {err}");
                        }
                        break;
                    }
                    None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        }
    }

    // Local close: wait briefly for the peer's close reply, then drop the socket.
    let drained = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(msg) = ws.next().await {
            if msg.is_err() {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("channel_close_timeout");
    }
}
