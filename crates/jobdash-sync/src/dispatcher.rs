use crate::counter::UnreadCounter;
use chrono::{DateTime, Utc};
use jobdash_core::realtime::{decode_server_event, ServerEvent};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Routes decoded push frames into the unread counter and publishes the most
/// recent notification. No history is kept.
#[derive(Clone)]
pub struct NotificationDispatcher {
    counter: UnreadCounter,
    last: Arc<watch::Sender<Option<NotificationEvent>>>,
}

impl NotificationDispatcher {
    pub fn new(counter: UnreadCounter) -> Self {
        let (last, _rx) = watch::channel(None);
        Self {
            counter,
            last: Arc::new(last),
        }
    }

    /// Undecodable or unrecognized frames are logged and dropped.
    pub fn handle_frame(&self, raw: &str) {
        match decode_server_event(raw) {
            Ok(event) => self.dispatch(event),
            Err(err) => warn!("frame_dropped: {err}"),
        }
    }

    pub fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewNotification(payload) => {
                self.counter.increment();
                debug!("notification_received: unread={}", self.counter.value());
                self.last.send_replace(Some(NotificationEvent {
                    payload,
                    received_at: Utc::now(),
                }));
            }
        }
    }

    pub fn last_notification(&self) -> Option<NotificationEvent> {
        self.last.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NotificationEvent>> {
        self.last.subscribe()
    }

    pub fn clear_last(&self) {
        self.last.send_replace(None);
    }
}
