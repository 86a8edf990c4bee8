use crate::api::{ApiError, DashboardApi, HttpDashboardApi};
use crate::config::SyncConfig;
use crate::connection::{Connection, ConnectionSettings, ConnectionState};
use crate::counter::UnreadCounter;
use crate::dispatcher::NotificationDispatcher;
use crate::poller::LivenessPoller;
use crate::transport::{Transport, WsTransport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct SessionSlot {
    active: bool,
    hydration: Option<JoinHandle<()>>,
    // Distinguishes sessions so a slow hydration from an ended session is ignored.
    epoch: u64,
}

struct CoordinatorShared {
    config: SyncConfig,
    api: Arc<dyn DashboardApi>,
    counter: UnreadCounter,
    dispatcher: NotificationDispatcher,
    connection: Connection,
    poller: LivenessPoller,
    session: Mutex<SessionSlot>,
}

/// Ties the sync components to the authenticated session. One per process;
/// the components it owns are never constructed twice.
#[derive(Clone)]
pub struct SessionCoordinator {
    shared: Arc<CoordinatorShared>,
}

impl SessionCoordinator {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn DashboardApi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let counter = UnreadCounter::new();
        let dispatcher = NotificationDispatcher::new(counter.clone());
        let connection = Connection::new(
            ConnectionSettings::from_config(&config),
            transport,
            dispatcher.clone(),
        );
        let poller = LivenessPoller::new(api.clone());
        Self {
            shared: Arc::new(CoordinatorShared {
                config,
                api,
                counter,
                dispatcher,
                connection,
                poller,
                session: Mutex::new(SessionSlot {
                    active: false,
                    hydration: None,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Wires the HTTP client and websocket transport from `config`.
    pub fn from_config(config: SyncConfig) -> Result<Self, ApiError> {
        let api = Arc::new(HttpDashboardApi::new(&config)?);
        let transport = Arc::new(WsTransport::new(config.auth_token.clone()));
        Ok(Self::new(config, api, transport))
    }

    /// Hydrates the unread count, opens the push channel and starts the
    /// roster cadence. Calling it again while active re-hydrates and restarts
    /// the cadence but never opens a second channel.
    pub fn start_session(&self) {
        let epoch = {
            let mut slot = self.shared.lock_session();
            slot.active = true;
            slot.epoch += 1;
            if let Some(previous) = slot.hydration.take() {
                previous.abort();
            }
            let epoch = slot.epoch;
            let shared = self.shared.clone();
            slot.hydration = Some(tokio::spawn(async move {
                shared.hydrate_unread(epoch).await;
            }));
            epoch
        };
        info!("session_started: epoch={epoch}");
        self.shared.connection.connect();
        self.shared
            .poller
            .start_polling(self.shared.config.poll_interval);
    }

    /// Tears down everything `start_session` started and zeroes per-user state.
    /// A channel attempt still connecting is left to finish; use `dispose`
    /// to abandon it.
    pub fn end_session(&self) {
        let was_active = {
            let mut slot = self.shared.lock_session();
            if let Some(hydration) = slot.hydration.take() {
                hydration.abort();
            }
            slot.epoch += 1;
            std::mem::replace(&mut slot.active, false)
        };
        if self.shared.connection.state() == ConnectionState::Connecting {
            debug!("session_end_with_connect_in_flight");
        }
        self.shared.connection.disconnect();
        self.shared.poller.stop_polling();
        self.shared.poller.reset();
        self.shared.counter.clear();
        self.shared.dispatcher.clear_last();
        if was_active {
            info!("session_ended");
        } else {
            debug!("session_end_noop");
        }
    }

    /// Re-reads the unread snapshot and overwrites the counter with it.
    pub async fn refresh_unread(&self) -> Result<u64, ApiError> {
        let epoch = self.shared.lock_session().epoch;
        let items = self.shared.api.unread_notifications().await?;
        let count = items.len() as u64;
        let slot = self.shared.lock_session();
        if slot.active && slot.epoch == epoch {
            self.shared.counter.hydrate(count);
        }
        Ok(count)
    }

    pub fn mark_one_read(&self) {
        self.shared.counter.decrement_one();
    }

    pub fn mark_all_read(&self) {
        self.shared.counter.clear();
    }

    /// Starts and ends sessions as the authentication flag flips. The
    /// current value is applied immediately; a dropped sender ends the
    /// session.
    pub fn follow_auth(&self, mut auth: watch::Receiver<bool>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut current = *auth.borrow_and_update();
            coordinator.apply_auth(current);
            while auth.changed().await.is_ok() {
                let next = *auth.borrow_and_update();
                if next == current {
                    continue;
                }
                current = next;
                coordinator.apply_auth(current);
            }
            debug!("auth_watch_closed");
            coordinator.end_session();
        })
    }

    /// Ends the session and abandons any in-flight channel attempt.
    pub fn dispose(&self) {
        self.end_session();
        self.shared.connection.shutdown();
    }

    pub fn is_session_active(&self) -> bool {
        self.shared.lock_session().active
    }

    pub fn counter(&self) -> &UnreadCounter {
        &self.shared.counter
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.shared.dispatcher
    }

    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    pub fn poller(&self) -> &LivenessPoller {
        &self.shared.poller
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    fn apply_auth(&self, authenticated: bool) {
        if authenticated {
            self.start_session();
        } else {
            self.end_session();
        }
    }
}

impl CoordinatorShared {
    fn lock_session(&self) -> MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn hydrate_unread(&self, epoch: u64) {
        match self.api.unread_notifications().await {
            Ok(items) => {
                let slot = self.lock_session();
                if slot.active && slot.epoch == epoch {
                    self.counter.hydrate(items.len() as u64);
                    debug!("unread_hydrated: count={}", items.len());
                }
            }
            Err(err) => warn!("unread_hydrate_error: {err}"),
        }
    }
}
