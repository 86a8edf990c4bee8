use crate::api::DashboardApi;
use chrono::{DateTime, Utc};
use jobdash_core::{is_any_online, online_count, roster_from_records, Roster};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Toggles `is_loading` and records failures in `error`.
    Loading,
    /// Background refresh; failures are only logged.
    Silent,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterView {
    pub agents: Roster,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl RosterView {
    pub fn online_count(&self) -> usize {
        online_count(self.agents.values())
    }

    pub fn is_any_online(&self) -> bool {
        is_any_online(self.agents.values())
    }
}

struct PollerInner {
    timer: Option<JoinHandle<()>>,
    // Results from a cadence that has since been stopped or replaced are dropped.
    generation: u64,
}

struct PollerShared {
    api: Arc<dyn DashboardApi>,
    inner: Mutex<PollerInner>,
    view: watch::Sender<RosterView>,
}

/// Keeps a roster of agents fresh by re-fetching it on a fixed cadence.
/// At most one cadence runs at a time.
#[derive(Clone)]
pub struct LivenessPoller {
    shared: Arc<PollerShared>,
}

impl LivenessPoller {
    pub fn new(api: Arc<dyn DashboardApi>) -> Self {
        let (view, _rx) = watch::channel(RosterView::default());
        Self {
            shared: Arc::new(PollerShared {
                api,
                inner: Mutex::new(PollerInner {
                    timer: None,
                    generation: 0,
                }),
                view,
            }),
        }
    }

    /// Replaces any running cadence: one loading fetch now, then a silent
    /// fetch every `interval`.
    pub fn start_polling(&self, interval: Duration) {
        let interval = if interval.is_zero() {
            warn!("poll_interval_clamped: zero interval");
            MIN_POLL_INTERVAL
        } else {
            interval
        };
        let mut inner = self.shared.lock();
        if let Some(previous) = inner.timer.take() {
            previous.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;
        self.shared.set_loading(false);
        let weak = Arc::downgrade(&self.shared);
        inner.timer = Some(tokio::spawn(run_cadence(weak, generation, interval)));
        info!("poll_started: interval_ms={}", interval.as_millis());
    }

    pub fn stop_polling(&self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
            info!("poll_stopped");
        }
        self.shared.set_loading(false);
    }

    pub fn is_polling(&self) -> bool {
        self.shared
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// One-off fetch outside the cadence. Applied only if no cadence change
    /// happened while it was in flight.
    pub async fn refresh(&self, mode: FetchMode) {
        let generation = self.shared.lock().generation;
        self.shared.fetch(generation, mode).await;
    }

    pub fn view(&self) -> RosterView {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RosterView> {
        self.shared.view.subscribe()
    }

    pub fn online_count(&self) -> usize {
        self.shared.view.borrow().online_count()
    }

    pub fn is_any_online(&self) -> bool {
        self.shared.view.borrow().is_any_online()
    }

    /// Stops polling and forgets the roster.
    pub fn reset(&self) {
        self.stop_polling();
        self.shared.view.send_replace(RosterView::default());
    }
}

impl PollerShared {
    fn lock(&self) -> MutexGuard<'_, PollerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_loading(&self, loading: bool) {
        self.view.send_if_modified(|view| {
            if view.is_loading == loading {
                false
            } else {
                view.is_loading = loading;
                true
            }
        });
    }

    async fn fetch(&self, generation: u64, mode: FetchMode) {
        if mode == FetchMode::Loading {
            if self.lock().generation != generation {
                return;
            }
            self.set_loading(true);
        }
        let result = self.api.agent_roster().await;

        let inner = self.lock();
        if inner.generation != generation {
            debug!("poll_result_discarded: generation={generation}");
            return;
        }
        match result {
            Ok(records) => {
                let agents = roster_from_records(records);
                debug!("poll_ok: agents={}", agents.len());
                self.view.send_modify(|view| {
                    view.agents = agents;
                    view.error = None;
                    view.last_fetched_at = Some(Utc::now());
                    if mode == FetchMode::Loading {
                        view.is_loading = false;
                    }
                });
            }
            Err(err) => match mode {
                FetchMode::Loading => {
                    warn!("poll_error: {err}");
                    self.view.send_modify(|view| {
                        view.error = Some(err.to_string());
                        view.is_loading = false;
                    });
                }
                FetchMode::Silent => {
                    debug!("poll_silent_error: {err}");
                }
            },
        }
        drop(inner);
    }
}

impl Drop for PollerShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }
}

async fn run_cadence(weak: Weak<PollerShared>, generation: u64, interval: Duration) {
    match weak.upgrade() {
        Some(shared) => shared.fetch(generation, FetchMode::Loading).await,
        None => return,
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        shared.fetch(generation, FetchMode::Silent).await;
    }
}
