use crate::transport::OutboundFrame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Keep-alive emitter owned by an open channel. It never checks for replies;
/// a dead peer surfaces through the transport's own close signaling.
/// Dropping the timer cancels it.
pub(crate) struct HeartbeatTimer {
    task: JoinHandle<()>,
}

impl HeartbeatTimer {
    pub(crate) fn start(
        outbound: mpsc::Sender<OutboundFrame>,
        period: Duration,
        message: String,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if outbound.send(OutboundFrame::Text(message.clone())).await.is_err() {
                    debug!("heartbeat_stopped: channel gone");
                    break;
                }
                trace!("heartbeat_sent");
            }
        });
        Self { task }
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::settle;

    #[tokio::test(start_paused = true)]
    async fn emits_on_each_period_after_the_first() {
        let (tx, mut rx) = mpsc::channel(8);
        let _timer = HeartbeatTimer::start(tx, Duration::from_secs(30), "ping".to_string());

        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some(OutboundFrame::Text("ping".to_string())));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some(OutboundFrame::Text("ping".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_timer_stops_emission() {
        let (tx, mut rx) = mpsc::channel(8);
        let timer = HeartbeatTimer::start(tx, Duration::from_secs(30), "ping".to_string());
        settle().await;
        drop(timer);
        settle().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
