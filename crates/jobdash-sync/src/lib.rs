//! Real-time sync core for the job dashboard: the push channel with its
//! heartbeat and reconnect policy, the unread counter it feeds, the agent
//! liveness poller, and the coordinator that binds them to a user session.

pub mod api;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod counter;
pub mod dispatcher;
mod heartbeat;
pub mod logging;
pub mod poller;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::{ApiError, DashboardApi, HttpDashboardApi};
pub use config::{ConfigError, SyncConfig};
pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use coordinator::SessionCoordinator;
pub use counter::UnreadCounter;
pub use dispatcher::{NotificationDispatcher, NotificationEvent};
pub use logging::init_logging;
pub use poller::{FetchMode, LivenessPoller, RosterView};
pub use transport::{
    ChannelIo, InboundEvent, OutboundFrame, Transport, TransportError, WsTransport,
};
