//! Connection status tracking.
//!
//! A [`StatusMonitor`] holds the last known status of one connection and
//! notifies registered [`ConnectionStatusListener`]s, synchronously and in
//! registration order, whenever it changes. The monitor is generic over the
//! status type: the internal broker uses [`ConnectionStatus`], the external
//! bus uses [`crate::external::BusStatus`].
//!
//! Signals come from two places:
//! - callbacks from the client library (e.g. a dropped connection), fed through
//!   [`StatusMonitor::update`]
//! - a [`MonitorThread`] polling a [`HealthCheck`] at a fixed interval, fed
//!   through [`StatusMonitor::observe`]
//!
//! A poll that finds the status unchanged is not a transition, but listeners
//! still hear about it through
//! [`on_status_confirmed`](ConnectionStatusListener::on_status_confirmed).
//! That is where they repair state a transition would have fixed: a
//! connection that failed to open, or a transport replaced between two polls.

mod monitor;
mod thread;

use serde::{Deserialize, Serialize};

pub use monitor::StatusMonitor;
pub use thread::{MonitorStats, MonitorThread};

/// Status of the internal broker connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// No health signal observed yet.
    #[default]
    Unknown,
    Down,
    Connected,
}

/// Receives `(previous, current)` status pairs.
///
/// Called on the monitor's notifying thread. Keep the callback short or hand
/// work to another thread; later listeners wait for earlier ones.
pub trait ConnectionStatusListener<S>: Send + Sync {
    fn on_status_update(&self, old: S, new: S);

    /// A health poll found the status unchanged.
    fn on_status_confirmed(&self, _current: S) {}
}

/// Produces the current status of a connection when polled.
pub trait HealthCheck<S>: Send {
    fn check(&self) -> S;
}

impl<S, F> HealthCheck<S> for F
where
    F: Fn() -> S + Send,
{
    fn check(&self) -> S {
        self()
    }
}
