use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{error, info};

use super::ConnectionStatusListener;

/// Tracks one connection's status and fans transitions out to listeners.
///
/// The status is updated before any listener runs, so a listener that asks
/// the monitor for [`current`](StatusMonitor::current) sees the new value.
/// A listener that panics is logged and skipped; the rest are still notified.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use audit_bus::status::{ConnectionStatus, ConnectionStatusListener, StatusMonitor};
///
/// struct Printer;
/// impl ConnectionStatusListener<ConnectionStatus> for Printer {
///     fn on_status_update(&self, old: ConnectionStatus, new: ConnectionStatus) {
///         println!("{:?} -> {:?}", old, new);
///     }
/// }
///
/// let monitor: StatusMonitor<ConnectionStatus> = StatusMonitor::new("broker");
/// monitor.register(Arc::new(Printer));
/// assert!(monitor.update(ConnectionStatus::Connected));
/// assert!(!monitor.update(ConnectionStatus::Connected));
/// ```
pub struct StatusMonitor<S> {
    name: String,
    current: Mutex<S>,
    listeners: RwLock<Vec<Arc<dyn ConnectionStatusListener<S>>>>,
    // Serializes transitions so listeners see them in order.
    transition: Mutex<()>,
}

impl<S> StatusMonitor<S>
where
    S: Copy + Eq + Debug + Default + Send + 'static,
{
    /// Create a monitor starting in the status type's default (unknown) state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: Mutex::new(S::default()),
            listeners: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> S {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn register(&self, listener: Arc<dyn ConnectionStatusListener<S>>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Feed an observed status into the monitor.
    ///
    /// Returns `true` when the status changed and listeners were notified.
    pub fn update(&self, status: S) -> bool {
        let _serial = self.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let old = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == status {
                return false;
            }
            std::mem::replace(&mut *current, status)
        };

        info!(monitor = %self.name, ?old, new = ?status, "connection status changed");

        for (index, listener) in self.snapshot().iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_status_update(old, status)));
            if outcome.is_err() {
                error!(
                    monitor = %self.name,
                    listener = index,
                    ?old,
                    new = ?status,
                    "status listener panicked; continuing with remaining listeners"
                );
            }
        }

        true
    }

    /// Feed a polled status into the monitor.
    ///
    /// A change is handled as by [`update`](Self::update). An unchanged
    /// status notifies nobody of a transition; listeners get
    /// [`on_status_confirmed`](ConnectionStatusListener::on_status_confirmed)
    /// instead. Returns `true` when the status changed.
    pub fn observe(&self, status: S) -> bool {
        if self.update(status) {
            return true;
        }

        let _serial = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current();
        if current != status {
            // Another signal changed the status since `update` looked.
            return false;
        }

        for (index, listener) in self.snapshot().iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_status_confirmed(current))).is_err() {
                error!(monitor = %self.name, listener = index, ?current, "status listener panicked on confirmation");
            }
        }
        false
    }

    fn snapshot(&self) -> Vec<Arc<dyn ConnectionStatusListener<S>>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a dropped connection reported by the client library.
    pub fn connection_lost(&self, down: S) -> bool {
        self.update(down)
    }
}
