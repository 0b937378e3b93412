//! Background health-check polling for a [`StatusMonitor`].

use std::fmt::Debug;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use super::{HealthCheck, StatusMonitor};

/// Statistics from the monitor thread.
#[derive(Debug, Default, Clone)]
pub struct MonitorStats {
    pub polls: usize,
    pub transitions: usize,
}

/// A background thread that polls a [`HealthCheck`] and feeds the result into
/// a [`StatusMonitor`].
///
/// The first poll happens immediately so listeners leave the unknown state as
/// soon as possible; later polls follow `interval`. Every poll goes through
/// [`StatusMonitor::observe`], so unchanged results reach listeners as
/// confirmations.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use audit_bus::broker::InMemoryBroker;
/// use audit_bus::status::{ConnectionStatus, MonitorThread, StatusMonitor};
///
/// let broker = InMemoryBroker::new();
/// let monitor: Arc<StatusMonitor<ConnectionStatus>> = Arc::new(StatusMonitor::new("broker"));
///
/// let poller = MonitorThread::spawn(Arc::clone(&monitor), broker.clone(), Duration::from_millis(10));
/// std::thread::sleep(Duration::from_millis(50));
/// assert_eq!(monitor.current(), ConnectionStatus::Connected);
///
/// let stats = poller.stop();
/// assert!(stats.polls >= 1);
/// ```
pub struct MonitorThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<MonitorStats>>,
}

impl MonitorThread {
    pub fn spawn<S, H>(monitor: Arc<StatusMonitor<S>>, check: H, interval: Duration) -> Self
    where
        S: Copy + Eq + Debug + Default + Send + 'static,
        H: HealthCheck<S> + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        let name = format!("{}-monitor", monitor.name());

        let spawned = thread::Builder::new().name(name).spawn(move || {
            let mut stats = MonitorStats::default();

            loop {
                stats.polls += 1;
                let status = check.check();
                debug!(monitor = %monitor.name(), ?status, "health check");
                if monitor.observe(status) {
                    stats.transitions += 1;
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            stats
        });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(error = %err, "failed to spawn status monitor thread");
                None
            }
        };

        Self { stop_tx, handle }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(mut self) -> MonitorStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => MonitorStats::default(),
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for MonitorThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{ConnectionStatus, ConnectionStatusListener};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(ConnectionStatus, ConnectionStatus)>>);

    impl ConnectionStatusListener<ConnectionStatus> for Recorder {
        fn on_status_update(&self, old: ConnectionStatus, new: ConnectionStatus) {
            self.0.lock().unwrap().push((old, new));
        }
    }

    #[test]
    fn polls_and_reports_transitions() {
        let up = Arc::new(AtomicBool::new(true));
        let monitor: Arc<StatusMonitor<ConnectionStatus>> = Arc::new(StatusMonitor::new("test"));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        monitor.register(recorder.clone());

        let flag = Arc::clone(&up);
        let poller = MonitorThread::spawn(
            Arc::clone(&monitor),
            move || {
                if flag.load(Ordering::SeqCst) {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Down
                }
            },
            Duration::from_millis(5),
        );

        thread::sleep(Duration::from_millis(50));
        up.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));

        let stats = poller.stop();
        assert_eq!(stats.transitions, 2);
        assert!(stats.polls > 2);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                (ConnectionStatus::Unknown, ConnectionStatus::Connected),
                (ConnectionStatus::Connected, ConnectionStatus::Down),
            ]
        );
    }

    #[test]
    fn signalled_thread_stops_without_waiting_out_interval() {
        let monitor: Arc<StatusMonitor<ConnectionStatus>> = Arc::new(StatusMonitor::new("slow"));
        let poller = MonitorThread::spawn(
            Arc::clone(&monitor),
            || ConnectionStatus::Connected,
            Duration::from_secs(60),
        );

        let started = std::time::Instant::now();
        poller.signal_stop();
        poller.signal_stop();
        let stats = poller.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.polls, 1);
    }
}
