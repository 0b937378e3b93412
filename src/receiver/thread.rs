//! Consumption thread for one listener's queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use super::handler::{handle_message, Outcome};
use crate::broker::{BrokerMessage, ConsumerSession};
use crate::listeners::EventListener;

/// Statistics from a consumption thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    pub polls: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub discarded: usize,
    /// Times a message was held back because the listener was not ready.
    pub deferred: usize,
    pub receive_errors: usize,
}

/// A message waiting for its listener to become ready again.
struct HeldMessage {
    message: BrokerMessage,
    acknowledged: bool,
}

/// A background thread that owns a started consumer session and feeds its
/// messages to one listener.
///
/// On stop the session is stopped and then closed; failures of either are
/// logged. Uncommitted messages go back to the queue with the session. The
/// thread also ends on its own when the session is lost, leaving the
/// receiver to be reconnected.
pub(crate) struct ConsumerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ReceiverStats>>,
}

impl ConsumerThread {
    pub(crate) fn spawn(
        session: Box<dyn ConsumerSession>,
        listener: Arc<dyn EventListener>,
        poll_interval: Duration,
        paused: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel();
        let name = format!("receiver-{}", listener.name());

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || consume(session, listener, poll_interval, paused, stop_rx))?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the thread to stop and wait for it to release the session.
    pub(crate) fn stop(mut self) -> ReceiverStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ReceiverStats::default(),
        }
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

fn consume(
    mut session: Box<dyn ConsumerSession>,
    listener: Arc<dyn EventListener>,
    poll_interval: Duration,
    paused: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
) -> ReceiverStats {
    let mut stats = ReceiverStats::default();
    let mut held: Option<HeldMessage> = None;
    let mut failing = false;

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        stats.polls += 1;

        let next = match held.take() {
            Some(waiting) => {
                if listener.check_ready().is_err() {
                    held = Some(waiting);
                    if wait_or_stop(&stop_rx, poll_interval) {
                        break;
                    }
                    continue;
                }
                debug!(listener = listener.name(), "listener ready again, resuming");
                paused.store(false, Ordering::SeqCst);
                waiting
            }
            None => match session.receive(poll_interval) {
                Ok(Some(message)) => {
                    failing = false;
                    HeldMessage {
                        message,
                        acknowledged: false,
                    }
                }
                Ok(None) => continue,
                Err(err) if err.is_session_lost() => {
                    stats.receive_errors += 1;
                    warn!(listener = listener.name(), error = %err, "consumer session lost, stopping receiver");
                    break;
                }
                Err(err) => {
                    stats.receive_errors += 1;
                    if !failing {
                        warn!(listener = listener.name(), error = %err, "receive failed");
                        failing = true;
                    }
                    if wait_or_stop(&stop_rx, poll_interval) {
                        break;
                    }
                    continue;
                }
            },
        };

        match handle_message(session.as_mut(), listener.as_ref(), &next.message, next.acknowledged) {
            Outcome::Committed => stats.committed += 1,
            Outcome::RolledBack => stats.rolled_back += 1,
            Outcome::Discarded => stats.discarded += 1,
            Outcome::Deferred => {
                stats.deferred += 1;
                paused.store(true, Ordering::SeqCst);
                held = Some(next);
            }
            Outcome::Held => {
                stats.deferred += 1;
                paused.store(true, Ordering::SeqCst);
                held = Some(HeldMessage {
                    acknowledged: true,
                    ..next
                });
            }
        }

        if held.is_some() && wait_or_stop(&stop_rx, poll_interval) {
            break;
        }
    }

    if let Err(err) = session.stop() {
        warn!(listener = listener.name(), error = %err, "failed to stop consumer session");
    }
    if let Err(err) = session.close() {
        error!(listener = listener.name(), error = %err, "failed to close consumer session");
    }

    stats
}

/// Sleep for `interval` unless asked to stop first. Returns `true` on stop.
fn wait_or_stop(stop_rx: &Receiver<()>, interval: Duration) -> bool {
    !matches!(stop_rx.recv_timeout(interval), Err(RecvTimeoutError::Timeout))
}
