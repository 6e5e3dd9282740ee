use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::manager::CapsManager;
use crate::transaction::SwitchEvent;

const EVENT_CAPACITY: usize = 256;

/// Background driver for a [`CapsManager`].
///
/// Owns a worker thread that waits on the manager's event queue (bounded by
/// the APPLY deadline), processes events and forwards the resulting
/// [`SwitchEvent`]s on a bounded channel. Events are dropped with a warning
/// when nobody drains that channel.
///
/// Dropping the runtime stops the worker. The manager itself stays alive
/// as long as other handles to it exist.
pub struct CapsRuntime {
    manager: CapsManager,
    events_rx: Receiver<SwitchEvent>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CapsRuntime {
    /// Spawns the `radiocaps-worker` thread. `poll` caps how long the worker
    /// blocks between shutdown checks.
    pub fn spawn(manager: CapsManager, poll: Duration) -> std::io::Result<Self> {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let worker_manager = manager.clone();

        let handle = thread::Builder::new()
            .name("radiocaps-worker".into())
            .spawn(move || runtime_worker(worker_manager, events_tx, shutdown_clone, poll))?;

        Ok(Self {
            manager,
            events_rx,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn manager(&self) -> &CapsManager {
        &self.manager
    }

    /// Receiver for switch events produced by the worker.
    pub fn events(&self) -> Receiver<SwitchEvent> {
        self.events_rx.clone()
    }

    /// Stops the worker thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.manager.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CapsRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn runtime_worker(
    manager: CapsManager,
    events_tx: Sender<SwitchEvent>,
    shutdown: Arc<AtomicBool>,
    poll: Duration,
) {
    debug!("capability worker started");
    while !shutdown.load(Ordering::Relaxed) {
        for event in manager.wait_events(poll) {
            match events_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(?event, "switch event dropped, receiver not draining");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
    debug!("capability worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::SlotConfig;
    use crate::sim::{SimChannel, SimDataManager, SimNetwork, SimRadio};
    use crate::{RadioCaps, TxState};

    #[test]
    fn worker_drives_switch_to_commit() {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let manager = CapsManager::new(dm);
        let mut runtime = CapsRuntime::spawn(manager.clone(), Duration::from_millis(20)).unwrap();
        let events = runtime.events();

        let channel = Arc::new(SimChannel::new("ril0"));
        let _caps = RadioCaps::new(
            &manager,
            "[ril0]",
            channel,
            Arc::new(SimRadio::new(true)),
            Arc::new(SimNetwork::new(false)),
            SlotConfig::new(0, manager.config().full_rat),
            None,
        );

        let committed = (0..50)
            .filter_map(|_| events.recv_timeout(Duration::from_millis(100)).ok())
            .any(|e| matches!(e, SwitchEvent::Committed { holder: 0, .. }));
        assert!(committed);
        assert_eq!(manager.state(), TxState::Idle);
        assert_eq!(manager.holder_slot(), Some(0));

        runtime.shutdown();
        runtime.shutdown();
    }

    #[test]
    fn drop_stops_worker() {
        let manager = CapsManager::new(Arc::new(SimDataManager::new(None)));
        let runtime = CapsRuntime::spawn(manager.clone(), Duration::from_secs(5)).unwrap();
        assert_eq!(manager.ref_count(), 3);
        drop(runtime);
        assert_eq!(manager.ref_count(), 1);
    }
}
