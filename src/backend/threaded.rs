//! Dedicated-thread backend.
//!
//! The collector loop runs on its own OS thread with blocking sleeps.
//! Cancellation is a shared flag polled at the top of each cycle, so stop
//! latency is bounded by one cadence plus one cycle. Stop waits for a
//! completion handshake from the worker so every sample produced before the
//! request is already in the store and the channel when `stop` returns.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::collector::{CancelSignal, Collector};
use crate::store::Store;

use super::{Backend, BackendError, BackendState, CollectorSpec, StateCell};

struct Worker {
    cancel: Arc<CancelSignal>,
    done_rx: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Backend running the collector on a dedicated OS thread.
pub struct ThreadedBackend {
    spec: CollectorSpec,
    state: Arc<StateCell>,
    worker: Option<Worker>,
}

impl ThreadedBackend {
    pub fn new(spec: CollectorSpec) -> Self {
        Self {
            spec,
            state: Arc::new(StateCell::new(BackendState::Idle)),
            worker: None,
        }
    }
}

impl Backend for ThreadedBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        if self.state.get() != BackendState::Idle {
            tracing::debug!("start ignored, backend already running");
            return Ok(());
        }

        // Open the store here so a bad path fails the start call instead of
        // killing the worker silently.
        let store = Store::open(&self.spec.db_path)?;
        let sensor = (self.spec.sensor)();
        let cancel = Arc::new(CancelSignal::new());
        let (done_tx, done_rx) = mpsc::channel();

        let collector = Collector::new(
            sensor,
            store,
            Arc::clone(&self.spec.channel),
            self.spec.cadence,
            Arc::clone(&cancel),
        );

        let handle = std::thread::Builder::new()
            .name("perflog-collector".to_string())
            .spawn(move || {
                collector.run_blocking();
                // Receiver gone means stop already timed out; nothing to do.
                let _ = done_tx.send(());
            })?;

        self.worker = Some(Worker {
            cancel,
            done_rx,
            handle,
        });
        self.state.set(BackendState::Running);
        tracing::info!("threaded backend started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        let Some(worker) = self.worker.take() else {
            tracing::debug!("stop ignored, backend idle");
            return Ok(());
        };

        self.state.set(BackendState::Stopping);
        worker.cancel.set();

        if worker.done_rx.recv_timeout(self.spec.stop_timeout).is_err() {
            // Leave the state as Stopping; the detached worker may still
            // finish on its own.
            tracing::error!(timeout = ?self.spec.stop_timeout, "collector thread did not stop");
            return Err(BackendError::StopTimeout {
                timeout: self.spec.stop_timeout,
            });
        }

        if worker.handle.join().is_err() {
            tracing::error!("collector thread panicked during run");
        }
        self.state.set(BackendState::Idle);
        tracing::info!("threaded backend stopped");
        Ok(())
    }

    fn state(&self) -> BackendState {
        self.state.get()
    }
}

impl std::fmt::Debug for ThreadedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedBackend")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
