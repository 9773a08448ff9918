//! Cooperative (single-threaded runtime) backend.
//!
//! The collector loop runs as the sole task of a current-thread tokio
//! runtime, hosted on one worker thread so the backend API stays blocking
//! and symmetrical with the other substrates. Inside the runtime the loop is
//! fully cooperative: it yields between sensor reads and races its pacing
//! sleep against cancellation, so stop latency is sub-cycle even at long
//! cadences.

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

/// Backend running the collector cooperatively on a single-threaded runtime.
pub struct CooperativeBackend {
    spec: CollectorSpec,
    state: Arc<StateCell>,
    worker: Option<Worker>,
}

impl CooperativeBackend {
    pub fn new(spec: CollectorSpec) -> Self {
        Self {
            spec,
            state: Arc::new(StateCell::new(BackendState::Idle)),
            worker: None,
        }
    }
}

impl Backend for CooperativeBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        if self.state.get() != BackendState::Idle {
            tracing::debug!("start ignored, backend already running");
            return Ok(());
        }

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
            .name("perflog-coop".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build collector runtime");
                        let _ = done_tx.send(());
                        return;
                    }
                };
                runtime.block_on(collector.run_cooperative());
                let _ = done_tx.send(());
            })?;

        self.worker = Some(Worker {
            cancel,
            done_rx,
            handle,
        });
        self.state.set(BackendState::Running);
        tracing::info!("cooperative backend started");
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
            tracing::error!(timeout = ?self.spec.stop_timeout, "collector task did not stop");
            return Err(BackendError::StopTimeout {
                timeout: self.spec.stop_timeout,
            });
        }

        if worker.handle.join().is_err() {
            tracing::error!("collector runtime thread panicked");
        }
        self.state.set(BackendState::Idle);
        tracing::info!("cooperative backend stopped");
        Ok(())
    }

    fn state(&self) -> BackendState {
        self.state.get()
    }
}

impl std::fmt::Debug for CooperativeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativeBackend")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
