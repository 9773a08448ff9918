//! Concurrency backends.
//!
//! Three substrates run the same collector loop and are interchangeable
//! behind the [`Backend`] trait:
//!
//! - [`cooperative::CooperativeBackend`]: cooperative scheduling on a
//!   single-threaded runtime; sub-cycle cancellation latency.
//! - [`threaded::ThreadedBackend`]: a dedicated OS thread; cancellation
//!   observed at the top of each cycle, latency up to one cadence.
//! - [`process::ProcessBackend`]: an isolated child process streaming
//!   samples back over a pipe; survives blocking or crashing sensors.
//!
//! A backend instance is restartable: `stop` returns it to `Idle`, and a
//! later `start` begins a fresh run with a freshly built sensor and store
//! handle.

pub mod cooperative;
pub mod process;
pub mod threaded;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::channel::SampleChannel;
use crate::sensor::SensorFactory;
use crate::store::StoreError;

/// Errors from backend lifecycle operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store could not be opened for this run.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker did not acknowledge stop within the deadline.
    #[error("backend did not stop within {timeout:?}")]
    StopTimeout { timeout: Duration },

    /// The child process could not be spawned or driven.
    #[error("child process error: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Lifecycle state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackendState {
    /// No collector running.
    Idle = 0,
    /// Collector loop active.
    Running = 1,
    /// Stop requested, worker winding down.
    Stopping = 2,
}

/// Shared, lock-free view of a backend's state.
///
/// Written by the owning backend, readable from the worker (the process
/// backend's reader thread flips it to `Idle` when the child's pipe closes).
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: BackendState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn set(&self, state: BackendState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> BackendState {
        match self.0.load(Ordering::SeqCst) {
            1 => BackendState::Running,
            2 => BackendState::Stopping,
            _ => BackendState::Idle,
        }
    }
}

/// Everything a backend needs to run one collector.
///
/// Cloneable so a backend can be restarted: each `start` takes a fresh
/// sensor from the factory and opens its own store handle.
#[derive(Clone)]
pub struct CollectorSpec {
    /// Builds a fresh sensor per run.
    pub sensor: SensorFactory,
    /// SQLite database location.
    pub db_path: PathBuf,
    /// Consumer-facing handoff channel.
    pub channel: Arc<SampleChannel>,
    /// Target interval between cycle starts.
    pub cadence: Duration,
    /// How long `stop` waits for the worker before giving up.
    pub stop_timeout: Duration,
}

impl std::fmt::Debug for CollectorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorSpec")
            .field("db_path", &self.db_path)
            .field("cadence", &self.cadence)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

/// A concurrency substrate hosting the collector loop.
///
/// `start` and `stop` are idempotent with respect to state: `start` while
/// running and `stop` while idle are no-ops.
pub trait Backend: Send {
    /// Begin collecting. No-op if already running.
    fn start(&mut self) -> Result<(), BackendError>;

    /// Stop collecting and wait for the worker to wind down. No samples
    /// produced before the stop request are lost. No-op if idle.
    fn stop(&mut self) -> Result<(), BackendError>;

    /// Current lifecycle state.
    fn state(&self) -> BackendState;

    /// Whether a collector run is active (running or winding down).
    fn is_running(&self) -> bool {
        self.state() != BackendState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_roundtrip() {
        let cell = StateCell::new(BackendState::Idle);
        assert_eq!(cell.get(), BackendState::Idle);
        cell.set(BackendState::Running);
        assert_eq!(cell.get(), BackendState::Running);
        cell.set(BackendState::Stopping);
        assert_eq!(cell.get(), BackendState::Stopping);
    }
}
