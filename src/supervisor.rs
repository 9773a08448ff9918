//! Logger lifecycle.
//!
//! [`Supervisor`] owns the handoff channel and at most one backend instance,
//! exposing the idempotent `start_logging` / `stop_logging` / `is_logging`
//! surface. The backend kind is fixed by configuration at construction;
//! starting after a stop runs a fresh collector against the same channel and
//! database.

use std::sync::Arc;

use crate::backend::cooperative::CooperativeBackend;
use crate::backend::process::ProcessBackend;
use crate::backend::threaded::ThreadedBackend;
use crate::backend::{Backend, BackendError, CollectorSpec};
use crate::channel::{CapacityPolicy, SampleChannel};
use crate::config::{BackendKind, LoggerConfig};
use crate::sensor::{system_sensor_factory, SensorFactory};

/// Owner of the collector lifecycle.
pub struct Supervisor {
    config: LoggerConfig,
    sensor: SensorFactory,
    channel: Arc<SampleChannel>,
    backend: Option<Box<dyn Backend>>,
}

impl Supervisor {
    /// Supervisor over the real host sensor.
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sensor(config, system_sensor_factory())
    }

    /// Supervisor with a custom sensor source. The process backend ignores
    /// the factory; its child always probes the real host.
    pub fn with_sensor(config: LoggerConfig, sensor: SensorFactory) -> Self {
        let policy = match config.channel_capacity {
            Some(capacity) => CapacityPolicy::BoundedDropOldest(capacity),
            None => CapacityPolicy::Unbounded,
        };
        Self {
            config,
            sensor,
            channel: Arc::new(SampleChannel::new(policy)),
            backend: None,
        }
    }

    /// The consumer-facing sample channel.
    pub fn channel(&self) -> Arc<SampleChannel> {
        Arc::clone(&self.channel)
    }

    /// Whether a collector is currently active.
    pub fn is_logging(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_running())
    }

    /// Start collecting. Idempotent: a second call while running is a no-op.
    pub fn start_logging(&mut self) -> Result<(), BackendError> {
        if self.is_logging() {
            tracing::debug!("start_logging ignored, already logging");
            return Ok(());
        }

        let spec = CollectorSpec {
            sensor: Arc::clone(&self.sensor),
            db_path: self.config.db_path.clone(),
            channel: Arc::clone(&self.channel),
            cadence: self.config.cadence,
            stop_timeout: self.config.effective_stop_timeout(),
        };

        let mut backend = self.build_backend(spec)?;
        backend.start()?;
        tracing::info!(backend = %self.config.backend, "logging started");
        self.backend = Some(backend);
        Ok(())
    }

    /// Stop collecting and wait for the backend to wind down. Idempotent:
    /// a call while idle is a no-op. The backend instance is released even
    /// when the stop errors, so a later start gets a clean slate.
    pub fn stop_logging(&mut self) -> Result<(), BackendError> {
        let Some(mut backend) = self.backend.take() else {
            tracing::debug!("stop_logging ignored, not logging");
            return Ok(());
        };

        let result = backend.stop();
        if result.is_ok() {
            tracing::info!("logging stopped");
        }
        result
    }

    fn build_backend(&self, spec: CollectorSpec) -> Result<Box<dyn Backend>, BackendError> {
        Ok(match self.config.backend {
            BackendKind::Cooperative => Box::new(CooperativeBackend::new(spec)),
            BackendKind::Threaded => Box::new(ThreadedBackend::new(spec)),
            BackendKind::Process => {
                let program = match &self.config.child_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()?,
                };
                Box::new(ProcessBackend::new(spec, program))
            }
        })
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("backend", &self.config.backend)
            .field("logging", &self.is_logging())
            .finish_non_exhaustive()
    }
}
