#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use perflog::{
    BackendKind, GpuReading, LoggerConfig, SensorError, SensorFactory, SensorReader, Store,
};

/// Deterministic sensor for lifecycle tests: fixed values, no host variance.
pub struct StubSensor {
    pub cpu: f64,
    pub memory: f64,
}

impl SensorReader for StubSensor {
    fn read_cpu(&mut self) -> Result<f64, SensorError> {
        Ok(self.cpu)
    }

    fn read_memory(&mut self) -> Result<f64, SensorError> {
        Ok(self.memory)
    }

    fn read_gpu(&mut self) -> Result<GpuReading, SensorError> {
        Ok(GpuReading::Unavailable)
    }
}

pub fn stub_sensor_factory(cpu: f64, memory: f64) -> SensorFactory {
    Arc::new(move || Box::new(StubSensor { cpu, memory }))
}

pub fn fast_config(db_path: &Path, backend: BackendKind) -> LoggerConfig {
    LoggerConfig::default()
        .with_db_path(db_path)
        .with_cadence(Duration::from_millis(20))
        .with_backend(backend)
}

pub fn row_count(db_path: &Path) -> u64 {
    Store::open(db_path).unwrap().count().unwrap()
}
