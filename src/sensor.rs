//! Sensor capability.
//!
//! [`SensorReader`] is the opaque seam between the collector loop and the
//! host's metric sources. Each read is a blocking system query that may take
//! non-trivial wall time. A missing GPU is a normal outcome, not an error;
//! everything else surfaces as [`SensorError::Unavailable`] and the collector
//! substitutes a sentinel for that field.

use std::process::Command;
use std::sync::Arc;

use sysinfo::System;
use thiserror::Error;

use crate::sample::{GpuLoad, GpuReading};

/// Errors from a single sensor read.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The underlying system query failed or produced unusable data.
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Instantaneous metric readings.
///
/// Implementations may keep internal state between reads (e.g. CPU usage
/// deltas), hence `&mut self`.
pub trait SensorReader {
    /// CPU load percentage in [0, 100].
    fn read_cpu(&mut self) -> Result<f64, SensorError>;

    /// Memory load percentage in [0, 100].
    fn read_memory(&mut self) -> Result<f64, SensorError>;

    /// GPU readings, or [`GpuReading::Unavailable`] when no GPU capability
    /// is detected.
    fn read_gpu(&mut self) -> Result<GpuReading, SensorError>;
}

/// Factory for sensor instances.
///
/// Backends create a fresh reader per run so a restarted collector never
/// inherits stale sensor state.
pub type SensorFactory = Arc<dyn Fn() -> Box<dyn SensorReader + Send> + Send + Sync>;

/// Factory producing the real host sensor.
pub fn system_sensor_factory() -> SensorFactory {
    Arc::new(|| Box::new(SystemSensor::new()))
}

/// Real host sensor: CPU and memory via `sysinfo`, GPU via `nvidia-smi`.
pub struct SystemSensor {
    sys: System,
}

impl SystemSensor {
    /// Create a sensor and prime the CPU usage baseline.
    ///
    /// CPU usage is a delta measurement; without this first refresh the
    /// initial cycle would always report zero.
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }
}

impl Default for SystemSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSensor").finish_non_exhaustive()
    }
}

impl SensorReader for SystemSensor {
    fn read_cpu(&mut self) -> Result<f64, SensorError> {
        self.sys.refresh_cpu_usage();
        Ok(f64::from(self.sys.global_cpu_usage()).clamp(0.0, 100.0))
    }

    fn read_memory(&mut self) -> Result<f64, SensorError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(SensorError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }
        let percent = self.sys.used_memory() as f64 / total as f64 * 100.0;
        Ok(percent.clamp(0.0, 100.0))
    }

    fn read_gpu(&mut self) -> Result<GpuReading, SensorError> {
        let output = match Command::new("nvidia-smi")
            .arg("--query-gpu=name,utilization.gpu")
            .arg("--format=csv,noheader,nounits")
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                // Tool not installed: no GPU capability on this host.
                tracing::debug!(error = %e, "nvidia-smi not available");
                return Ok(GpuReading::Unavailable);
            }
        };

        if !output.status.success() {
            tracing::debug!(status = ?output.status, "nvidia-smi exited with failure");
            return Ok(GpuReading::Unavailable);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(GpuReading::Readings(parse_nvidia_smi(&stdout)))
    }
}

/// Parse `name, utilization` CSV lines from `nvidia-smi`.
fn parse_nvidia_smi(output: &str) -> Vec<GpuLoad> {
    let mut gpus = Vec::new();
    for line in output.lines() {
        let Some((name, load)) = line.rsplit_once(',') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let load_percent = load.trim().parse::<f64>().unwrap_or(0.0).clamp(0.0, 100.0);
        gpus.push(GpuLoad {
            name: name.to_string(),
            load_percent,
        });
    }
    gpus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_single_gpu() {
        let gpus = parse_nvidia_smi("NVIDIA GeForce RTX 3080, 42\n");
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].name, "NVIDIA GeForce RTX 3080");
        assert_eq!(gpus[0].load_percent, 42.0);
    }

    #[test]
    fn test_parse_nvidia_smi_multiple_gpus() {
        let gpus = parse_nvidia_smi("GPU A, 10\nGPU B, 90\n");
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[1].name, "GPU B");
        assert_eq!(gpus[1].load_percent, 90.0);
    }

    #[test]
    fn test_parse_nvidia_smi_garbage_skipped() {
        let gpus = parse_nvidia_smi("no comma here\n, 42\n");
        assert!(gpus.is_empty());
    }

    #[test]
    fn test_parse_nvidia_smi_clamps_load() {
        let gpus = parse_nvidia_smi("GPU A, 250\n");
        assert_eq!(gpus[0].load_percent, 100.0);
    }

    #[test]
    fn test_system_sensor_reads_in_range() {
        let mut sensor = SystemSensor::new();
        let cpu = sensor.read_cpu().unwrap();
        let memory = sensor.read_memory().unwrap();
        assert!((0.0..=100.0).contains(&cpu));
        assert!((0.0..=100.0).contains(&memory));
        // GPU read must never fail, only report Unavailable.
        sensor.read_gpu().unwrap();
    }
}
