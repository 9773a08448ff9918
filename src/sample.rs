//! Core sample types.
//!
//! A [`Sample`] is one immutable telemetry reading produced per collector
//! cycle. It is written once to the store, pushed once to the channel, and
//! consumed by value; nothing mutates a sample after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Marker string persisted for [`GpuReading::Unavailable`].
///
/// Distinguishable from every list encoding, including the empty list `[]`.
pub const GPU_UNAVAILABLE: &str = "GPU unavailable";

/// Load reading for a single GPU device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuLoad {
    /// Device name as reported by the driver.
    pub name: String,
    /// Utilization percentage in [0, 100].
    pub load_percent: f64,
}

/// GPU portion of a sample.
///
/// `Unavailable` is a normal outcome (no GPU capability detected), not an
/// error. The variant needs an explicit wire encoding because samples cross
/// the process boundary under the process-isolated backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "gpus", rename_all = "lowercase")]
pub enum GpuReading {
    /// Ordered per-device readings. May be empty if a driver is present but
    /// reports no devices.
    Readings(Vec<GpuLoad>),
    /// No GPU capability detected.
    Unavailable,
}

impl GpuReading {
    /// Persisted string encoding for the `gpu_usage` column.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for GpuReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => f.write_str(GPU_UNAVAILABLE),
            Self::Readings(gpus) => {
                f.write_str("[")?;
                for (i, gpu) in gpus.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "(\"{}\", {:.1})", gpu.name, gpu.load_percent)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One immutable telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Cycle timestamp (UTC). Non-decreasing within one collector run.
    pub timestamp: DateTime<Utc>,
    /// CPU load percentage in [0, 100], or the failure sentinel.
    pub cpu_usage: f64,
    /// Memory load percentage in [0, 100], or the failure sentinel.
    pub memory_usage: f64,
    /// GPU reading, or the unavailable sentinel.
    pub gpu_usage: GpuReading,
    /// Wall-clock duration of this cycle's sensor reads.
    pub cycle_time: Duration,
}
