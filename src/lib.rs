//! Host performance logger.
//!
//! Samples CPU, memory, and GPU load at a fixed cadence, commits each sample
//! to a SQLite `performance` table, and hands it to a polling consumer over
//! an in-memory channel. The same collector loop runs on one of three
//! interchangeable concurrency substrates (cooperative, dedicated thread,
//! isolated process) behind a single [`Supervisor`] lifecycle.
//!
//! ```no_run
//! use perflog::{LoggerConfig, Supervisor};
//!
//! # fn main() -> Result<(), perflog::BackendError> {
//! let mut supervisor = Supervisor::new(LoggerConfig::default());
//! let samples = supervisor.channel();
//!
//! supervisor.start_logging()?;
//! std::thread::sleep(std::time::Duration::from_secs(3));
//! supervisor.stop_logging()?;
//!
//! for sample in samples.try_drain() {
//!     println!("cpu {:.1}% memory {:.1}%", sample.cpu_usage, sample.memory_usage);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod channel;
pub mod collector;
pub mod config;
pub mod sample;
pub mod sensor;
pub mod store;
pub mod supervisor;

pub use backend::{Backend, BackendError, BackendState};
pub use channel::{CapacityPolicy, SampleChannel, SampleSink};
pub use collector::{CancelSignal, Collector, SENSOR_FAILURE_PERCENT};
pub use config::{BackendKind, ConfigError, LoggerConfig};
pub use sample::{GpuLoad, GpuReading, Sample, GPU_UNAVAILABLE};
pub use sensor::{system_sensor_factory, SensorError, SensorFactory, SensorReader, SystemSensor};
pub use store::{PerformanceRow, Store, StoreError};
pub use supervisor::Supervisor;
