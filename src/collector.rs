//! The sampling loop.
//!
//! One cycle body shared by all backends: read cpu, memory, gpu in sequence
//! (substituting sentinels on per-field failures), build an immutable
//! [`Sample`], append it to the store, push it to the sink, then pace to the
//! cadence. The two renditions differ only in how the pacing sleep is
//! scheduled and where cancellation is observed:
//!
//! - [`Collector::run_blocking`] (thread and child-process backends) polls
//!   the cancel flag at the top of each cycle; the pacing sleep is a plain
//!   `thread::sleep`, so cancellation latency is up to one cadence.
//! - [`Collector::run_cooperative`] checks the flag at every suspension
//!   point and races the pacing sleep against cancellation, giving sub-cycle
//!   latency.
//!
//! Probe failures are data, not errors: a failed cpu/memory read records
//! [`SENSOR_FAILURE_PERCENT`], a failed gpu read records
//! [`GpuReading::Unavailable`], and a failed store append is logged while the
//! channel delivery still proceeds so the consumer is never starved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::channel::SampleSink;
use crate::sample::{GpuReading, Sample};
use crate::sensor::SensorReader;
use crate::store::Store;

/// Sentinel recorded for a cpu/memory field whose sensor read failed.
pub const SENSOR_FAILURE_PERCENT: f64 = -1.0;

/// Cancellation signal shared between a backend and its collector loop.
///
/// One abstraction for both in-process substrates: the threaded loop polls
/// [`is_set`](Self::is_set), the cooperative loop additionally awaits
/// [`cancelled`](Self::cancelled). The process-isolated variant does not use
/// shared memory at all; its cancel is the out-of-band close of the child's
/// stdin.
#[derive(Debug, Default)]
pub struct CancelSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake any waiter.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// The sampling loop, parameterized over sensor, store, sink, and cadence.
pub struct Collector {
    sensor: Box<dyn SensorReader + Send>,
    store: Store,
    sink: Arc<dyn SampleSink>,
    cadence: Duration,
    cancel: Arc<CancelSignal>,
    last_timestamp: Option<DateTime<Utc>>,
    cycles: u64,
}

impl Collector {
    pub fn new<S: SampleSink + 'static>(
        sensor: Box<dyn SensorReader + Send>,
        store: Store,
        sink: Arc<S>,
        cadence: Duration,
        cancel: Arc<CancelSignal>,
    ) -> Self {
        Self {
            sensor,
            store,
            sink,
            cadence,
            cancel,
            last_timestamp: None,
            cycles: 0,
        }
    }

    fn cpu_or_sentinel(&mut self) -> f64 {
        match self.sensor.read_cpu() {
            Ok(v) => v.clamp(0.0, 100.0),
            Err(e) => {
                tracing::warn!(error = %e, "cpu read failed, recording sentinel");
                SENSOR_FAILURE_PERCENT
            }
        }
    }

    fn memory_or_sentinel(&mut self) -> f64 {
        match self.sensor.read_memory() {
            Ok(v) => v.clamp(0.0, 100.0),
            Err(e) => {
                tracing::warn!(error = %e, "memory read failed, recording sentinel");
                SENSOR_FAILURE_PERCENT
            }
        }
    }

    fn gpu_or_unavailable(&mut self) -> GpuReading {
        match self.sensor.read_gpu() {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(error = %e, "gpu read failed, recording unavailable");
                GpuReading::Unavailable
            }
        }
    }

    /// Cycle timestamp, clamped so a wall-clock step backwards cannot break
    /// the non-decreasing invariant.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    /// Build and deliver the sample for one cycle; returns the cycle time.
    fn finish_cycle(
        &mut self,
        started: Instant,
        cpu_usage: f64,
        memory_usage: f64,
        gpu_usage: GpuReading,
    ) -> Duration {
        let cycle_time = started.elapsed();
        let sample = Sample {
            timestamp: self.next_timestamp(),
            cpu_usage,
            memory_usage,
            gpu_usage,
            cycle_time,
        };

        if let Err(e) = self.store.append(&sample) {
            // Non-fatal: this cycle's durability guarantee is void, but the
            // consumer still gets the sample.
            tracing::error!(error = %e, "store append failed, continuing");
        }
        self.sink.put(sample);

        self.cycles += 1;
        tracing::debug!(
            cycle = self.cycles,
            cycle_time_ms = cycle_time.as_millis() as u64,
            "cycle completed"
        );
        cycle_time
    }

    /// Run the loop on the current thread until cancelled.
    ///
    /// Cancellation is observed at the top of each cycle only; the pacing
    /// sleep is not interruptible.
    pub fn run_blocking(mut self) {
        tracing::info!(
            cadence_ms = self.cadence.as_millis() as u64,
            "collector loop started"
        );
        loop {
            if self.cancel.is_set() {
                break;
            }
            let started = Instant::now();
            let cpu = self.cpu_or_sentinel();
            let memory = self.memory_or_sentinel();
            let gpu = self.gpu_or_unavailable();
            let cycle_time = self.finish_cycle(started, cpu, memory, gpu);

            let budget = self.cadence.saturating_sub(cycle_time);
            if !budget.is_zero() {
                std::thread::sleep(budget);
            }
        }
        tracing::info!(cycles = self.cycles, "collector loop exited");
    }

    /// Run the loop cooperatively until cancelled.
    ///
    /// The cancel flag is re-checked at every suspension point (after each
    /// sensor read) and the pacing sleep races cancellation, so the loop
    /// exits within at most one suspension point of the request.
    pub async fn run_cooperative(mut self) {
        tracing::info!(
            cadence_ms = self.cadence.as_millis() as u64,
            "collector loop started"
        );
        let cancel = Arc::clone(&self.cancel);
        loop {
            if cancel.is_set() {
                break;
            }
            let started = Instant::now();

            let cpu = self.cpu_or_sentinel();
            tokio::task::yield_now().await;
            if cancel.is_set() {
                break;
            }

            let memory = self.memory_or_sentinel();
            tokio::task::yield_now().await;
            if cancel.is_set() {
                break;
            }

            let gpu = self.gpu_or_unavailable();
            let cycle_time = self.finish_cycle(started, cpu, memory, gpu);

            let budget = self.cadence.saturating_sub(cycle_time);
            if !budget.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(budget) => {}
                }
            }
        }
        tracing::info!(cycles = self.cycles, "collector loop exited");
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("cadence", &self.cadence)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}
