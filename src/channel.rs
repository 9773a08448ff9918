//! Sample handoff channel.
//!
//! Single-producer FIFO between the sampling loop and a polling consumer.
//! `put` never blocks the producer: under [`CapacityPolicy::BoundedDropOldest`]
//! the oldest unread sample is evicted to admit the newest. The consumer
//! drains with [`SampleChannel::try_drain`] and never mutates delivered
//! samples.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::sample::Sample;

/// Capacity policy, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Producer never blocks; memory grows if the consumer stalls.
    Unbounded,
    /// Producer never blocks; when full, the oldest unread sample is evicted.
    BoundedDropOldest(usize),
}

/// Producer-side sink for completed samples.
///
/// The in-process backends hand the collector a [`SampleChannel`]; the
/// process-isolated child hands it a stdout encoder instead.
pub trait SampleSink: Send + Sync {
    /// Deliver one sample. Must not block.
    fn put(&self, sample: Sample);
}

#[derive(Debug)]
struct ChannelState {
    buf: VecDeque<Sample>,
    closed: bool,
}

/// Bounded or unbounded in-memory FIFO of samples.
#[derive(Debug)]
pub struct SampleChannel {
    policy: CapacityPolicy,
    state: Mutex<ChannelState>,
    evicted: AtomicU64,
}

impl SampleChannel {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        // A poisoning panic cannot leave the queue inconsistent; keep going.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a channel with the given capacity policy.
    ///
    /// A bounded capacity of zero is clamped to one.
    pub fn new(policy: CapacityPolicy) -> Self {
        let policy = match policy {
            CapacityPolicy::BoundedDropOldest(0) => {
                tracing::warn!("channel capacity of zero clamped to one");
                CapacityPolicy::BoundedDropOldest(1)
            }
            other => other,
        };
        Self {
            policy,
            state: Mutex::new(ChannelState {
                buf: VecDeque::new(),
                closed: false,
            }),
            evicted: AtomicU64::new(0),
        }
    }

    /// Push one sample. Never blocks; evicts the oldest unread sample when
    /// full under the bounded policy. Puts after [`close`](Self::close) are
    /// discarded.
    pub fn put(&self, sample: Sample) {
        let mut state = self.lock_state();
        if state.closed {
            tracing::debug!("put on closed channel discarded");
            return;
        }
        if let CapacityPolicy::BoundedDropOldest(cap) = self.policy {
            while state.buf.len() >= cap {
                state.buf.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("channel full, evicted oldest sample");
            }
        }
        state.buf.push_back(sample);
    }

    /// Take all currently buffered samples in FIFO order.
    ///
    /// Non-blocking; an empty result is not an error. Safe to call
    /// repeatedly, including after close (returns leftovers, then
    /// permanently empty).
    pub fn try_drain(&self) -> Vec<Sample> {
        let mut state = self.lock_state();
        state.buf.drain(..).collect()
    }

    /// Mark that no further puts will occur.
    pub fn close(&self) {
        let mut state = self.lock_state();
        state.closed = true;
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Number of currently buffered samples.
    pub fn len(&self) -> usize {
        self.lock_state().buf.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total count of samples evicted by the drop-oldest policy.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl SampleSink for SampleChannel {
    fn put(&self, sample: Sample) {
        SampleChannel::put(self, sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::GpuReading;
    use chrono::Utc;
    use std::time::Duration;

    fn sample(cpu: f64) -> Sample {
        Sample {
            timestamp: Utc::now(),
            cpu_usage: cpu,
            memory_usage: 0.0,
            gpu_usage: GpuReading::Unavailable,
            cycle_time: Duration::ZERO,
        }
    }

    #[test]
    fn test_fifo_order() {
        let chan = SampleChannel::new(CapacityPolicy::Unbounded);
        for i in 0..5 {
            chan.put(sample(f64::from(i)));
        }
        let drained = chan.try_drain();
        let cpus: Vec<f64> = drained.iter().map(|s| s.cpu_usage).collect();
        assert_eq!(cpus, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_drain_empty_is_ok() {
        let chan = SampleChannel::new(CapacityPolicy::Unbounded);
        assert!(chan.try_drain().is_empty());
        assert!(chan.try_drain().is_empty());
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let chan = SampleChannel::new(CapacityPolicy::BoundedDropOldest(3));
        for i in 0..10 {
            chan.put(sample(f64::from(i)));
        }
        let drained = chan.try_drain();
        let cpus: Vec<f64> = drained.iter().map(|s| s.cpu_usage).collect();
        assert_eq!(cpus, vec![7.0, 8.0, 9.0]);
        assert_eq!(chan.evicted(), 7);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let chan = SampleChannel::new(CapacityPolicy::BoundedDropOldest(0));
        chan.put(sample(1.0));
        assert_eq!(chan.len(), 1);
    }

    #[test]
    fn test_close_discards_later_puts() {
        let chan = SampleChannel::new(CapacityPolicy::Unbounded);
        chan.put(sample(1.0));
        chan.close();
        chan.put(sample(2.0));
        let drained = chan.try_drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].cpu_usage, 1.0);
        assert!(chan.try_drain().is_empty());
        assert!(chan.is_closed());
    }
}
