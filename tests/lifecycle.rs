//! Supervisor lifecycle over the in-process backends.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use perflog::{
    BackendError, BackendKind, GpuReading, LoggerConfig, SensorError, SensorFactory, SensorReader,
    Supervisor,
};
use tempfile::tempdir;

use common::{fast_config, row_count, stub_sensor_factory};

fn run_session(backend: BackendKind) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("perf.db");
    let config = fast_config(&db_path, backend);

    let mut supervisor = Supervisor::with_sensor(config, stub_sensor_factory(42.0, 61.5));
    let channel = supervisor.channel();

    assert!(!supervisor.is_logging());
    supervisor.start_logging().unwrap();
    assert!(supervisor.is_logging());

    std::thread::sleep(Duration::from_millis(200));
    supervisor.stop_logging().unwrap();
    assert!(!supervisor.is_logging());

    let drained = channel.try_drain();
    assert!(
        drained.len() >= 3,
        "expected several cycles, got {}",
        drained.len()
    );
    for sample in &drained {
        assert_eq!(sample.cpu_usage, 42.0);
        assert_eq!(sample.memory_usage, 61.5);
        assert_eq!(sample.gpu_usage, GpuReading::Unavailable);
    }
    for pair in drained.windows(2) {
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }

    // Graceful stop loses nothing: every delivered sample is also a row.
    assert_eq!(row_count(&db_path), drained.len() as u64);
}

#[test]
fn test_threaded_session_delivers_and_persists() {
    run_session(BackendKind::Threaded);
}

#[test]
fn test_cooperative_session_delivers_and_persists() {
    run_session(BackendKind::Cooperative);
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let dir = tempdir().unwrap();
    let config = fast_config(&dir.path().join("perf.db"), BackendKind::Threaded);
    let mut supervisor = Supervisor::with_sensor(config, stub_sensor_factory(1.0, 1.0));

    supervisor.stop_logging().unwrap(); // stop before any start
    supervisor.start_logging().unwrap();
    supervisor.start_logging().unwrap(); // no second collector
    std::thread::sleep(Duration::from_millis(100));
    supervisor.stop_logging().unwrap();
    supervisor.stop_logging().unwrap();
    assert!(!supervisor.is_logging());
}

#[test]
fn test_restart_appends_to_same_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("perf.db");
    let config = fast_config(&db_path, BackendKind::Threaded);
    let mut supervisor = Supervisor::with_sensor(config, stub_sensor_factory(1.0, 1.0));

    supervisor.start_logging().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    supervisor.stop_logging().unwrap();
    let after_first = row_count(&db_path);
    assert!(after_first > 0);

    supervisor.start_logging().unwrap();
    assert!(supervisor.is_logging());
    std::thread::sleep(Duration::from_millis(100));
    supervisor.stop_logging().unwrap();

    assert!(row_count(&db_path) > after_first);
}

#[test]
fn test_bounded_channel_keeps_most_recent() {
    let dir = tempdir().unwrap();
    let config = fast_config(&dir.path().join("perf.db"), BackendKind::Threaded)
        .with_cadence(Duration::from_millis(5))
        .with_channel_capacity(4);
    let mut supervisor = Supervisor::with_sensor(config, stub_sensor_factory(1.0, 1.0));
    let channel = supervisor.channel();

    supervisor.start_logging().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    supervisor.stop_logging().unwrap();

    // A stalled consumer sees at most the capacity, newest retained.
    let drained = channel.try_drain();
    assert!(drained.len() <= 4);
    assert!(channel.evicted() > 0);
    for pair in drained.windows(2) {
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }
}

#[test]
fn test_cooperative_stop_is_fast_at_long_cadence() {
    let dir = tempdir().unwrap();
    let config = LoggerConfig::default()
        .with_db_path(dir.path().join("perf.db"))
        .with_cadence(Duration::from_secs(60))
        .with_backend(BackendKind::Cooperative);
    let mut supervisor = Supervisor::with_sensor(config, stub_sensor_factory(1.0, 1.0));

    supervisor.start_logging().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    supervisor.stop_logging().unwrap();

    // The loop is parked in a 60s pacing sleep; cancellation interrupts it.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.channel().try_drain().len(), 1);
}

/// Sensor that never returns from its first read, wedging the worker.
struct WedgedSensor;

impl SensorReader for WedgedSensor {
    fn read_cpu(&mut self) -> Result<f64, SensorError> {
        std::thread::sleep(Duration::from_secs(3600));
        Ok(0.0)
    }

    fn read_memory(&mut self) -> Result<f64, SensorError> {
        Ok(0.0)
    }

    fn read_gpu(&mut self) -> Result<GpuReading, SensorError> {
        Ok(GpuReading::Unavailable)
    }
}

#[test]
fn test_wedged_worker_surfaces_stop_timeout() {
    let dir = tempdir().unwrap();
    let config = fast_config(&dir.path().join("perf.db"), BackendKind::Threaded)
        .with_stop_timeout(Duration::from_millis(200));
    let sensor: SensorFactory = Arc::new(|| Box::new(WedgedSensor));
    let mut supervisor = Supervisor::with_sensor(config, sensor);

    supervisor.start_logging().unwrap();
    std::thread::sleep(Duration::from_millis(50)); // worker is now stuck mid-read

    let err = supervisor.stop_logging().unwrap_err();
    assert!(matches!(err, BackendError::StopTimeout { .. }));
    // The wedged instance is released; the supervisor is not stuck logging.
    assert!(!supervisor.is_logging());
}

#[test]
fn test_consumer_can_drain_while_running() {
    let dir = tempdir().unwrap();
    let config = fast_config(&dir.path().join("perf.db"), BackendKind::Threaded);
    let mut supervisor = Supervisor::with_sensor(config, stub_sensor_factory(1.0, 1.0));
    let channel = supervisor.channel();

    supervisor.start_logging().unwrap();
    let mut total = 0;
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(50));
        total += channel.try_drain().len();
    }
    supervisor.stop_logging().unwrap();
    total += channel.try_drain().len();

    assert!(total >= 5, "expected steady deliveries, got {total}");
}
