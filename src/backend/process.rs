//! Process-isolated backend.
//!
//! The collector loop runs in a separate child process (this binary
//! re-invoked with the hidden `child` subcommand), so a sensor that blocks or
//! crashes takes down the child, never the host. The child owns the store:
//! it commits each sample locally and streams it to the host as one JSON
//! line on stdout. A reader thread on the host feeds those lines into the
//! handoff channel.
//!
//! Termination is a pipe protocol, not shared memory: the host closes the
//! child's stdin, the child treats stdin EOF as its cancel signal, finishes
//! the in-flight cycle, and exits. If the child outlives the grace period it
//! is killed, at the cost of a possibly torn final row.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::SampleSink;
use crate::collector::{CancelSignal, Collector};
use crate::sample::Sample;
use crate::sensor::system_sensor_factory;
use crate::store::Store;

use super::{Backend, BackendError, BackendState, CollectorSpec, StateCell};

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Worker {
    child: Child,
    stdin: Option<std::process::ChildStdin>,
    reader: JoinHandle<()>,
}

impl Worker {
    /// Kill and reap whatever is left of the child, then drain the reader.
    ///
    /// Used for abandoned workers (crashed child, or backend dropped without
    /// a stop call); the dead pid must still be waited on or it lingers as a
    /// zombie for the host's lifetime.
    fn dispose(mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill(); // no-op if already exited
        if let Err(e) = self.child.wait() {
            tracing::warn!(error = %e, "failed to reap collector child");
        }
        if self.reader.join().is_err() {
            tracing::error!("child reader thread panicked");
        }
    }
}

/// Backend running the collector in an isolated child process.
pub struct ProcessBackend {
    spec: CollectorSpec,
    program: std::path::PathBuf,
    state: Arc<StateCell>,
    worker: Option<Worker>,
}

impl ProcessBackend {
    /// `program` is the collector binary to spawn, normally the running
    /// executable itself.
    pub fn new(spec: CollectorSpec, program: std::path::PathBuf) -> Self {
        Self {
            spec,
            program,
            state: Arc::new(StateCell::new(BackendState::Idle)),
            worker: None,
        }
    }

    /// OS pid of the running child, if any. Exposed for fault-injection
    /// tests that kill the child out of band.
    pub fn child_id(&self) -> Option<u32> {
        self.worker.as_ref().map(|w| w.child.id())
    }

    /// Wait for the child to exit, escalating to kill after the grace
    /// period.
    fn reap(&self, mut child: Child) -> Result<(), BackendError> {
        let deadline = Instant::now() + self.spec.stop_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                tracing::debug!(?status, "collector child exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(KILL_POLL_INTERVAL);
        }

        tracing::warn!(
            timeout = ?self.spec.stop_timeout,
            "collector child ignored stdin close, killing; final row may be torn"
        );
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

impl Backend for ProcessBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        if self.state.get() != BackendState::Idle {
            tracing::debug!("start ignored, backend already running");
            return Ok(());
        }

        // A crashed child parks the state at Idle with the worker still
        // present; reap it before spawning a replacement.
        if let Some(worker) = self.worker.take() {
            worker.dispose();
        }

        let mut child = Command::new(&self.program)
            .arg("child")
            .arg("--db")
            .arg(&self.spec.db_path)
            .arg("--cadence")
            .arg(humantime::format_duration(self.spec.cadence).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout not captured")
        })?;

        let channel = Arc::clone(&self.spec.channel);
        let state = Arc::clone(&self.state);
        let reader = std::thread::Builder::new()
            .name("perflog-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!(error = %e, "child pipe read failed");
                            break;
                        }
                    };
                    match serde_json::from_str::<Sample>(&line) {
                        Ok(sample) => channel.put(sample),
                        Err(e) => tracing::warn!(error = %e, "malformed sample line dropped"),
                    }
                }
                // Pipe closed: the producer is gone, whether by request or
                // crash. Flip to Idle so the host never waits on a dead child.
                tracing::debug!("child pipe closed, reader exiting");
                state.set(BackendState::Idle);
            })?;

        self.worker = Some(Worker {
            child,
            stdin,
            reader,
        });
        self.state.set(BackendState::Running);
        tracing::info!(pid = self.child_id(), "process backend started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        let Some(mut worker) = self.worker.take() else {
            tracing::debug!("stop ignored, backend idle");
            return Ok(());
        };

        self.state.set(BackendState::Stopping);
        // Closing stdin is the termination request.
        drop(worker.stdin.take());

        let result = self.reap(worker.child);
        // Child gone, so the reader sees EOF promptly; joining it guarantees
        // every streamed sample reached the channel before we return.
        if worker.reader.join().is_err() {
            tracing::error!("child reader thread panicked");
        }
        self.state.set(BackendState::Idle);
        if result.is_ok() {
            tracing::info!("process backend stopped");
        }
        result
    }

    fn state(&self) -> BackendState {
        self.state.get()
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            tracing::debug!("process backend dropped while holding a child, reaping");
            worker.dispose();
        }
    }
}

impl std::fmt::Debug for ProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBackend")
            .field("program", &self.program)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// Sink used inside the child: one JSON line per sample on stdout, flushed
/// immediately so the host sees samples at cadence, not at buffer size.
struct StdoutSink {
    out: std::sync::Mutex<std::io::Stdout>,
}

impl SampleSink for StdoutSink {
    fn put(&self, sample: Sample) {
        let line = match serde_json::to_string(&sample) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "sample serialization failed");
                return;
            }
        };
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
            // Host hung up; the stdin watcher will cancel the loop shortly.
            tracing::warn!("sample write to host failed");
        }
    }
}

/// Child-process entry point: run the collector loop against the real host
/// sensor until stdin reaches EOF.
///
/// Diagnostics go to stderr; stdout is reserved for the sample stream.
pub fn run_child(db_path: std::path::PathBuf, cadence: Duration) -> Result<(), BackendError> {
    let store = Store::open(&db_path)?;
    let sensor = system_sensor_factory()();
    let cancel = Arc::new(CancelSignal::new());

    // Stdin EOF is the termination request from the host.
    let watcher_cancel = Arc::clone(&cancel);
    std::thread::Builder::new()
        .name("perflog-stdin".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64];
            let mut stdin = std::io::stdin();
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {} // Host sends nothing; ignore stray bytes.
                }
            }
            tracing::debug!("host closed stdin, cancelling collector");
            watcher_cancel.set();
        })?;

    let sink = Arc::new(StdoutSink {
        out: std::sync::Mutex::new(std::io::stdout()),
    });

    Collector::new(sensor, store, sink, cadence, cancel).run_blocking();
    Ok(())
}
