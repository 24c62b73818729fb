//! Transfer progress reporting.
//!
//! Progress is delivered to an injectable [`ProgressSink`]; the engine
//! works identically with the provided [`NoopSink`], and a sink must never
//! affect transfer correctness.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use davsync_common::RelPath;

/// Minimum wall time between two consecutive events for one file.
const EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// One progress update for one in-flight transfer.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// The file being transferred.
    pub path: RelPath,
    /// Bytes moved so far.
    pub bytes_moved: u64,
    /// Total bytes expected.
    pub total_bytes: u64,
    /// Instantaneous throughput in bytes per second: bytes moved since the
    /// previous emitted event over the wall time since that event.
    pub speed: f64,
    /// Completion percentage, 0-100.
    pub percentage: f64,
}

/// Consumer of transfer progress events.
///
/// Implementations synchronize internally and must not block the transfer
/// for more than a bounded, small duration.
pub trait ProgressSink: Send + Sync {
    /// A transfer moved bytes.
    fn update(&self, event: &ProgressEvent);

    /// A transfer ended, successfully or not. Always called exactly once
    /// per transfer, so sinks can release per-file bookkeeping.
    fn finish(&self, path: &RelPath);
}

/// Sink that discards all events.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn update(&self, _event: &ProgressEvent) {}
    fn finish(&self, _path: &RelPath) {}
}

/// Per-transfer event emitter with rate limiting.
///
/// Emits the first event as soon as at least one byte has moved, then at
/// most one event per 100 ms, plus a mandatory final event from
/// [`complete`](Self::complete). Dropping the reporter releases the sink's
/// per-file state on every exit path, including failures.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    path: RelPath,
    total: u64,
    moved: u64,
    started: Instant,
    last_emit: Option<(Instant, u64)>,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, path: RelPath, total: u64) -> Self {
        Self {
            sink,
            path,
            total,
            moved: 0,
            started: Instant::now(),
            last_emit: None,
            finished: false,
        }
    }

    /// Record `bytes` more bytes moved, emitting an event when due.
    pub fn advance(&mut self, bytes: u64) {
        self.moved += bytes;
        if self.moved == 0 {
            return;
        }
        let due = match self.last_emit {
            None => true,
            Some((at, _)) => at.elapsed() >= EMIT_INTERVAL,
        };
        if due {
            self.emit();
        }
    }

    /// Emit the mandatory final event and release the sink's state.
    pub fn complete(&mut self) {
        self.emit();
        self.sink.finish(&self.path);
        self.finished = true;
    }

    fn emit(&mut self) {
        let now = Instant::now();
        let (since, base) = self.last_emit.unwrap_or((self.started, 0));
        let elapsed = now.duration_since(since).as_secs_f64();
        let speed = if elapsed > 0.0 {
            (self.moved - base) as f64 / elapsed
        } else {
            0.0
        };
        let percentage = if self.total > 0 {
            (self.moved as f64 / self.total as f64) * 100.0
        } else {
            100.0
        };
        self.sink.update(&ProgressEvent {
            path: self.path.clone(),
            bytes_moved: self.moved,
            total_bytes: self.total,
            speed,
            percentage,
        });
        self.last_emit = Some((now, self.moved));
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if !self.finished {
            self.sink.finish(&self.path);
        }
    }
}
