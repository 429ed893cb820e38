//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressSink`] for observing a running pipeline,
//! [`CancellationToken`] for cooperative cancellation, and [`ProgressEvent`]
//! for immutable progress snapshots.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecodec::{
//!     CancellationToken, ExtractOptions, FfmpegBackend, FrameExtractor,
//!     FrameCodecError, ProgressEvent, ProgressSink,
//! };
//!
//! struct PrintProgress;
//!
//! impl ProgressSink for PrintProgress {
//!     fn on_progress(&self, event: &ProgressEvent) {
//!         println!("{}% after {:?}", event.percent, event.elapsed);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = ExtractOptions::new()
//!     .with_progress(Arc::new(PrintProgress))
//!     .with_cancellation(token.clone());
//!
//! let summary = FrameExtractor::new(FfmpegBackend::new()).extract(
//!     "input.mp4",
//!     &[0.5, 1.0, 1.5],
//!     "frames",
//!     &options,
//! )?;
//! println!("saved {} frames", summary.files.len());
//! # Ok::<(), FrameCodecError>(())
//! ```

use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// An immutable progress snapshot.
///
/// Within one operation `percent` never decreases. The terminal event of a
/// successful operation always reports 100.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Completion percentage, 0 to 100.
    pub percent: u8,
    /// Optional human-readable message.
    pub message: Option<String>,
    /// Resource produced by this step: a written frame, the output
    /// directory, or the encoded video.
    pub location: Option<PathBuf>,
    /// Wall-clock time elapsed since the operation started.
    pub elapsed: Duration,
}

/// Receives intermediate progress events from a running pipeline.
///
/// Implementations must be [`Send`] and [`Sync`]: the pipeline may run on a
/// dedicated worker thread.
///
/// Sinks are **infallible**; they observe but cannot halt the operation. Use
/// [`CancellationToken`] for that.
pub trait ProgressSink: Send + Sync {
    /// Called once per persisted frame (extraction) or submitted frame
    /// (encoding).
    fn on_progress(&self, event: &ProgressEvent);
}

/// Discards every event. The default when no sink is configured.
pub(crate) struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread. The processing loops
/// check the flag once per iteration, so an in-flight codec call always
/// completes before the pipeline notices.
///
/// # Example
///
/// ```
/// use framecodec::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks elapsed time and keeps reported percentages monotonic.
pub(crate) struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    start_time: Instant,
    last_percent: u8,
}

impl ProgressTracker {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            start_time: Instant::now(),
            last_percent: 0,
        }
    }

    /// Emit an intermediate event for `done` out of `total` units.
    pub(crate) fn report(&mut self, done: u64, total: u64, location: Option<PathBuf>) {
        let event = self.event(percent_of(done, total), None, location);
        self.sink.on_progress(&event);
    }

    /// Build the terminal success event. Always 100%.
    pub(crate) fn finish(&mut self, message: Option<String>, location: Option<PathBuf>) -> ProgressEvent {
        self.event(100, message, location)
    }

    fn event(&mut self, percent: u8, message: Option<String>, location: Option<PathBuf>) -> ProgressEvent {
        self.last_percent = self.last_percent.max(percent);
        ProgressEvent {
            percent: self.last_percent,
            message,
            location,
            elapsed: self.start_time.elapsed(),
        }
    }
}

/// `done / total × 100`, truncated and clamped to 0..=100.
///
/// A zero `total` counts as complete.
pub(crate) fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn percent_is_truncated_and_clamped() {
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(45, 30), 100);
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(0, 10), 0);
    }

    #[test]
    fn tracker_never_goes_backwards() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut tracker = ProgressTracker::new(recorder.clone());
        tracker.report(50, 100, None);
        tracker.report(10, 100, None);
        let terminal = tracker.finish(Some("done".into()), None);

        let events = recorder.0.lock().unwrap();
        assert_eq!(events[0].percent, 50);
        assert_eq!(events[1].percent, 50);
        assert_eq!(terminal.percent, 100);
        assert_eq!(terminal.message.as_deref(), Some("done"));
    }
}
