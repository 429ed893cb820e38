//! Pipeline configuration.
//!
//! [`ExtractOptions`] and [`EncodeOptions`] are builders that thread progress
//! sinks, cancellation tokens, and tuning knobs through the pipelines without
//! polluting every function signature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecodec::{CancellationToken, EncodeOptions, ProgressEvent, ProgressSink};
//!
//! struct LogProgress;
//! impl ProgressSink for LogProgress {
//!     fn on_progress(&self, event: &ProgressEvent) {
//!         println!("{}%", event.percent);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = EncodeOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_frame_rate(24)
//!     .with_bit_rate(8_000_000);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::conversion::PixelLayout;
use crate::progress::{CancellationToken, NoOpProgress, ProgressSink};

/// Default wait for one dequeue call against the codec.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Default wait for a rendered frame to reach the conversion surface.
pub const DEFAULT_FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default time the encoder may stay silent while draining.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Compression used for persisted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    /// JPEG with a quality between 1 and 100.
    Jpeg {
        /// Encoder quality, clamped to 1..=100.
        quality: u8,
    },
    /// Lossless PNG.
    Png,
}

impl Default for StillFormat {
    fn default() -> Self {
        StillFormat::Jpeg { quality: 100 }
    }
}

impl StillFormat {
    /// File extension written for this format, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            StillFormat::Jpeg { .. } => "jpg",
            StillFormat::Png => "png",
        }
    }
}

/// Configuration for [`FrameExtractor`](crate::FrameExtractor).
///
/// All fields have sensible defaults: no progress sink, no cancellation,
/// JPEG at quality 100, files named `image_001.jpg`, `image_002.jpg`, ...
#[derive(Clone)]
pub struct ExtractOptions {
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) still_format: StillFormat,
    pub(crate) file_prefix: String,
    pub(crate) poll_timeout: Duration,
    pub(crate) frame_wait_timeout: Duration,
}

impl Debug for ExtractOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractOptions")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("still_format", &self.still_format)
            .field("file_prefix", &self.file_prefix)
            .field("poll_timeout", &self.poll_timeout)
            .field("frame_wait_timeout", &self.frame_wait_timeout)
            .finish()
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            still_format: StillFormat::default(),
            file_prefix: "image_".to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            frame_wait_timeout: DEFAULT_FRAME_WAIT_TIMEOUT,
        }
    }

    /// Attach a progress sink. It receives one event per persisted frame.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, extraction stops at the next loop
    /// iteration and returns
    /// [`FrameCodecError::Cancelled`](crate::FrameCodecError::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Persist frames as JPEG with the given quality (clamped to 1..=100).
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.still_format = StillFormat::Jpeg {
            quality: quality.clamp(1, 100),
        };
        self
    }

    /// Set the compression used for persisted frames.
    #[must_use]
    pub fn with_still_format(mut self, format: StillFormat) -> Self {
        self.still_format = match format {
            StillFormat::Jpeg { quality } => StillFormat::Jpeg {
                quality: quality.clamp(1, 100),
            },
            StillFormat::Png => StillFormat::Png,
        };
        self
    }

    /// Set the file name prefix. Files are named `{prefix}{n:03}.{ext}`.
    #[must_use]
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Set how long each dequeue call may block.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set how long to wait for a rendered frame to reach the surface.
    #[must_use]
    pub fn with_frame_wait_timeout(mut self, timeout: Duration) -> Self {
        self.frame_wait_timeout = timeout;
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

/// Configuration for [`FrameEncoder`](crate::FrameEncoder).
///
/// Defaults: H.264 (`video/avc`), 30 fps, 16 Mbit/s, one key frame per
/// second, planar YUV 4:2:0 input, source frames kept after encoding.
#[derive(Clone)]
pub struct EncodeOptions {
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) mime_type: String,
    pub(crate) frame_rate: u32,
    pub(crate) bit_rate: u32,
    pub(crate) i_frame_interval: u32,
    pub(crate) input_layout: PixelLayout,
    pub(crate) delete_frames_on_complete: bool,
    pub(crate) poll_timeout: Duration,
    pub(crate) drain_timeout: Duration,
}

impl Debug for EncodeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EncodeOptions")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("mime_type", &self.mime_type)
            .field("frame_rate", &self.frame_rate)
            .field("bit_rate", &self.bit_rate)
            .field("i_frame_interval", &self.i_frame_interval)
            .field("input_layout", &self.input_layout)
            .field("delete_frames_on_complete", &self.delete_frames_on_complete)
            .finish()
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            mime_type: "video/avc".to_string(),
            frame_rate: 30,
            bit_rate: 16_000_000,
            i_frame_interval: 1,
            input_layout: PixelLayout::Yuv420p,
            delete_frames_on_complete: false,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Attach a progress sink. It receives one event per submitted frame.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the output codec by mime type (e.g. `video/avc`, `video/hevc`).
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Set the output frame rate. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    /// Set the average bit rate in bits per second.
    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    /// Set the key frame interval in seconds. Zero requests all key frames.
    #[must_use]
    pub fn with_i_frame_interval(mut self, seconds: u32) -> Self {
        self.i_frame_interval = seconds;
        self
    }

    /// Request the raw layout the encoder consumes. Backends that convert
    /// colour themselves may open the codec with another supported layout.
    #[must_use]
    pub fn with_input_layout(mut self, layout: PixelLayout) -> Self {
        self.input_layout = layout;
        self
    }

    /// Delete the source frame directory after a successful encode.
    ///
    /// Only applies to [`FrameEncoder::encode_directory`](crate::FrameEncoder::encode_directory).
    #[must_use]
    pub fn with_delete_frames_on_complete(mut self, delete: bool) -> Self {
        self.delete_frames_on_complete = delete;
        self
    }

    /// Set how long each dequeue call may block.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set how long the encoder may stay silent while draining.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Presentation time of the frame at `index`, in microseconds.
    pub(crate) fn presentation_time_us(&self, index: u64) -> i64 {
        (index * 1_000_000 / u64::from(self.frame_rate)) as i64
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_time_follows_frame_rate() {
        let options = EncodeOptions::new().with_frame_rate(30);
        assert_eq!(options.presentation_time_us(0), 0);
        assert_eq!(options.presentation_time_us(1), 33_333);
        assert_eq!(options.presentation_time_us(30), 1_000_000);
    }

    #[test]
    fn zero_frame_rate_is_clamped() {
        let options = EncodeOptions::new().with_frame_rate(0);
        assert_eq!(options.frame_rate, 1);
    }
}
