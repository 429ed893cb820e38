//! Error types for the `framecodec` crate.
//!
//! This module defines [`FrameCodecError`], the unified error type returned by
//! both pipelines and by every backend. Each variant is terminal for the
//! operation that produced it; nothing inside the crate retries.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// `ENOMEM`. Identical on every platform FFmpeg supports.
const ENOMEM: i32 = 12;

/// The unified error type for all `framecodec` operations.
///
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameCodecError {
    /// The source video could not be opened (bad path, permissions, corrupt
    /// header).
    #[error("Failed to open source at {path}: {reason}")]
    SourceUnreadable {
        /// Path that was handed to the backend.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The source contains no track whose mime type starts with `video/`.
    #[error("No video track found in source")]
    NoVideoTrack,

    /// A conversion surface could not be allocated or was already released.
    #[error("Graphics context error: {0}")]
    GraphicsContext(String),

    /// The codec rejected the requested format (unknown mime, unsupported
    /// dimensions, missing encoder).
    #[error("Codec configuration error: {0}")]
    CodecConfiguration(String),

    /// The encoder was asked to encode an empty image sequence.
    #[error("No frames to encode")]
    EmptyFrameSet,

    /// The platform ran out of codec sessions or memory.
    #[error("Codec resources exhausted: {0}")]
    ResourceExhaustion(String),

    /// An opaque decode / encode / mux failure.
    #[error("Processing error: {0}")]
    Processing(String),

    /// A requested extraction timestamp was negative or not finite.
    #[error("Invalid timestamp: {0}s")]
    InvalidTimestamp(f64),

    /// The operation was stopped through a
    /// [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate while decoding or compressing a frame.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),
}

impl FrameCodecError {
    /// Wrap an FFmpeg error with a short description of what was attempted.
    pub(crate) fn from_ffmpeg(context: &str, error: FfmpegError) -> Self {
        match error {
            FfmpegError::Other { errno } if errno == ENOMEM => {
                FrameCodecError::ResourceExhaustion(format!("{context}: {error}"))
            }
            other => FrameCodecError::Processing(format!("{context}: {other}")),
        }
    }
}

impl From<FfmpegError> for FrameCodecError {
    fn from(error: FfmpegError) -> Self {
        FrameCodecError::from_ffmpeg("FFmpeg error", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enomem_maps_to_resource_exhaustion() {
        let error = FrameCodecError::from(FfmpegError::Other { errno: ENOMEM });
        assert!(matches!(error, FrameCodecError::ResourceExhaustion(_)));
    }

    #[test]
    fn other_ffmpeg_errors_are_processing() {
        let error = FrameCodecError::from_ffmpeg("send_packet", FfmpegError::InvalidData);
        match error {
            FrameCodecError::Processing(message) => assert!(message.starts_with("send_packet")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
