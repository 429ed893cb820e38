//! Frame sequence encoding.
//!
//! [`FrameEncoder`] feeds still images one at a time through an encode
//! surface into a video encoder and muxes the compressed output into a
//! container. Encoder output lags input by a few frames, so available output
//! is drained after every submitted frame and once more, until end of stream,
//! after the last.
//!
//! # Example
//!
//! ```no_run
//! use framecodec::{EncodeOptions, FfmpegBackend, FrameEncoder, FrameCodecError};
//!
//! let encoder = FrameEncoder::new(FfmpegBackend::new());
//! let options = EncodeOptions::new().with_frame_rate(24);
//! let summary = encoder.encode_directory("frames", "output.mp4", &options)?;
//! println!("wrote {} frames to {}", summary.frames, summary.output.display());
//! # Ok::<(), FrameCodecError>(())
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::codec::{EncoderFormat, MediaBackend, Muxer, OutputStatus, VideoEncoder};
use crate::configuration::EncodeOptions;
use crate::error::FrameCodecError;
use crate::files::{list_frames, remove_directory};
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::surface::SurfaceBridge;

/// Result of a finished encode.
#[derive(Debug, Clone)]
pub struct EncodingSummary {
    /// The written video file.
    pub output: PathBuf,
    /// Number of frames submitted to the encoder.
    pub frames: u64,
    /// Number of compressed samples written to the container.
    pub samples_written: u64,
    /// Encoded frame size.
    pub width: u32,
    /// Encoded frame size.
    pub height: u32,
    /// The terminal progress event (always 100%).
    pub completion: ProgressEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Configured,
    Encoding,
    Draining,
    Finished,
    Failed,
    Cancelled,
}

fn transition(phase: &mut Phase, next: Phase) {
    log::debug!("Encoder {phase:?} -> {next:?}");
    *phase = next;
}

/// Encodes image sequences into video files.
pub struct FrameEncoder<B: MediaBackend> {
    backend: B,
}

impl<B: MediaBackend> FrameEncoder<B> {
    /// Create an encoder on top of `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Encode every regular file in `frames_dir`, in file-name order.
    ///
    /// With [`EncodeOptions::with_delete_frames_on_complete`] the directory is
    /// deleted after a successful encode.
    ///
    /// # Errors
    ///
    /// See [`encode_frames`](FrameEncoder::encode_frames); listing failures
    /// surface as [`FrameCodecError::Io`].
    pub fn encode_directory(
        &self,
        frames_dir: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &EncodeOptions,
    ) -> Result<EncodingSummary, FrameCodecError> {
        let frames_dir = frames_dir.as_ref();
        let frames = list_frames(frames_dir)?;
        let summary = self.encode_frames(&frames, output, options)?;

        if options.delete_frames_on_complete {
            let deleted = remove_directory(frames_dir);
            log::info!("Deleted frame directory {}: {deleted}", frames_dir.display());
        }
        Ok(summary)
    }

    /// Encode `frames` in the given order into `output`.
    ///
    /// The frame size is taken from the first image (rounded down to even
    /// dimensions); later images of a different size are resized. Frame `i`
    /// is presented at `i × 1_000_000 / frame_rate` microseconds.
    ///
    /// # Errors
    ///
    /// - [`FrameCodecError::EmptyFrameSet`] if `frames` is empty; nothing is
    ///   allocated in that case.
    /// - [`FrameCodecError::CodecConfiguration`] if the encoder rejects the
    ///   format.
    /// - [`FrameCodecError::Cancelled`] if the token was cancelled.
    /// - Any image, codec, or muxer error raised while encoding.
    ///
    /// A partially written output file is left in place on failure.
    pub fn encode_frames(
        &self,
        frames: &[PathBuf],
        output: impl AsRef<Path>,
        options: &EncodeOptions,
    ) -> Result<EncodingSummary, FrameCodecError> {
        let output = output.as_ref();
        let mut phase = Phase::Idle;
        let mut tracker = ProgressTracker::new(options.progress.clone());
        log::info!(
            "Encoding {} frames to {} ({}, {} fps)",
            frames.len(),
            output.display(),
            options.mime_type,
            options.frame_rate
        );

        let Some(first) = frames.first() else {
            transition(&mut phase, Phase::Failed);
            return Err(FrameCodecError::EmptyFrameSet);
        };

        let bridge = SurfaceBridge::new();
        let result = self
            .configure(&bridge, first, output, options)
            .and_then(|(encoder, muxer, format)| {
                transition(&mut phase, Phase::Configured);
                let mut session = EncodingSession {
                    pending: frames.iter().cloned().collect(),
                    encoder,
                    muxer,
                    track: None,
                    frame_index: 0,
                    samples_written: 0,
                };
                session
                    .run(&mut phase, &bridge, &mut tracker, options)
                    .map(|()| (session.frame_index, session.samples_written, format))
            });
        bridge.release();

        match result {
            Ok((frame_count, samples_written, format)) => {
                transition(&mut phase, Phase::Finished);
                let completion = tracker.finish(
                    Some(format!("encoded {frame_count} frames")),
                    Some(output.to_path_buf()),
                );
                log::info!("Wrote {samples_written} samples to {}", output.display());
                Ok(EncodingSummary {
                    output: output.to_path_buf(),
                    frames: frame_count,
                    samples_written,
                    width: format.width,
                    height: format.height,
                    completion,
                })
            }
            Err(FrameCodecError::Cancelled) => {
                transition(&mut phase, Phase::Cancelled);
                Err(FrameCodecError::Cancelled)
            }
            Err(error) => {
                transition(&mut phase, Phase::Failed);
                log::warn!("Encoding failed: {error}");
                Err(error)
            }
        }
    }

    fn configure(
        &self,
        bridge: &SurfaceBridge,
        first: &Path,
        output: &Path,
        options: &EncodeOptions,
    ) -> Result<(B::Encoder, B::Muxer, EncoderFormat), FrameCodecError> {
        // Only the size is needed here; the pixels are decoded per frame later.
        let (width, height) = image::image_dimensions(first)?;
        let width = (width & !1).max(2);
        let height = (height & !1).max(2);

        let format = EncoderFormat {
            mime: options.mime_type.clone(),
            width,
            height,
            frame_rate: options.frame_rate,
            bit_rate: options.bit_rate,
            i_frame_interval: options.i_frame_interval,
            input_layout: options.input_layout,
        };

        let surface = bridge.acquire_for_encode(width, height, self.backend.encode_surface_layout(&format))?;
        let encoder = self.backend.create_encoder(&format, surface)?;
        let muxer = self.backend.create_muxer(output)?;
        Ok((encoder, muxer, format))
    }
}

/// Mutable state of one encode call.
struct EncodingSession<E, M> {
    pending: VecDeque<PathBuf>,
    encoder: E,
    muxer: M,
    track: Option<usize>,
    frame_index: u64,
    samples_written: u64,
}

impl<E: VideoEncoder, M: Muxer> EncodingSession<E, M> {
    fn run(
        &mut self,
        phase: &mut Phase,
        bridge: &SurfaceBridge,
        tracker: &mut ProgressTracker,
        options: &EncodeOptions,
    ) -> Result<(), FrameCodecError> {
        let last_index = self.pending.len().saturating_sub(1) as u64;

        transition(phase, Phase::Encoding);
        while let Some(path) = self.pending.pop_front() {
            if options.is_cancelled() {
                return Err(FrameCodecError::Cancelled);
            }

            let image = image::open(&path)?;
            let presentation_time_us = options.presentation_time_us(self.frame_index);
            bridge.submit_bitmap_frame(&image, presentation_time_us)?;
            drop(image);
            log::debug!("Submitted {} at {presentation_time_us}us", path.display());

            self.drain(false, options)?;
            tracker.report(self.frame_index, last_index, None);
            self.frame_index += 1;
        }

        transition(phase, Phase::Draining);
        self.encoder.signal_end_of_input_stream()?;
        self.drain(true, options)?;

        if self.track.is_none() {
            return Err(FrameCodecError::Processing(
                "encoder finished without announcing an output format".to_string(),
            ));
        }
        self.muxer.finish()
    }

    /// Move encoder output into the muxer.
    ///
    /// Without `until_end_of_stream`, stops as soon as the encoder has
    /// nothing ready.
    fn drain(&mut self, until_end_of_stream: bool, options: &EncodeOptions) -> Result<(), FrameCodecError> {
        let mut last_output = Instant::now();
        loop {
            if until_end_of_stream && options.is_cancelled() {
                return Err(FrameCodecError::Cancelled);
            }

            match self.encoder.dequeue_output_buffer(options.poll_timeout)? {
                OutputStatus::TryAgainLater => {
                    if !until_end_of_stream {
                        return Ok(());
                    }
                    if last_output.elapsed() > options.drain_timeout {
                        return Err(FrameCodecError::Processing(format!(
                            "encoder produced no output for {:?} while draining",
                            options.drain_timeout
                        )));
                    }
                }
                OutputStatus::FormatChanged(format) => {
                    last_output = Instant::now();
                    let format = format.ok_or_else(|| {
                        FrameCodecError::Processing("encoder changed format without describing it".to_string())
                    })?;
                    if self.track.is_some() {
                        return Err(FrameCodecError::Processing("encoder format changed twice".to_string()));
                    }
                    log::debug!("Encoder output format: {} {}x{}", format.mime, format.width, format.height);
                    self.track = Some(self.muxer.add_track(&format)?);
                    self.muxer.start()?;
                }
                OutputStatus::Buffer { buffer: sample, .. } => {
                    last_output = Instant::now();
                    if sample.flags.codec_config {
                        log::debug!("Skipping {} bytes of codec config", sample.data.len());
                    } else if !sample.data.is_empty() {
                        let track = self.track.ok_or_else(|| {
                            FrameCodecError::Processing("encoder produced output before its format".to_string())
                        })?;
                        self.muxer.write_sample(track, &sample)?;
                        self.samples_written += 1;
                    }

                    if sample.flags.end_of_stream {
                        log::debug!("Encoder reported output end of stream");
                        return Ok(());
                    }
                }
            }
        }
    }
}
