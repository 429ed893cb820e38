//! Frame-accurate still extraction.
//!
//! [`FrameExtractor`] decodes a video from the first frame to the last and
//! persists the frames whose stream position matches a requested timestamp.
//! No seeking is involved, so the frame written for `t` seconds is always
//! frame `⌊t × fps⌋`, independent of key frame placement.
//!
//! # Example
//!
//! ```no_run
//! use framecodec::{ExtractOptions, FfmpegBackend, FrameExtractor, FrameCodecError};
//!
//! let extractor = FrameExtractor::new(FfmpegBackend::new());
//! let summary = extractor.extract("input.mp4", &[0.5, 1.0, 1.5], "frames", &ExtractOptions::new())?;
//! for file in &summary.files {
//!     println!("{}", file.display());
//! }
//! # Ok::<(), FrameCodecError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{InputBuffer, MediaBackend, MediaSource, OutputStatus, TrackFormat, VideoDecoder};
use crate::configuration::ExtractOptions;
use crate::error::FrameCodecError;
use crate::files::{frame_file_name, remove_directory};
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::selection::FrameSelectionSet;
use crate::surface::SurfaceBridge;

/// Result of a finished extraction.
#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    /// Directory the frames were written to.
    pub output_dir: PathBuf,
    /// Written files, in write order.
    pub files: Vec<PathBuf>,
    /// Frames the decoder produced.
    pub decoded_frames: u64,
    /// Frame count derived from the track's duration and frame rate.
    pub total_frames: u64,
    /// The terminal progress event (always 100%).
    pub completion: ProgressEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Opened,
    Feeding,
    Draining,
    Finished,
    Failed,
    Cancelled,
}

fn transition(phase: &mut Phase, next: Phase) {
    log::debug!("Extractor {phase:?} -> {next:?}");
    *phase = next;
}

/// What the caller asked for, before the frame rate is known.
enum Request<'a> {
    Timestamps(&'a [f64]),
    Indices(Vec<u64>),
}

/// Drives a decoder over one source per call.
///
/// Each call owns its own source, decoder, and [`SurfaceBridge`]; all of them
/// are released on every exit path.
pub struct FrameExtractor<B: MediaBackend> {
    backend: B,
}

impl<B: MediaBackend> FrameExtractor<B> {
    /// Create an extractor on top of `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Persist the frames at `timestamps` (seconds) into `output_dir`.
    ///
    /// The output directory is created if needed, but only once the source
    /// has been opened and a video track found. Files are named
    /// `image_001.jpg`, `image_002.jpg`, ... in stream order; timestamps that
    /// map to the same frame produce one file.
    ///
    /// # Errors
    ///
    /// - [`FrameCodecError::SourceUnreadable`] if the source cannot be opened.
    /// - [`FrameCodecError::NoVideoTrack`] if it has no video track.
    /// - [`FrameCodecError::InvalidTimestamp`] for negative or non-finite times.
    /// - [`FrameCodecError::GraphicsContext`] if the surface cannot be allocated.
    /// - [`FrameCodecError::Cancelled`] if the token was cancelled.
    /// - Any codec, image, or I/O error raised while decoding.
    ///
    /// On failure the files written by this call are removed again, together
    /// with the output directory if this call created it.
    pub fn extract(
        &self,
        source: impl AsRef<Path>,
        timestamps: &[f64],
        output_dir: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractionSummary, FrameCodecError> {
        self.run(source.as_ref(), Request::Timestamps(timestamps), output_dir.as_ref(), options)
    }

    /// Like [`extract`](FrameExtractor::extract), with frame indices instead
    /// of timestamps.
    pub fn extract_frames(
        &self,
        source: impl AsRef<Path>,
        frame_indices: &[u64],
        output_dir: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractionSummary, FrameCodecError> {
        self.run(
            source.as_ref(),
            Request::Indices(frame_indices.to_vec()),
            output_dir.as_ref(),
            options,
        )
    }

    fn run(
        &self,
        source_path: &Path,
        request: Request<'_>,
        output_dir: &Path,
        options: &ExtractOptions,
    ) -> Result<ExtractionSummary, FrameCodecError> {
        let mut phase = Phase::Idle;
        let mut tracker = ProgressTracker::new(options.progress.clone());
        log::info!("Extracting frames from {} into {}", source_path.display(), output_dir.display());

        let opened = self.open(source_path, request);
        let (mut source, track_index, track, selection) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                transition(&mut phase, Phase::Failed);
                return Err(error);
            }
        };
        transition(&mut phase, Phase::Opened);

        let total_frames = track.total_frames();
        log::debug!(
            "Track {track_index}: {} {}x{} @ {} fps, {} frames, selected {:?}",
            track.mime,
            track.width,
            track.height,
            track.frame_rate,
            total_frames,
            selection.indices()
        );
        for index in selection.beyond(total_frames) {
            log::warn!("Requested frame {index} is beyond the declared {total_frames} frames");
        }

        let bridge = SurfaceBridge::new();
        let mut session = ExtractionSession {
            output_dir: output_dir.to_path_buf(),
            created_dir: false,
            files: Vec::new(),
        };

        let result = self
            .configure(&bridge, &source, track_index, &track)
            .and_then(|mut decoder| {
                session.prepare_output_dir()?;
                let decoded = decode_loop(
                    &mut phase,
                    &mut source,
                    &mut decoder,
                    &bridge,
                    &selection,
                    total_frames,
                    &mut session,
                    &mut tracker,
                    options,
                );
                drop(decoder);
                decoded
            });
        bridge.release();
        drop(source);

        match result {
            Ok(decoded_frames) => {
                transition(&mut phase, Phase::Finished);
                let completion = tracker.finish(
                    Some(format!("saved {} frames", session.files.len())),
                    Some(session.output_dir.clone()),
                );
                log::info!(
                    "Saved {} of {} decoded frames to {}",
                    session.files.len(),
                    decoded_frames,
                    session.output_dir.display()
                );
                Ok(ExtractionSummary {
                    output_dir: session.output_dir,
                    files: session.files,
                    decoded_frames,
                    total_frames,
                    completion,
                })
            }
            Err(FrameCodecError::Cancelled) => {
                transition(&mut phase, Phase::Cancelled);
                Err(FrameCodecError::Cancelled)
            }
            Err(error) => {
                transition(&mut phase, Phase::Failed);
                log::warn!("Extraction failed: {error}");
                session.discard();
                Err(error)
            }
        }
    }

    fn open(
        &self,
        source_path: &Path,
        request: Request<'_>,
    ) -> Result<(B::Source, usize, TrackFormat, FrameSelectionSet), FrameCodecError> {
        let mut source = self.backend.open_source(source_path)?;
        let track_index = source
            .tracks()
            .iter()
            .position(TrackFormat::is_video)
            .ok_or(FrameCodecError::NoVideoTrack)?;
        let track = source.tracks()[track_index].clone();
        source.select_track(track_index)?;

        let selection = match request {
            Request::Timestamps(timestamps) => {
                FrameSelectionSet::from_timestamps(timestamps, track.frame_rate)?
            }
            Request::Indices(indices) => FrameSelectionSet::from_indices(indices),
        };
        Ok((source, track_index, track, selection))
    }

    fn configure(
        &self,
        bridge: &SurfaceBridge,
        source: &B::Source,
        track_index: usize,
        track: &TrackFormat,
    ) -> Result<B::Decoder, FrameCodecError> {
        let surface = bridge.acquire_for_decode(track.width, track.height)?;
        self.backend.create_decoder(source, track_index, surface)
    }
}

/// Output side of one extraction call.
struct ExtractionSession {
    output_dir: PathBuf,
    created_dir: bool,
    files: Vec<PathBuf>,
}

impl ExtractionSession {
    fn prepare_output_dir(&mut self) -> Result<(), FrameCodecError> {
        if !self.output_dir.is_dir() {
            fs::create_dir_all(&self.output_dir)?;
            self.created_dir = true;
        }
        Ok(())
    }

    fn persist(&mut self, bytes: &[u8], prefix: &str, extension: &str) -> Result<PathBuf, FrameCodecError> {
        let path = self
            .output_dir
            .join(frame_file_name(prefix, self.files.len() + 1, extension));
        fs::write(&path, bytes)?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Undo the visible effects of a failed run.
    fn discard(&mut self) {
        if self.created_dir {
            remove_directory(&self.output_dir);
        } else {
            for file in &self.files {
                if let Err(error) = fs::remove_file(file) {
                    log::warn!("Failed to delete {}: {error}", file.display());
                }
            }
        }
        self.files.clear();
    }
}

/// Feed and drain the decoder until it reports end of stream.
///
/// Returns the number of decoded frames.
#[allow(clippy::too_many_arguments)]
fn decode_loop<S: MediaSource, D: VideoDecoder>(
    phase: &mut Phase,
    source: &mut S,
    decoder: &mut D,
    bridge: &SurfaceBridge,
    selection: &FrameSelectionSet,
    total_frames: u64,
    session: &mut ExtractionSession,
    tracker: &mut ProgressTracker,
    options: &ExtractOptions,
) -> Result<u64, FrameCodecError> {
    let extension = options.still_format.extension();
    let mut input_done = false;
    let mut output_done = false;
    let mut input_chunks = 0u64;
    let mut decode_count = 0u64;

    transition(phase, Phase::Feeding);
    while !output_done {
        if options.is_cancelled() {
            return Err(FrameCodecError::Cancelled);
        }

        if !input_done {
            if let Some(slot) = decoder.dequeue_input_buffer(options.poll_timeout)? {
                match source.read_sample()? {
                    Some(sample) => {
                        decoder.queue_input_buffer(slot, InputBuffer::Sample(sample))?;
                        input_chunks += 1;
                    }
                    None => {
                        decoder.queue_input_buffer(slot, InputBuffer::EndOfStream)?;
                        input_done = true;
                        log::debug!("Sent input end of stream after {input_chunks} samples");
                        transition(phase, Phase::Draining);
                    }
                }
            }
        }

        match decoder.dequeue_output_buffer(options.poll_timeout)? {
            OutputStatus::TryAgainLater => {}
            OutputStatus::FormatChanged(_) => log::debug!("Decoder output format changed"),
            OutputStatus::Buffer { slot, buffer: info } => {
                if info.flags.end_of_stream {
                    log::debug!("Decoder reported output end of stream");
                    output_done = true;
                }

                let render = info.size != 0;
                decoder.release_output_buffer(slot, render)?;
                if !render {
                    continue;
                }

                if !bridge.await_frame_ready(options.frame_wait_timeout)? {
                    return Err(FrameCodecError::Processing(format!(
                        "frame {decode_count} never reached the surface"
                    )));
                }

                if selection.contains(decode_count) {
                    let bytes = bridge.read_current_frame_as_image(options.still_format)?;
                    let path = session.persist(&bytes, &options.file_prefix, extension)?;
                    log::debug!("Saved frame {decode_count} to {}", path.display());
                    tracker.report(decode_count, total_frames, Some(path));
                } else {
                    bridge.discard_current_frame()?;
                }
                decode_count += 1;
            }
        }
    }

    Ok(decode_count)
}
