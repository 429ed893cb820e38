//! # framecodec
//!
//! Frame-accurate still extraction from video, and re-encoding of still
//! frame sequences into video, driven through a buffer-slot codec API.
//!
//! Extraction never seeks. The source is decoded from the first frame to the
//! last, every decoded frame is rendered into a conversion surface, and only
//! the frames whose stream position matches a requested timestamp are
//! persisted. The still written for `t` seconds is therefore always frame
//! `⌊t × fps⌋`, regardless of key frame placement.
//!
//! Encoding goes the other way: images are scaled onto an encode surface one
//! at a time, the encoder's compressed output is drained after every frame,
//! and the samples are muxed into a container.
//!
//! Codecs are reached through the traits in [`codec`]; the crate ships an
//! FFmpeg implementation built on
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next).
//!
//! ## Quick Start
//!
//! ### Extract Stills
//!
//! ```no_run
//! use framecodec::{ExtractOptions, FfmpegBackend, FrameExtractor};
//!
//! let extractor = FrameExtractor::new(FfmpegBackend::new());
//! let summary = extractor
//!     .extract("input.mp4", &[0.5, 1.0, 1.5], "frames", &ExtractOptions::new())
//!     .unwrap();
//! assert_eq!(summary.completion.percent, 100);
//! ```
//!
//! ### Encode a Frame Directory
//!
//! ```no_run
//! use framecodec::{EncodeOptions, FfmpegBackend, FrameEncoder};
//!
//! let encoder = FrameEncoder::new(FfmpegBackend::new());
//! let options = EncodeOptions::new().with_frame_rate(24).with_bit_rate(8_000_000);
//! encoder.encode_directory("frames", "output.mp4", &options).unwrap();
//! ```
//!
//! ### Watch Progress from Another Thread
//!
//! ```no_run
//! use framecodec::{ExtractOptions, FfmpegBackend, PipelineEvent, stream};
//!
//! let events = stream::spawn_extraction(
//!     FfmpegBackend::new(),
//!     "input.mp4",
//!     vec![2.0],
//!     "frames",
//!     ExtractOptions::new(),
//! )
//! .unwrap();
//! for event in events {
//!     if let PipelineEvent::Progress(progress) = event {
//!         println!("{}%", progress.percent);
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Decode-and-discard extraction**: exact frame selection by timestamp
//!   or index, JPEG or PNG output
//! - **Surface bridge**: a single-slot handoff between codec and pipeline
//!   with a bounded wait
//! - **Image sequence encoding**: H.264, HEVC, MPEG-4, VP8, VP9, AV1 via
//!   mime types
//! - **Progress & cancellation**: monotonic percentages, a
//!   `CancellationToken`, and a channel-backed `EventStream`
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `EventStream` implements `tokio_stream::Stream` |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod codec;
pub mod configuration;
pub mod conversion;
pub mod encode;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod files;
pub mod progress;
pub mod selection;
pub mod stream;
pub mod surface;

pub use codec::{
    BufferFlags, BufferInfo, EncodedFormat, EncodedSample, EncoderFormat, InputBuffer, MediaBackend, MediaSource,
    Muxer, OutputStatus, Sample, TrackFormat, VideoDecoder, VideoEncoder,
};
pub use configuration::{EncodeOptions, ExtractOptions, StillFormat};
pub use conversion::{PixelBuffer, PixelLayout};
pub use encode::{EncodingSummary, FrameEncoder};
pub use error::FrameCodecError;
pub use extract::{ExtractionSummary, FrameExtractor};
pub use ffmpeg::{FfmpegBackend, FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use progress::{CancellationToken, ProgressEvent, ProgressSink};
pub use selection::FrameSelectionSet;
pub use stream::{EventStream, PipelineEvent};
pub use surface::{DecodeSurface, EncodeSurface, SurfaceBridge, SurfaceFrame};
