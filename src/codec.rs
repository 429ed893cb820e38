//! Codec backend contract.
//!
//! The pipelines drive every codec the way a hardware codec is driven:
//! dequeue an input slot, fill and queue it, then poll for output with a
//! bounded timeout and release each output buffer when done. Completion is
//! signalled through buffer flags, never through return values of the call
//! that produced the work.
//!
//! A [`MediaBackend`] bundles the four collaborators a pipeline needs: a
//! source (demuxer), a decoder, an encoder, and a muxer. The crate ships
//! [`FfmpegBackend`](crate::FfmpegBackend); tests use scripted in-memory
//! backends.

use std::path::Path;
use std::time::Duration;

use crate::conversion::PixelLayout;
use crate::error::FrameCodecError;
use crate::surface::{DecodeSurface, EncodeSurface};

/// Description of one track in a source.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    /// Mime type, e.g. `video/avc` or `audio/mp4a-latm`.
    pub mime: String,
    /// Frame width in pixels (0 for non-video tracks).
    pub width: u32,
    /// Frame height in pixels (0 for non-video tracks).
    pub height: u32,
    /// Nominal frames per second (0 when unknown).
    pub frame_rate: f64,
    /// Track duration in microseconds.
    pub duration_us: i64,
}

impl TrackFormat {
    /// Whether this is a video track.
    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    /// Frame count derived from duration and frame rate, truncated.
    pub fn total_frames(&self) -> u64 {
        if self.duration_us <= 0 || self.frame_rate <= 0.0 {
            return 0;
        }
        (self.duration_us as f64 * self.frame_rate / 1_000_000.0) as u64
    }
}

/// One compressed sample read from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Compressed bytes.
    pub data: Vec<u8>,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    /// Whether the sample is a key frame.
    pub key_frame: bool,
}

/// What the pipeline puts into a decoder input slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputBuffer {
    /// A compressed sample.
    Sample(Sample),
    /// No more input follows.
    EndOfStream,
}

/// Flags attached to an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags {
    /// The last buffer the codec will produce.
    pub end_of_stream: bool,
    /// The buffer holds a key frame.
    pub key_frame: bool,
    /// The buffer holds codec configuration data, not media.
    pub codec_config: bool,
}

/// Metadata of a decoded output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Payload size in bytes; 0 for an empty (end-of-stream only) buffer.
    pub size: usize,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

/// A compressed buffer produced by an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Compressed bytes.
    pub data: Vec<u8>,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

/// Output stream format an encoder announces before its first sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFormat {
    /// Mime type of the compressed stream.
    pub mime: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub frame_rate: u32,
    /// Codec-specific setup data (SPS/PPS and the like).
    pub extradata: Vec<u8>,
}

/// Requested encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderFormat {
    /// Output mime type.
    pub mime: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub frame_rate: u32,
    /// Average bit rate in bits per second.
    pub bit_rate: u32,
    /// Seconds between key frames; 0 means every frame is a key frame.
    pub i_frame_interval: u32,
    /// Requested encoder input layout. A backend may open the codec with
    /// another YUV layout the codec supports.
    pub input_layout: PixelLayout,
}

/// Result of polling a codec for output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus<T> {
    /// Nothing is ready yet.
    TryAgainLater,
    /// The output format changed. Decoders report it for information;
    /// encoders report it exactly once, before the first sample.
    FormatChanged(Option<EncodedFormat>),
    /// A buffer is ready. Decoders hand back the slot to release.
    Buffer {
        /// Slot to pass to `release_output_buffer` (decoders only).
        slot: usize,
        /// The buffer content or metadata.
        buffer: T,
    },
}

/// An open compressed source.
pub trait MediaSource: Send {
    /// Every track in the source, in container order.
    fn tracks(&self) -> &[TrackFormat];

    /// Restrict [`read_sample`](MediaSource::read_sample) to one track.
    fn select_track(&mut self, index: usize) -> Result<(), FrameCodecError>;

    /// Read the next sample of the selected track, `None` at the end.
    fn read_sample(&mut self) -> Result<Option<Sample>, FrameCodecError>;
}

/// A decoder rendering into a [`DecodeSurface`].
pub trait VideoDecoder: Send {
    /// Claim a free input slot, waiting up to `timeout`.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>, FrameCodecError>;

    /// Queue input into a slot obtained from
    /// [`dequeue_input_buffer`](VideoDecoder::dequeue_input_buffer).
    fn queue_input_buffer(&mut self, slot: usize, input: InputBuffer) -> Result<(), FrameCodecError>;

    /// Poll for a decoded buffer, waiting up to `timeout`.
    fn dequeue_output_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<OutputStatus<BufferInfo>, FrameCodecError>;

    /// Return an output slot. With `render` the frame is converted and
    /// posted to the decode surface, possibly asynchronously.
    fn release_output_buffer(&mut self, slot: usize, render: bool) -> Result<(), FrameCodecError>;
}

/// An encoder fed from an [`EncodeSurface`].
pub trait VideoEncoder: Send {
    /// Poll for compressed output, waiting up to `timeout`.
    fn dequeue_output_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<OutputStatus<EncodedSample>, FrameCodecError>;

    /// No more frames will be submitted to the input surface.
    fn signal_end_of_input_stream(&mut self) -> Result<(), FrameCodecError>;
}

/// Packages one compressed video track into a container.
pub trait Muxer: Send {
    /// Add the video track. Must precede [`start`](Muxer::start).
    fn add_track(&mut self, format: &EncodedFormat) -> Result<usize, FrameCodecError>;

    /// Write the container header.
    fn start(&mut self) -> Result<(), FrameCodecError>;

    /// Write one sample of `track`.
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), FrameCodecError>;

    /// Write the trailer and close the file.
    fn finish(&mut self) -> Result<(), FrameCodecError>;
}

/// Factory for the collaborators of one pipeline run.
pub trait MediaBackend: Send {
    /// Demuxer type.
    type Source: MediaSource;
    /// Decoder type.
    type Decoder: VideoDecoder;
    /// Encoder type.
    type Encoder: VideoEncoder;
    /// Muxer type.
    type Muxer: Muxer;

    /// Open a compressed source.
    ///
    /// # Errors
    ///
    /// [`FrameCodecError::SourceUnreadable`] if the path cannot be read or
    /// parsed.
    fn open_source(&self, path: &Path) -> Result<Self::Source, FrameCodecError>;

    /// Create a decoder for the source's selected track, rendering into
    /// `surface`.
    fn create_decoder(
        &self,
        source: &Self::Source,
        track: usize,
        surface: DecodeSurface,
    ) -> Result<Self::Decoder, FrameCodecError>;

    /// Create an encoder consuming frames from `surface`.
    fn create_encoder(
        &self,
        format: &EncoderFormat,
        surface: EncodeSurface,
    ) -> Result<Self::Encoder, FrameCodecError>;

    /// Create a muxer writing to `path`.
    fn create_muxer(&self, path: &Path) -> Result<Self::Muxer, FrameCodecError>;

    /// Layout submitted frames are stored in on the encode surface.
    ///
    /// Defaults to the encoder's input layout. Backends that convert
    /// colour themselves ask for [`PixelLayout::Rgb24`].
    fn encode_surface_layout(&self, format: &EncoderFormat) -> PixelLayout {
        format.input_layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_frames_truncates() {
        let track = TrackFormat {
            mime: "video/avc".into(),
            width: 640,
            height: 480,
            frame_rate: 30.0,
            duration_us: 2_033_333,
        };
        assert!(track.is_video());
        assert_eq!(track.total_frames(), 60);
    }

    #[test]
    fn unknown_rate_means_unknown_length() {
        let track = TrackFormat {
            mime: "audio/mp4a-latm".into(),
            width: 0,
            height: 0,
            frame_rate: 0.0,
            duration_us: 1_000_000,
        };
        assert!(!track.is_video());
        assert_eq!(track.total_frames(), 0);
    }
}
