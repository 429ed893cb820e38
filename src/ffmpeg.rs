//! FFmpeg backend and log level configuration.
//!
//! [`FfmpegBackend`] implements the [`codec`](crate::codec) contract on top of
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next). FFmpeg codecs are
//! synchronous (`send_packet` / `receive_frame`), so the slot protocol maps
//! onto them directly: there is a single input slot and a single output slot,
//! and a poll that finds nothing ready answers
//! [`TryAgainLater`](OutputStatus::TryAgainLater) immediately.
//!
//! FFmpeg also has its own internal logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) crate. By default it prints warnings
//! and errors to stderr; [`set_ffmpeg_log_level`] tunes or silences that
//! output without importing `ffmpeg-next` directly.
//!
//! # Example
//!
//! ```no_run
//! use framecodec::{FfmpegLogLevel, FrameExtractor, FfmpegBackend, ExtractOptions};
//!
//! framecodec::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//!
//! let extractor = FrameExtractor::new(FfmpegBackend::new());
//! extractor.extract("input.mp4", &[1.0], "frames", &ExtractOptions::new())?;
//! # Ok::<(), framecodec::FrameCodecError>(())
//! ```

use std::path::{Path, PathBuf};
use std::ptr;
use std::time::Duration;

use ffmpeg_next::{
    Packet, Rational, Rescale,
    codec::{Id, context::Context as CodecContext, packet::Flags as PacketFlags},
    decoder, encoder,
    error::EAGAIN,
    format::{self, Pixel},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};

use crate::codec::{
    BufferFlags, BufferInfo, EncodedFormat, EncodedSample, EncoderFormat, InputBuffer, MediaBackend, MediaSource,
    Muxer, OutputStatus, Sample, TrackFormat, VideoDecoder, VideoEncoder,
};
use crate::conversion::{PixelBuffer, PixelLayout, pack_plane};
use crate::error::FrameCodecError;
use crate::surface::{DecodeSurface, EncodeSurface};

/// Microsecond time base used at every crate boundary.
const MICROSECONDS: Rational = Rational(1, 1_000_000);

/// Mime types the backend knows, with their FFmpeg codec ids.
const MIME_CODECS: &[(&str, Id)] = &[
    ("video/avc", Id::H264),
    ("video/hevc", Id::HEVC),
    ("video/mp4v-es", Id::MPEG4),
    ("video/x-vnd.on2.vp8", Id::VP8),
    ("video/x-vnd.on2.vp9", Id::VP9),
    ("video/av01", Id::AV1),
    ("audio/mp4a-latm", Id::AAC),
    ("audio/mpeg", Id::MP3),
    ("audio/opus", Id::OPUS),
];

/// FFmpeg codec id for a mime type.
pub fn codec_for_mime(mime: &str) -> Option<Id> {
    MIME_CODECS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(mime))
        .map(|&(_, id)| id)
}

/// Mime type for an FFmpeg codec id. Unknown codecs get an `x-` subtype
/// built from the codec name.
pub fn mime_for_codec(id: Id, medium: Type) -> String {
    if let Some((mime, _)) = MIME_CODECS.iter().find(|(_, known)| *known == id) {
        return (*mime).to_string();
    }
    let top = match medium {
        Type::Video => "video",
        Type::Audio => "audio",
        Type::Subtitle => "text",
        _ => "application",
    };
    format!("{top}/x-{}", id.name())
}

fn initialize() -> Result<(), FrameCodecError> {
    // Safe to call multiple times.
    ffmpeg_next::init().map_err(|error| FrameCodecError::from_ffmpeg("FFmpeg initialisation failed", error))
}

fn is_again(error: &ffmpeg_next::Error) -> bool {
    matches!(error, ffmpeg_next::Error::Other { errno } if *errno == EAGAIN)
}

fn rational_to_f64(rate: Rational) -> f64 {
    if rate.denominator() != 0 && rate.numerator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    }
}

/// The FFmpeg implementation of [`MediaBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Create the backend. FFmpeg is initialised lazily on first use.
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    type Source = FfmpegSource;
    type Decoder = FfmpegDecoder;
    type Encoder = FfmpegEncoder;
    type Muxer = FfmpegMuxer;

    fn open_source(&self, path: &Path) -> Result<FfmpegSource, FrameCodecError> {
        FfmpegSource::open(path)
    }

    fn create_decoder(
        &self,
        source: &FfmpegSource,
        track: usize,
        surface: DecodeSurface,
    ) -> Result<FfmpegDecoder, FrameCodecError> {
        FfmpegDecoder::new(source, track, surface)
    }

    fn create_encoder(
        &self,
        format: &EncoderFormat,
        surface: EncodeSurface,
    ) -> Result<FfmpegEncoder, FrameCodecError> {
        FfmpegEncoder::new(format, surface)
    }

    fn create_muxer(&self, path: &Path) -> Result<FfmpegMuxer, FrameCodecError> {
        FfmpegMuxer::create(path)
    }

    /// Frames stay RGB until swscale converts them for the encoder.
    fn encode_surface_layout(&self, _format: &EncoderFormat) -> PixelLayout {
        PixelLayout::Rgb24
    }
}

/// A demuxed input file.
pub struct FfmpegSource {
    input: format::context::Input,
    path: PathBuf,
    tracks: Vec<TrackFormat>,
    time_bases: Vec<Rational>,
    selected: Option<usize>,
}

impl FfmpegSource {
    fn open(path: &Path) -> Result<Self, FrameCodecError> {
        let unreadable = |reason: String| FrameCodecError::SourceUnreadable {
            path: path.to_path_buf(),
            reason,
        };
        initialize()?;

        let input = format::input(&path).map_err(|error| unreadable(error.to_string()))?;
        let container_duration_us = input.duration();

        let mut tracks = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            let parameters = stream.parameters();
            let medium = parameters.medium();
            let mime = mime_for_codec(parameters.id(), medium);
            let time_base = stream.time_base();

            let (width, height) = if medium == Type::Video {
                let video = CodecContext::from_parameters(parameters)
                    .and_then(|context| context.decoder().video())
                    .map_err(|error| unreadable(format!("Failed to read video codec parameters: {error}")))?;
                (video.width(), video.height())
            } else {
                (0, 0)
            };

            let mut frame_rate = rational_to_f64(stream.avg_frame_rate());
            if frame_rate == 0.0 {
                frame_rate = rational_to_f64(stream.rate());
            }

            let duration_us = if stream.duration() > 0 {
                stream.duration().rescale(time_base, MICROSECONDS)
            } else {
                container_duration_us.max(0)
            };

            tracks.push(TrackFormat {
                mime,
                width,
                height,
                frame_rate,
                duration_us,
            });
            time_bases.push(time_base);
        }
        log::debug!("Opened {} with {} tracks", path.display(), tracks.len());

        Ok(Self {
            input,
            path: path.to_path_buf(),
            tracks,
            time_bases,
            selected: None,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaSource for FfmpegSource {
    fn tracks(&self) -> &[TrackFormat] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<(), FrameCodecError> {
        if index >= self.tracks.len() {
            return Err(FrameCodecError::Processing(format!(
                "track {index} does not exist in {}",
                self.path.display()
            )));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<Sample>, FrameCodecError> {
        let selected = self
            .selected
            .ok_or_else(|| FrameCodecError::Processing("no track selected".to_string()))?;
        let time_base = self.time_bases[selected];

        let mut packet = Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(error) => return Err(FrameCodecError::from_ffmpeg("read packet", error)),
            }
            if packet.stream() != selected {
                continue;
            }

            let timestamp = packet.pts().or(packet.dts()).unwrap_or(0);
            return Ok(Some(Sample {
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                presentation_time_us: timestamp.rescale(time_base, MICROSECONDS),
                key_frame: packet.is_key(),
            }));
        }
    }
}

/// Keeps a swscale context together with the input it was built for.
struct Scaler {
    context: ScalingContext,
    input: (Pixel, u32, u32),
}

// SAFETY: the scaling context is owned exclusively by one codec wrapper and
// never shared; swscale keeps no thread-local state.
unsafe impl Send for Scaler {}

enum PendingInput {
    Packet(Packet),
    EndOfStream,
}

/// A software decoder rendering RGB24 frames into a [`DecodeSurface`].
pub struct FfmpegDecoder {
    decoder: decoder::Video,
    surface: DecodeSurface,
    time_base: Rational,
    scaler: Option<Scaler>,
    pending: Option<PendingInput>,
    input_ended: bool,
    output_ended: bool,
    frame: VideoFrame,
    holding_frame: bool,
}

impl FfmpegDecoder {
    fn new(source: &FfmpegSource, track: usize, surface: DecodeSurface) -> Result<Self, FrameCodecError> {
        let stream = source
            .input
            .stream(track)
            .ok_or_else(|| FrameCodecError::CodecConfiguration(format!("track {track} does not exist")))?;
        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| FrameCodecError::CodecConfiguration(format!("Failed to create video decoder: {error}")))?;
        log::debug!(
            "Created {} decoder for {}x{}",
            decoder.codec().map(|codec| codec.name().to_string()).unwrap_or_default(),
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            decoder,
            surface,
            time_base: stream.time_base(),
            scaler: None,
            pending: None,
            input_ended: false,
            output_ended: false,
            frame: VideoFrame::empty(),
            holding_frame: false,
        })
    }

    /// Push held-back input into the codec. Returns whether nothing is left
    /// pending.
    fn flush_pending(&mut self) -> Result<bool, FrameCodecError> {
        let result = match &self.pending {
            None => return Ok(true),
            Some(PendingInput::Packet(packet)) => self.decoder.send_packet(packet),
            Some(PendingInput::EndOfStream) => self.decoder.send_eof(),
        };
        match result {
            Ok(()) => {
                self.pending = None;
                Ok(true)
            }
            Err(error) if is_again(&error) => Ok(false),
            Err(error) => Err(FrameCodecError::from_ffmpeg("send input to decoder", error)),
        }
    }

    fn render_held_frame(&mut self) -> Result<(), FrameCodecError> {
        let (width, height) = (self.surface.width(), self.surface.height());
        let input = (self.frame.format(), self.frame.width(), self.frame.height());

        if self.scaler.as_ref().is_none_or(|scaler| scaler.input != input) {
            let context = ScalingContext::get(
                input.0,
                input.1,
                input.2,
                Pixel::RGB24,
                width,
                height,
                ScalingFlags::BILINEAR,
            )
            .map_err(|error| FrameCodecError::GraphicsContext(format!("Failed to create scaler: {error}")))?;
            self.scaler = Some(Scaler { context, input });
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(FrameCodecError::GraphicsContext("scaler unavailable".to_string()));
        };

        let mut rgb_frame = VideoFrame::empty();
        scaler
            .context
            .run(&self.frame, &mut rgb_frame)
            .map_err(|error| FrameCodecError::from_ffmpeg("convert frame", error))?;

        let data = pack_plane(rgb_frame.data(0), rgb_frame.stride(0), width as usize * 3, height as usize);
        self.surface
            .render(PixelBuffer::new(PixelLayout::Rgb24, width, height, data)?)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>, FrameCodecError> {
        if self.input_ended || !self.flush_pending()? {
            return Ok(None);
        }
        Ok(Some(0))
    }

    fn queue_input_buffer(&mut self, slot: usize, input: InputBuffer) -> Result<(), FrameCodecError> {
        if slot != 0 || self.pending.is_some() || self.input_ended {
            return Err(FrameCodecError::Processing(format!("input slot {slot} is not available")));
        }

        self.pending = Some(match input {
            InputBuffer::Sample(sample) => {
                let mut packet = Packet::copy(&sample.data);
                packet.set_pts(Some(sample.presentation_time_us.rescale(MICROSECONDS, self.time_base)));
                if sample.key_frame {
                    packet.set_flags(PacketFlags::KEY);
                }
                PendingInput::Packet(packet)
            }
            InputBuffer::EndOfStream => {
                self.input_ended = true;
                PendingInput::EndOfStream
            }
        });
        self.flush_pending()?;
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus<BufferInfo>, FrameCodecError> {
        if self.holding_frame {
            return Ok(OutputStatus::TryAgainLater);
        }
        if self.output_ended {
            return Ok(OutputStatus::Buffer {
                slot: 0,
                buffer: end_of_stream_info(),
            });
        }

        self.flush_pending()?;
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => {
                self.holding_frame = true;
                let timestamp = self.frame.timestamp().or(self.frame.pts()).unwrap_or(0);
                let size = (0..self.frame.planes()).map(|plane| self.frame.data(plane).len()).sum();
                Ok(OutputStatus::Buffer {
                    slot: 0,
                    buffer: BufferInfo {
                        size,
                        presentation_time_us: timestamp.rescale(self.time_base, MICROSECONDS),
                        flags: BufferFlags {
                            key_frame: self.frame.is_key(),
                            ..BufferFlags::default()
                        },
                    },
                })
            }
            Err(ffmpeg_next::Error::Eof) => {
                self.output_ended = true;
                Ok(OutputStatus::Buffer {
                    slot: 0,
                    buffer: end_of_stream_info(),
                })
            }
            Err(error) if is_again(&error) => Ok(OutputStatus::TryAgainLater),
            Err(error) => Err(FrameCodecError::from_ffmpeg("decode frame", error)),
        }
    }

    fn release_output_buffer(&mut self, slot: usize, render: bool) -> Result<(), FrameCodecError> {
        if slot != 0 {
            return Err(FrameCodecError::Processing(format!("output slot {slot} does not exist")));
        }
        if !self.holding_frame {
            return Ok(());
        }
        self.holding_frame = false;
        if render {
            self.render_held_frame()?;
        }
        Ok(())
    }
}

fn end_of_stream_info() -> BufferInfo {
    BufferInfo {
        size: 0,
        presentation_time_us: 0,
        flags: BufferFlags {
            end_of_stream: true,
            ..BufferFlags::default()
        },
    }
}

fn pixel_for_layout(layout: PixelLayout) -> Pixel {
    match layout {
        PixelLayout::Rgb24 => Pixel::RGB24,
        PixelLayout::Yuv420p => Pixel::YUV420P,
        PixelLayout::Nv12 => Pixel::NV12,
    }
}

/// 4:2:0 formats tried, in order, when the codec lacks the requested one.
const FALLBACK_PIXELS: [Pixel; 3] = [Pixel::YUV420P, Pixel::NV12, Pixel::YUVJ420P];

/// Pixel format to open an encoder with.
///
/// Keeps `requested` when the codec lists it or lists nothing at all.
/// Otherwise takes the first supported planar or semi-planar 4:2:0 format,
/// then whatever the codec lists first.
fn choose_encoder_pixel(requested: Pixel, supported: &[Pixel]) -> Pixel {
    if supported.is_empty() || supported.contains(&requested) {
        return requested;
    }
    FALLBACK_PIXELS
        .into_iter()
        .find(|candidate| supported.contains(candidate))
        .unwrap_or(supported[0])
}

/// A software encoder consuming frames from an [`EncodeSurface`].
pub struct FfmpegEncoder {
    encoder: encoder::Video,
    surface: EncodeSurface,
    pixel: Pixel,
    scaler: Option<Scaler>,
    time_base: Rational,
    format: EncodedFormat,
    format_announced: bool,
    input_ended: bool,
    eof_sent: bool,
    packet: Packet,
}

impl FfmpegEncoder {
    fn new(format: &EncoderFormat, surface: EncodeSurface) -> Result<Self, FrameCodecError> {
        initialize()?;
        let id = codec_for_mime(&format.mime)
            .ok_or_else(|| FrameCodecError::CodecConfiguration(format!("unsupported mime type {}", format.mime)))?;
        let codec = encoder::find(id)
            .ok_or_else(|| FrameCodecError::CodecConfiguration(format!("no FFmpeg encoder for {}", format.mime)))?;
        let requested = pixel_for_layout(format.input_layout);
        let supported: Vec<Pixel> = codec
            .video()
            .ok()
            .and_then(|video| video.formats().map(|formats| formats.collect()))
            .unwrap_or_default();
        let pixel = choose_encoder_pixel(requested, &supported);
        if pixel != requested {
            log::info!("{} does not take {requested:?} input, using {pixel:?}", codec.name());
        }
        let frame_rate = format.frame_rate.max(1) as i32;
        let time_base = Rational(1, frame_rate);

        let mut context = CodecContext::new()
            .encoder()
            .video()
            .map_err(|error| FrameCodecError::CodecConfiguration(error.to_string()))?;
        context.set_width(format.width);
        context.set_height(format.height);
        context.set_format(pixel);
        context.set_time_base(time_base);
        context.set_frame_rate(Some(Rational(frame_rate, 1)));
        context.set_bit_rate(format.bit_rate as usize);
        context.set_max_b_frames(0);
        context.set_gop((format.frame_rate * format.i_frame_interval).max(1));
        // Extradata must come out of the encoder so the muxer can place it.
        unsafe {
            (*context.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }

        let encoder = context
            .open_as(codec)
            .map_err(|error| FrameCodecError::CodecConfiguration(format!("Failed to open {} encoder: {error}", codec.name())))?;

        // SAFETY: the context is open; FFmpeg owns `extradata` and keeps it
        // alive for the lifetime of the encoder.
        let extradata = unsafe {
            let raw = encoder.as_ptr();
            if (*raw).extradata.is_null() || (*raw).extradata_size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts((*raw).extradata, (*raw).extradata_size as usize).to_vec()
            }
        };
        log::debug!(
            "Opened {} encoder {}x{} @ {} fps, {} bytes of extradata",
            codec.name(),
            format.width,
            format.height,
            format.frame_rate,
            extradata.len()
        );

        Ok(Self {
            encoder,
            surface,
            pixel,
            scaler: None,
            time_base,
            format: EncodedFormat {
                mime: format.mime.clone(),
                width: format.width,
                height: format.height,
                frame_rate: format.frame_rate,
                extradata,
            },
            format_announced: false,
            input_ended: false,
            eof_sent: false,
            packet: Packet::empty(),
        })
    }

    /// Turn a surface frame into a frame in the encoder's pixel format.
    fn video_frame(&mut self, pixels: &PixelBuffer, presentation_time_us: i64) -> Result<VideoFrame, FrameCodecError> {
        if pixels.width() != self.format.width || pixels.height() != self.format.height {
            return Err(FrameCodecError::Processing(format!(
                "surface frame is {}x{}, encoder expects {}x{}",
                pixels.width(),
                pixels.height(),
                self.format.width,
                self.format.height
            )));
        }

        let (width, height) = (pixels.width(), pixels.height());
        let input = (pixel_for_layout(pixels.layout()), width, height);
        let mut source = VideoFrame::new(input.0, width, height);
        fill_frame(&mut source, pixels);

        if self.scaler.as_ref().is_none_or(|scaler| scaler.input != input) {
            let context = ScalingContext::get(input.0, width, height, self.pixel, width, height, ScalingFlags::BILINEAR)
                .map_err(|error| FrameCodecError::GraphicsContext(format!("Failed to create scaler: {error}")))?;
            self.scaler = Some(Scaler { context, input });
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(FrameCodecError::GraphicsContext("scaler unavailable".to_string()));
        };

        let mut frame = VideoFrame::empty();
        scaler
            .context
            .run(&source, &mut frame)
            .map_err(|error| FrameCodecError::from_ffmpeg("convert frame", error))?;
        frame.set_pts(Some(presentation_time_us.rescale(MICROSECONDS, self.time_base)));
        Ok(frame)
    }

    fn take_packet(&mut self) -> Result<Option<EncodedSample>, FrameCodecError> {
        match self.encoder.receive_packet(&mut self.packet) {
            Ok(()) => {
                let timestamp = self.packet.pts().or(self.packet.dts()).unwrap_or(0);
                Ok(Some(EncodedSample {
                    data: self.packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    presentation_time_us: timestamp.rescale(self.time_base, MICROSECONDS),
                    flags: BufferFlags {
                        key_frame: self.packet.is_key(),
                        ..BufferFlags::default()
                    },
                }))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(Some(EncodedSample {
                data: Vec::new(),
                presentation_time_us: 0,
                flags: BufferFlags {
                    end_of_stream: true,
                    ..BufferFlags::default()
                },
            })),
            Err(error) if is_again(&error) => Ok(None),
            Err(error) => Err(FrameCodecError::from_ffmpeg("encode frame", error)),
        }
    }
}

/// Copy a tightly packed buffer into the strided planes of `frame`.
fn fill_frame(frame: &mut VideoFrame, pixels: &PixelBuffer) {
    let width = pixels.width() as usize;
    let height = pixels.height() as usize;
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));
    let luma = width * height;
    let data = pixels.data();

    match pixels.layout() {
        PixelLayout::Rgb24 => unpack_plane(data, frame, 0, width * 3, height),
        PixelLayout::Yuv420p => {
            let chroma = chroma_width * chroma_height;
            unpack_plane(&data[..luma], frame, 0, width, height);
            unpack_plane(&data[luma..luma + chroma], frame, 1, chroma_width, chroma_height);
            unpack_plane(&data[luma + chroma..], frame, 2, chroma_width, chroma_height);
        }
        PixelLayout::Nv12 => {
            unpack_plane(&data[..luma], frame, 0, width, height);
            unpack_plane(&data[luma..], frame, 1, chroma_width * 2, chroma_height);
        }
    }
}

/// Copy a packed plane into a frame plane with its own stride.
fn unpack_plane(source: &[u8], frame: &mut VideoFrame, plane: usize, row_bytes: usize, rows: usize) {
    let stride = frame.stride(plane);
    let target = frame.data_mut(plane);
    for (row, chunk) in source.chunks_exact(row_bytes).take(rows).enumerate() {
        let start = row * stride;
        target[start..start + row_bytes].copy_from_slice(chunk);
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputStatus<EncodedSample>, FrameCodecError> {
        if !self.format_announced {
            self.format_announced = true;
            return Ok(OutputStatus::FormatChanged(Some(self.format.clone())));
        }

        loop {
            if let Some(sample) = self.take_packet()? {
                return Ok(OutputStatus::Buffer { slot: 0, buffer: sample });
            }
            if self.eof_sent {
                return Ok(OutputStatus::TryAgainLater);
            }

            let wait = if self.input_ended { Duration::ZERO } else { timeout };
            match self.surface.take_frame(wait)? {
                Some(queued) => {
                    let frame = self.video_frame(&queued.pixels, queued.presentation_time_us)?;
                    self.encoder
                        .send_frame(&frame)
                        .map_err(|error| FrameCodecError::from_ffmpeg("send frame to encoder", error))?;
                }
                None if self.input_ended => {
                    self.encoder
                        .send_eof()
                        .map_err(|error| FrameCodecError::from_ffmpeg("flush encoder", error))?;
                    self.eof_sent = true;
                }
                None => return Ok(OutputStatus::TryAgainLater),
            }
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), FrameCodecError> {
        log::debug!("Encoder input ended with {} frames still queued", self.surface.pending());
        self.input_ended = true;
        Ok(())
    }
}

/// Writes one video track into a container picked from the file extension.
pub struct FfmpegMuxer {
    output: format::context::Output,
    path: PathBuf,
    stream: Option<usize>,
    stream_time_base: Rational,
    started: bool,
    finished: bool,
}

impl FfmpegMuxer {
    fn create(path: &Path) -> Result<Self, FrameCodecError> {
        initialize()?;
        let output = format::output(&path)
            .map_err(|error| FrameCodecError::from_ffmpeg(&format!("Failed to create {}", path.display()), error))?;
        Ok(Self {
            output,
            path: path.to_path_buf(),
            stream: None,
            stream_time_base: MICROSECONDS,
            started: false,
            finished: false,
        })
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(&mut self, format: &EncodedFormat) -> Result<usize, FrameCodecError> {
        if self.started || self.stream.is_some() {
            return Err(FrameCodecError::Processing("muxer already has its video track".to_string()));
        }
        let id = codec_for_mime(&format.mime)
            .ok_or_else(|| FrameCodecError::CodecConfiguration(format!("unsupported mime type {}", format.mime)))?;

        let mut stream = self.output.add_stream(encoder::find(id))?;
        stream.set_time_base(MICROSECONDS);
        stream.set_avg_frame_rate(Rational(format.frame_rate as i32, 1));
        let index = stream.index();

        // SAFETY: `codecpar` belongs to the freshly added stream and is not
        // aliased; extradata is allocated with FFmpeg's allocator so the
        // stream frees it.
        unsafe {
            let parameters = (*stream.as_mut_ptr()).codecpar;
            (*parameters).codec_type = ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*parameters).codec_id = id.into();
            (*parameters).codec_tag = 0;
            (*parameters).width = format.width as i32;
            (*parameters).height = format.height as i32;

            if !format.extradata.is_empty() {
                let size = format.extradata.len();
                let padding = ffmpeg_sys_next::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let buffer = ffmpeg_sys_next::av_mallocz(size + padding) as *mut u8;
                if buffer.is_null() {
                    return Err(FrameCodecError::ResourceExhaustion(
                        "Failed to allocate codec extradata".to_string(),
                    ));
                }
                ptr::copy_nonoverlapping(format.extradata.as_ptr(), buffer, size);
                (*parameters).extradata = buffer;
                (*parameters).extradata_size = size as i32;
            }
        }

        self.stream = Some(index);
        Ok(index)
    }

    fn start(&mut self) -> Result<(), FrameCodecError> {
        let index = self
            .stream
            .ok_or_else(|| FrameCodecError::Processing("muxer started without a track".to_string()))?;
        self.output
            .write_header()
            .map_err(|error| FrameCodecError::from_ffmpeg("write container header", error))?;
        // The container may have replaced the requested time base.
        self.stream_time_base = self
            .output
            .stream(index)
            .map(|stream| stream.time_base())
            .unwrap_or(MICROSECONDS);
        self.started = true;
        log::debug!("Started muxing {} (time base {})", self.path.display(), self.stream_time_base);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), FrameCodecError> {
        if !self.started || self.stream != Some(track) {
            return Err(FrameCodecError::Processing(format!("track {track} is not being muxed")));
        }

        let mut packet = Packet::copy(&sample.data);
        packet.set_stream(track);
        packet.set_pts(Some(sample.presentation_time_us));
        packet.set_dts(Some(sample.presentation_time_us));
        if sample.flags.key_frame {
            packet.set_flags(PacketFlags::KEY);
        }
        packet.rescale_ts(MICROSECONDS, self.stream_time_base);
        packet
            .write_interleaved(&mut self.output)
            .map_err(|error| FrameCodecError::from_ffmpeg("write sample", error))
    }

    fn finish(&mut self) -> Result<(), FrameCodecError> {
        if !self.started || self.finished {
            return Ok(());
        }
        self.finished = true;
        self.output
            .write_trailer()
            .map_err(|error| FrameCodecError::from_ffmpeg("write container trailer", error))
    }
}

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Setting a level causes
/// FFmpeg to suppress all messages below that severity.
///
/// # Ordering (most verbose → most quiet)
///
/// `Trace` > `Debug` > `Verbose` > `Info` > `Warning` > `Error` > `Fatal` > `Panic` > `Quiet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only log conditions the process cannot recover from.
    Panic,
    /// Only log unrecoverable errors.
    Fatal,
    /// Log recoverable errors.
    Error,
    /// Log warnings (default FFmpeg level).
    Warning,
    /// Log informational messages.
    Info,
    /// Log verbose informational messages.
    Verbose,
    /// Log debugging messages.
    Debug,
    /// Extremely verbose tracing output.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    fn from_ffmpeg_level(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

/// Set the FFmpeg internal log verbosity level.
///
/// This controls what FFmpeg prints to stderr. It does **not** affect
/// Rust-side `log` crate output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Get the current FFmpeg internal log verbosity level.
///
/// Returns `None` if the current level does not map to a known variant.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level()
        .ok()
        .map(FfmpegLogLevel::from_ffmpeg_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_mapping_round_trips_known_codecs() {
        for &(mime, id) in MIME_CODECS {
            assert_eq!(codec_for_mime(mime), Some(id));
        }
        assert_eq!(codec_for_mime("VIDEO/AVC"), Some(Id::H264));
        assert_eq!(mime_for_codec(Id::VP9, Type::Video), "video/x-vnd.on2.vp9");
    }

    #[test]
    fn unknown_codecs_get_an_x_subtype() {
        assert_eq!(codec_for_mime("video/unknown"), None);
        assert!(mime_for_codec(Id::PNG, Type::Video).starts_with("video/x-"));
    }

    #[test]
    fn requested_pixel_is_kept_when_supported() {
        let supported = [Pixel::YUV420P, Pixel::NV12];
        assert_eq!(choose_encoder_pixel(Pixel::NV12, &supported), Pixel::NV12);
        assert_eq!(choose_encoder_pixel(Pixel::NV12, &[]), Pixel::NV12);
    }

    #[test]
    fn missing_nv12_falls_back_to_planar() {
        // libvpx-vp9 and mpeg4 list planar formats only.
        let supported = [Pixel::YUV420P, Pixel::YUVA420P, Pixel::YUV444P];
        assert_eq!(choose_encoder_pixel(pixel_for_layout(PixelLayout::Nv12), &supported), Pixel::YUV420P);
    }

    #[test]
    fn missing_yuv420_takes_the_first_listed_format() {
        let supported = [Pixel::YUV444P, Pixel::RGB24];
        assert_eq!(choose_encoder_pixel(Pixel::YUV420P, &supported), Pixel::YUV444P);
        assert_eq!(choose_encoder_pixel(Pixel::RGB24, &[Pixel::NV12, Pixel::YUV420P]), Pixel::YUV420P);
    }

    #[test]
    fn ffmpeg_encode_surfaces_hold_rgb() {
        let format = EncoderFormat {
            mime: "video/avc".to_string(),
            width: 16,
            height: 16,
            frame_rate: 30,
            bit_rate: 1_000_000,
            i_frame_interval: 1,
            input_layout: PixelLayout::Nv12,
        };
        assert_eq!(FfmpegBackend::new().encode_surface_layout(&format), PixelLayout::Rgb24);
    }

    #[test]
    fn log_level_round_trips() {
        for level in [FfmpegLogLevel::Quiet, FfmpegLogLevel::Warning, FfmpegLogLevel::Trace] {
            assert_eq!(FfmpegLogLevel::from_ffmpeg_level(level.to_ffmpeg_level()), level);
        }
    }
}
