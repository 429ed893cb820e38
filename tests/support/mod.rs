//! Scripted in-memory codec backend for pipeline tests.
//!
//! The decoder holds back `decoder_lag` frames before producing output and
//! optionally renders from a helper thread, the encoder lags and emits a
//! codec config buffer, and every collaborator counts itself in and out so
//! tests can check that nothing outlives a pipeline call. A backend built
//! with [`ScriptedBackend::replaying`] decodes what a scripted encoder
//! muxed, so stills can make the full trip through both pipelines.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use framecodec::{
    BufferFlags, BufferInfo, CancellationToken, DecodeSurface, EncodeSurface, EncodedFormat, EncodedSample,
    EncoderFormat, FrameCodecError, InputBuffer, MediaBackend, MediaSource, Muxer, OutputStatus, PixelBuffer,
    PixelLayout, ProgressEvent, ProgressSink, Sample, TrackFormat, VideoDecoder, VideoEncoder,
};

/// What the scripted backend does.
#[derive(Clone)]
pub struct Script {
    pub tracks: Vec<TrackFormat>,
    /// Samples available in the video track.
    pub samples: u64,
    /// Frames the decoder holds back before producing output.
    pub decoder_lag: usize,
    /// Post rendered frames to the surface from a helper thread.
    pub render_from_thread: bool,
    /// Put the end-of-stream flag on the last frame instead of an empty
    /// buffer.
    pub eos_on_last_frame: bool,
    /// Decoder output fails when it reaches this frame.
    pub fail_at_frame: Option<u64>,
    /// Rendering to the surface never happens for this frame.
    pub lose_frame: Option<u64>,
    /// Cancel this token once the decoder has produced this many frames.
    pub cancel_after: Option<(u64, CancellationToken)>,
    /// `open_source` fails.
    pub unreadable: bool,
    /// Frames the encoder holds back before producing output.
    pub encoder_lag: usize,
    /// The encoder never announces its output format.
    pub encoder_skips_format: bool,
    /// Serve these encoded samples instead of index markers.
    pub replay: Option<Arc<Replay>>,
}

/// Samples a scripted encoder produced, stored in `layout`.
#[derive(Debug)]
pub struct Replay {
    pub layout: PixelLayout,
    pub samples: Vec<EncodedSample>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            tracks: vec![video_track(30.0, 3.0)],
            samples: 90,
            decoder_lag: 2,
            render_from_thread: false,
            eos_on_last_frame: false,
            fail_at_frame: None,
            lose_frame: None,
            cancel_after: None,
            unreadable: false,
            encoder_lag: 3,
            encoder_skips_format: false,
            replay: None,
        }
    }
}

pub fn video_track(frame_rate: f64, seconds: f64) -> TrackFormat {
    TrackFormat {
        mime: "video/avc".to_string(),
        width: 8,
        height: 6,
        frame_rate,
        duration_us: (seconds * 1_000_000.0) as i64,
    }
}

pub fn audio_track() -> TrackFormat {
    TrackFormat {
        mime: "audio/mp4a-latm".to_string(),
        width: 0,
        height: 0,
        frame_rate: 0.0,
        duration_us: 3_000_000,
    }
}

/// Live and total counts per collaborator kind.
#[derive(Default)]
pub struct Counters {
    pub live: AtomicUsize,
    pub created: AtomicUsize,
}

impl Counters {
    fn enter(self: &Arc<Self>) -> Guard {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        Guard(self.clone())
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

struct Guard(Arc<Counters>);

impl Drop for Guard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything the muxer saw.
#[derive(Debug, Default, Clone)]
pub struct MuxLog {
    pub tracks: Vec<EncodedFormat>,
    pub started: bool,
    pub samples: Vec<EncodedSample>,
    pub finished: bool,
}

#[derive(Default)]
pub struct Observed {
    pub sources: Arc<Counters>,
    pub decoders: Arc<Counters>,
    pub encoders: Arc<Counters>,
    pub muxers: Arc<Counters>,
    pub encoder_formats: Mutex<Vec<EncoderFormat>>,
    pub mux: Mutex<MuxLog>,
}

impl Observed {
    pub fn live_handles(&self) -> usize {
        self.sources.live() + self.decoders.live() + self.encoders.live() + self.muxers.live()
    }
}

#[derive(Clone)]
pub struct ScriptedBackend {
    pub script: Script,
    pub observed: Arc<Observed>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            observed: Arc::new(Observed::default()),
        }
    }

    /// A backend whose only video track plays back the samples in `log`.
    pub fn replaying(log: &MuxLog, layout: PixelLayout) -> Self {
        let format = &log.tracks[0];
        let samples: Vec<EncodedSample> = log
            .samples
            .iter()
            .filter(|sample| !sample.flags.codec_config && !sample.data.is_empty())
            .cloned()
            .collect();
        let frame_rate = f64::from(format.frame_rate);
        let track = TrackFormat {
            mime: format.mime.clone(),
            width: format.width,
            height: format.height,
            frame_rate,
            duration_us: (samples.len() as f64 * 1_000_000.0 / frame_rate) as i64,
        };
        Self::new(Script {
            tracks: vec![track],
            samples: samples.len() as u64,
            replay: Some(Arc::new(Replay { layout, samples })),
            ..Script::default()
        })
    }
}

impl MediaBackend for ScriptedBackend {
    type Source = ScriptedSource;
    type Decoder = ScriptedDecoder;
    type Encoder = ScriptedEncoder;
    type Muxer = RecordingMuxer;

    fn open_source(&self, path: &Path) -> Result<ScriptedSource, FrameCodecError> {
        if self.script.unreadable {
            return Err(FrameCodecError::SourceUnreadable {
                path: path.to_path_buf(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(ScriptedSource {
            tracks: self.script.tracks.clone(),
            samples: self.script.samples,
            replay: self.script.replay.clone(),
            next: 0,
            selected: None,
            _guard: self.observed.sources.enter(),
        })
    }

    fn create_decoder(
        &self,
        source: &ScriptedSource,
        track: usize,
        surface: DecodeSurface,
    ) -> Result<ScriptedDecoder, FrameCodecError> {
        assert_eq!(source.selected, Some(track), "decoder created for an unselected track");
        Ok(ScriptedDecoder {
            script: self.script.clone(),
            surface,
            queued: VecDeque::new(),
            received: 0,
            payloads: HashMap::new(),
            held: None,
            produced: 0,
            format_reported: false,
            input_ended: false,
            eos_sent: false,
            frame_interval_us: (1_000_000.0 / source.tracks[track].frame_rate) as i64,
            _guard: self.observed.decoders.enter(),
        })
    }

    fn create_encoder(
        &self,
        format: &EncoderFormat,
        surface: EncodeSurface,
    ) -> Result<ScriptedEncoder, FrameCodecError> {
        self.observed.encoder_formats.lock().unwrap().push(format.clone());
        Ok(ScriptedEncoder {
            format: format.clone(),
            surface,
            lag: self.script.encoder_lag,
            skip_format: self.script.encoder_skips_format,
            announced: false,
            config_sent: false,
            held: VecDeque::new(),
            input_ended: false,
            eos_sent: false,
            _guard: self.observed.encoders.enter(),
        })
    }

    fn create_muxer(&self, path: &Path) -> Result<RecordingMuxer, FrameCodecError> {
        Ok(RecordingMuxer {
            path: path.to_path_buf(),
            observed: self.observed.clone(),
            _guard: self.observed.muxers.enter(),
        })
    }
}

pub struct ScriptedSource {
    tracks: Vec<TrackFormat>,
    samples: u64,
    replay: Option<Arc<Replay>>,
    next: u64,
    selected: Option<usize>,
    _guard: Guard,
}

impl MediaSource for ScriptedSource {
    fn tracks(&self) -> &[TrackFormat] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<(), FrameCodecError> {
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<Sample>, FrameCodecError> {
        if self.next >= self.samples {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        if let Some(replay) = &self.replay {
            let sample = &replay.samples[index as usize];
            return Ok(Some(Sample {
                data: sample.data.clone(),
                presentation_time_us: sample.presentation_time_us,
                key_frame: sample.flags.key_frame,
            }));
        }
        Ok(Some(Sample {
            data: index.to_le_bytes().to_vec(),
            presentation_time_us: 0,
            key_frame: index % 30 == 0,
        }))
    }
}

pub struct ScriptedDecoder {
    script: Script,
    surface: DecodeSurface,
    queued: VecDeque<u64>,
    received: u64,
    /// Replayed frame data by index.
    payloads: HashMap<u64, Vec<u8>>,
    held: Option<u64>,
    produced: u64,
    format_reported: bool,
    input_ended: bool,
    eos_sent: bool,
    frame_interval_us: i64,
    _guard: Guard,
}

/// Solid frame whose red channel encodes the frame index.
pub fn marker_frame(index: u64, width: u32, height: u32) -> PixelBuffer {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&[(index % 256) as u8, 0, 0]);
    }
    PixelBuffer::new(PixelLayout::Rgb24, width, height, data).unwrap()
}

impl VideoDecoder for ScriptedDecoder {
    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>, FrameCodecError> {
        if self.input_ended || self.queued.len() > self.script.decoder_lag + 1 {
            return Ok(None);
        }
        Ok(Some(7))
    }

    fn queue_input_buffer(&mut self, slot: usize, input: InputBuffer) -> Result<(), FrameCodecError> {
        assert_eq!(slot, 7);
        match input {
            InputBuffer::Sample(sample) => {
                let index = if self.script.replay.is_some() {
                    self.payloads.insert(self.received, sample.data);
                    self.received
                } else {
                    u64::from_le_bytes(sample.data.try_into().unwrap())
                };
                self.received += 1;
                self.queued.push_back(index);
            }
            InputBuffer::EndOfStream => self.input_ended = true,
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus<BufferInfo>, FrameCodecError> {
        if self.held.is_some() || self.eos_sent {
            return Ok(OutputStatus::TryAgainLater);
        }
        if !self.format_reported && !self.queued.is_empty() {
            self.format_reported = true;
            return Ok(OutputStatus::FormatChanged(None));
        }

        let ready = self.queued.len() > self.script.decoder_lag || (self.input_ended && !self.queued.is_empty());
        if ready {
            let index = self.queued.pop_front().unwrap();
            if self.script.fail_at_frame == Some(index) {
                return Err(FrameCodecError::Processing(format!("scripted decode failure at {index}")));
            }
            if let Some((after, token)) = &self.script.cancel_after {
                if index + 1 >= *after {
                    token.cancel();
                }
            }
            self.held = Some(index);
            self.produced += 1;
            let last = self.input_ended && self.queued.is_empty() && self.script.eos_on_last_frame;
            if last {
                self.eos_sent = true;
            }
            return Ok(OutputStatus::Buffer {
                slot: 3,
                buffer: BufferInfo {
                    size: 48,
                    presentation_time_us: index as i64 * self.frame_interval_us,
                    flags: BufferFlags {
                        end_of_stream: last,
                        ..BufferFlags::default()
                    },
                },
            });
        }

        if self.input_ended && self.queued.is_empty() {
            self.eos_sent = true;
            return Ok(OutputStatus::Buffer {
                slot: 4,
                buffer: BufferInfo {
                    size: 0,
                    presentation_time_us: 0,
                    flags: BufferFlags {
                        end_of_stream: true,
                        ..BufferFlags::default()
                    },
                },
            });
        }
        Ok(OutputStatus::TryAgainLater)
    }

    fn release_output_buffer(&mut self, slot: usize, render: bool) -> Result<(), FrameCodecError> {
        let Some(index) = self.held.take() else {
            assert_eq!(slot, 4, "released an empty slot that was never handed out");
            assert!(!render);
            return Ok(());
        };
        assert_eq!(slot, 3);
        if !render || self.script.lose_frame == Some(index) {
            return Ok(());
        }

        let (width, height) = (self.surface.width(), self.surface.height());
        let frame = match (&self.script.replay, self.payloads.remove(&index)) {
            (Some(replay), Some(data)) => {
                let stored = PixelBuffer::new(replay.layout, width, height, data).unwrap();
                PixelBuffer::from_rgb(&stored.to_rgb(), PixelLayout::Rgb24)
            }
            _ => marker_frame(index, width, height),
        };
        if self.script.render_from_thread {
            let surface = self.surface.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(2));
                let _ = surface.render(frame);
            });
            Ok(())
        } else {
            self.surface.render(frame)
        }
    }
}

pub struct ScriptedEncoder {
    format: EncoderFormat,
    surface: EncodeSurface,
    lag: usize,
    skip_format: bool,
    announced: bool,
    config_sent: bool,
    held: VecDeque<EncodedSample>,
    input_ended: bool,
    eos_sent: bool,
    _guard: Guard,
}

impl VideoEncoder for ScriptedEncoder {
    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus<EncodedSample>, FrameCodecError> {
        if self.eos_sent {
            return Ok(OutputStatus::TryAgainLater);
        }

        while let Some(frame) = self.surface.take_frame(Duration::ZERO)? {
            assert_eq!(frame.pixels.width(), self.format.width);
            assert_eq!(frame.pixels.height(), self.format.height);
            assert_eq!(frame.pixels.layout(), self.format.input_layout);
            self.held.push_back(EncodedSample {
                data: frame.pixels.data().to_vec(),
                presentation_time_us: frame.presentation_time_us,
                flags: BufferFlags {
                    key_frame: self.held.is_empty(),
                    ..BufferFlags::default()
                },
            });
        }

        if self.held.is_empty() && !self.input_ended {
            return Ok(OutputStatus::TryAgainLater);
        }
        if !self.announced && !self.skip_format {
            self.announced = true;
            return Ok(OutputStatus::FormatChanged(Some(EncodedFormat {
                mime: self.format.mime.clone(),
                width: self.format.width,
                height: self.format.height,
                frame_rate: self.format.frame_rate,
                extradata: vec![0, 0, 0, 1, 0x67],
            })));
        }
        if !self.config_sent {
            self.config_sent = true;
            return Ok(OutputStatus::Buffer {
                slot: 0,
                buffer: EncodedSample {
                    data: vec![0, 0, 0, 1, 0x67, 0x68],
                    presentation_time_us: 0,
                    flags: BufferFlags {
                        codec_config: true,
                        ..BufferFlags::default()
                    },
                },
            });
        }

        if self.held.len() > self.lag || (self.input_ended && !self.held.is_empty()) {
            let sample = self.held.pop_front().unwrap();
            return Ok(OutputStatus::Buffer { slot: 0, buffer: sample });
        }
        if self.input_ended {
            self.eos_sent = true;
            return Ok(OutputStatus::Buffer {
                slot: 0,
                buffer: EncodedSample {
                    data: Vec::new(),
                    presentation_time_us: 0,
                    flags: BufferFlags {
                        end_of_stream: true,
                        ..BufferFlags::default()
                    },
                },
            });
        }
        Ok(OutputStatus::TryAgainLater)
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), FrameCodecError> {
        self.input_ended = true;
        Ok(())
    }
}

pub struct RecordingMuxer {
    path: PathBuf,
    observed: Arc<Observed>,
    _guard: Guard,
}

impl Muxer for RecordingMuxer {
    fn add_track(&mut self, format: &EncodedFormat) -> Result<usize, FrameCodecError> {
        let mut log = self.observed.mux.lock().unwrap();
        assert!(!log.started, "track added after start");
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), FrameCodecError> {
        self.observed.mux.lock().unwrap().started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), FrameCodecError> {
        let mut log = self.observed.mux.lock().unwrap();
        assert!(log.started, "sample written before start");
        assert!(track < log.tracks.len());
        log.samples.push(sample.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), FrameCodecError> {
        let mut log = self.observed.mux.lock().unwrap();
        log.finished = true;
        fs::write(&self.path, format!("{} samples", log.samples.len()))?;
        Ok(())
    }
}

/// Collects every progress event.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn percents(&self) -> Vec<u8> {
        self.events.lock().unwrap().iter().map(|event| event.percent).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Write `count` solid PNG frames of `width × height` into `dir`.
pub fn write_frames(dir: &Path, count: usize, width: u32, height: u32) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (1..=count)
        .map(|number| {
            let path = dir.join(format!("image_{number:03}.png"));
            let image = image::RgbImage::from_pixel(width, height, image::Rgb([number as u8 * 10, 80, 160]));
            image.save(&path).unwrap();
            path
        })
        .collect()
}

/// Red channel of the first pixel of an image file.
pub fn marker_of(path: &Path) -> u8 {
    image::open(path).unwrap().to_rgb8().get_pixel(0, 0).0[0]
}
