//! Pixel surface bridge.
//!
//! [`SurfaceBridge`] owns the conversion surfaces both pipelines render
//! through. On the decode side the codec renders each decoded frame into a
//! [`DecodeSurface`]; the processing loop waits for it with
//! [`await_frame_ready`](SurfaceBridge::await_frame_ready) and reads it back
//! as a compressed still. On the encode side the loop submits still images
//! with [`submit_bitmap_frame`](SurfaceBridge::submit_bitmap_frame) and the
//! codec pulls them from its [`EncodeSurface`].
//!
//! Frame availability is a mutex-guarded slot plus a condition variable, so
//! a frame rendered before the loop starts waiting is never missed.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};

use crate::configuration::StillFormat;
use crate::conversion::{PixelBuffer, PixelLayout};
use crate::error::FrameCodecError;

/// Largest width or height a surface accepts.
pub const MAX_SURFACE_DIMENSION: u32 = 16_384;

fn released_error() -> FrameCodecError {
    FrameCodecError::GraphicsContext("surface released".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking renderer must not take the whole bridge down with it.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct FrameSlot {
    frame: Option<PixelBuffer>,
    released: bool,
}

#[derive(Default)]
struct SlotShared {
    slot: Mutex<FrameSlot>,
    ready: Condvar,
}

/// Producer handle for the decode direction.
///
/// Cloned into the decoder at configuration time. Every
/// [`render`](DecodeSurface::render) replaces the pending frame and wakes the
/// processing loop.
#[derive(Clone)]
pub struct DecodeSurface {
    shared: Arc<SlotShared>,
    width: u32,
    height: u32,
}

impl DecodeSurface {
    /// Surface width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Deliver a decoded frame and set the availability flag.
    ///
    /// May be called from any thread.
    pub fn render(&self, frame: PixelBuffer) -> Result<(), FrameCodecError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(FrameCodecError::GraphicsContext(format!(
                "frame of {}x{} rendered into a {}x{} surface",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut slot = lock(&self.shared.slot);
        if slot.released {
            return Err(released_error());
        }
        if slot.frame.is_some() {
            log::debug!("Overwriting an unconsumed frame on the decode surface");
        }
        slot.frame = Some(frame);
        drop(slot);
        self.shared.ready.notify_all();
        Ok(())
    }
}

/// A frame queued on the encode surface.
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    /// Pixels in the encoder's input layout.
    pub pixels: PixelBuffer,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<SurfaceFrame>,
    released: bool,
}

#[derive(Default)]
struct QueueShared {
    queue: Mutex<QueueState>,
    ready: Condvar,
}

/// Consumer handle for the encode direction, held by the encoder.
#[derive(Clone)]
pub struct EncodeSurface {
    shared: Arc<QueueShared>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl EncodeSurface {
    /// Surface width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Layout frames are converted to before they are queued.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Take the oldest queued frame, waiting up to `timeout` for one.
    pub fn take_frame(&self, timeout: Duration) -> Result<Option<SurfaceFrame>, FrameCodecError> {
        let guard = lock(&self.shared.queue);
        let (mut state, _) = self
            .shared
            .ready
            .wait_timeout_while(guard, timeout, |state| {
                state.frames.is_empty() && !state.released
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.released {
            return Err(released_error());
        }
        Ok(state.frames.pop_front())
    }

    /// Number of frames waiting to be consumed.
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).frames.len()
    }
}

#[derive(Default)]
struct BridgeState {
    decode: Option<DecodeSurface>,
    encode: Option<EncodeSurface>,
    released: bool,
}

/// Hardware-style conversion surface shared by a pipeline and its codec.
///
/// One bridge belongs to exactly one extraction or encoding call. All
/// operations take `&self` and are serialized through an internal mutex, so
/// [`release`](SurfaceBridge::release) may race with an in-flight operation
/// from a cancellation path.
#[derive(Default)]
pub struct SurfaceBridge {
    state: Mutex<BridgeState>,
}

impl SurfaceBridge {
    /// Create a bridge with no surfaces allocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the decode-side surface sized to the source video.
    ///
    /// # Errors
    ///
    /// [`FrameCodecError::GraphicsContext`] if the dimensions are unusable,
    /// a decode surface already exists, or the bridge was released.
    pub fn acquire_for_decode(&self, width: u32, height: u32) -> Result<DecodeSurface, FrameCodecError> {
        check_dimensions(width, height)?;
        let mut state = lock(&self.state);
        if state.released {
            return Err(released_error());
        }
        if state.decode.is_some() {
            return Err(FrameCodecError::GraphicsContext(
                "decode surface already acquired".to_string(),
            ));
        }

        log::debug!("Acquired {width}x{height} decode surface");
        let surface = DecodeSurface {
            shared: Arc::new(SlotShared::default()),
            width,
            height,
        };
        state.decode = Some(surface.clone());
        Ok(surface)
    }

    /// Allocate the encode-side surface.
    ///
    /// # Errors
    ///
    /// [`FrameCodecError::GraphicsContext`] for unusable or odd dimensions
    /// (4:2:0 layouts subsample chroma by two), a second acquisition, or a
    /// released bridge.
    pub fn acquire_for_encode(
        &self,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<EncodeSurface, FrameCodecError> {
        check_dimensions(width, height)?;
        if layout != PixelLayout::Rgb24 && (width % 2 != 0 || height % 2 != 0) {
            return Err(FrameCodecError::GraphicsContext(format!(
                "{layout:?} surface needs even dimensions, got {width}x{height}"
            )));
        }

        let mut state = lock(&self.state);
        if state.released {
            return Err(released_error());
        }
        if state.encode.is_some() {
            return Err(FrameCodecError::GraphicsContext(
                "encode surface already acquired".to_string(),
            ));
        }

        log::debug!("Acquired {width}x{height} {layout:?} encode surface");
        let surface = EncodeSurface {
            shared: Arc::new(QueueShared::default()),
            width,
            height,
            layout,
        };
        state.encode = Some(surface.clone());
        Ok(surface)
    }

    /// Block until a rendered frame is available or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when a frame is ready, `Ok(false)` on timeout. A
    /// frame rendered before this call started counts as ready.
    pub fn await_frame_ready(&self, timeout: Duration) -> Result<bool, FrameCodecError> {
        let shared = self.decode_shared()?;
        let guard = lock(&shared.slot);
        let (slot, _) = shared
            .ready
            .wait_timeout_while(guard, timeout, |slot| slot.frame.is_none() && !slot.released)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if slot.released {
            return Err(released_error());
        }
        Ok(slot.frame.is_some())
    }

    /// Read back the available frame, compress it, and clear the flag.
    ///
    /// # Errors
    ///
    /// [`FrameCodecError::Processing`] if no frame is available (call
    /// [`await_frame_ready`](SurfaceBridge::await_frame_ready) first), or an
    /// image error if compression fails.
    pub fn read_current_frame_as_image(&self, format: StillFormat) -> Result<Vec<u8>, FrameCodecError> {
        let frame = self.take_decoded_frame()?;
        let rgb = frame.to_rgb();

        let mut bytes = Vec::new();
        match format {
            StillFormat::Jpeg { quality } => {
                let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
                encoder.encode_image(&rgb)?;
            }
            StillFormat::Png => {
                DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            }
        }
        Ok(bytes)
    }

    /// Drop the available frame without reading it back.
    pub fn discard_current_frame(&self) -> Result<(), FrameCodecError> {
        self.take_decoded_frame().map(|_| ())
    }

    /// Draw a still image onto the encode surface at `presentation_time_us`.
    ///
    /// Images whose size differs from the surface are resized first.
    pub fn submit_bitmap_frame(
        &self,
        image: &DynamicImage,
        presentation_time_us: i64,
    ) -> Result<(), FrameCodecError> {
        let state = lock(&self.state);
        if state.released {
            return Err(released_error());
        }
        let surface = state.encode.as_ref().ok_or_else(|| {
            FrameCodecError::GraphicsContext("encode surface not acquired".to_string())
        })?;

        let rgb = if image.width() != surface.width || image.height() != surface.height {
            imageops::resize(&image.to_rgb8(), surface.width, surface.height, FilterType::Lanczos3)
        } else {
            image.to_rgb8()
        };
        let pixels = PixelBuffer::from_rgb(&rgb, surface.layout);

        let mut queue = lock(&surface.shared.queue);
        if queue.released {
            return Err(released_error());
        }
        queue.frames.push_back(SurfaceFrame {
            pixels,
            presentation_time_us,
        });
        drop(queue);
        surface.shared.ready.notify_all();
        Ok(())
    }

    /// Release every surface. Idempotent; wakes any waiter.
    pub fn release(&self) {
        let mut state = lock(&self.state);
        if state.released {
            return;
        }
        state.released = true;

        if let Some(decode) = state.decode.take() {
            let mut slot = lock(&decode.shared.slot);
            slot.released = true;
            slot.frame = None;
            drop(slot);
            decode.shared.ready.notify_all();
        }
        if let Some(encode) = state.encode.take() {
            let mut queue = lock(&encode.shared.queue);
            queue.released = true;
            queue.frames.clear();
            drop(queue);
            encode.shared.ready.notify_all();
        }
        log::debug!("Surface bridge released");
    }

    /// Whether [`release`](SurfaceBridge::release) has run.
    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    fn decode_shared(&self) -> Result<Arc<SlotShared>, FrameCodecError> {
        let state = lock(&self.state);
        if state.released {
            return Err(released_error());
        }
        state
            .decode
            .as_ref()
            .map(|surface| Arc::clone(&surface.shared))
            .ok_or_else(|| FrameCodecError::GraphicsContext("decode surface not acquired".to_string()))
    }

    fn take_decoded_frame(&self) -> Result<PixelBuffer, FrameCodecError> {
        let state = lock(&self.state);
        if state.released {
            return Err(released_error());
        }
        let surface = state.decode.as_ref().ok_or_else(|| {
            FrameCodecError::GraphicsContext("decode surface not acquired".to_string())
        })?;
        lock(&surface.shared.slot)
            .frame
            .take()
            .ok_or_else(|| FrameCodecError::Processing("no frame available on the decode surface".to_string()))
    }
}

impl Drop for SurfaceBridge {
    fn drop(&mut self) {
        self.release();
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), FrameCodecError> {
    if width == 0 || height == 0 || width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
        return Err(FrameCodecError::GraphicsContext(format!(
            "unsupported surface size {width}x{height}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use image::{Rgb, RgbImage};

    use super::*;

    fn solid(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_rgb(&RgbImage::from_pixel(width, height, Rgb([10, 20, 30])), PixelLayout::Rgb24)
    }

    #[test]
    fn frame_rendered_before_wait_is_not_missed() {
        let bridge = SurfaceBridge::new();
        let surface = bridge.acquire_for_decode(4, 4).unwrap();
        surface.render(solid(4, 4)).unwrap();

        assert!(bridge.await_frame_ready(Duration::from_millis(1)).unwrap());
        let jpeg = bridge.read_current_frame_as_image(StillFormat::default()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        // Flag cleared after the read.
        assert!(!bridge.await_frame_ready(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn wait_wakes_on_render_from_another_thread() {
        let bridge = SurfaceBridge::new();
        let surface = bridge.acquire_for_decode(2, 2).unwrap();
        let renderer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            surface.render(solid(2, 2)).unwrap();
        });

        assert!(bridge.await_frame_ready(Duration::from_secs(5)).unwrap());
        renderer.join().unwrap();
    }

    #[test]
    fn reading_without_a_frame_fails() {
        let bridge = SurfaceBridge::new();
        bridge.acquire_for_decode(2, 2).unwrap();
        assert!(matches!(
            bridge.read_current_frame_as_image(StillFormat::Png),
            Err(FrameCodecError::Processing(_))
        ));
    }

    #[test]
    fn release_is_idempotent_and_blocks_further_use() {
        let bridge = SurfaceBridge::new();
        let surface = bridge.acquire_for_decode(2, 2).unwrap();
        bridge.release();
        bridge.release();

        assert!(bridge.is_released());
        assert!(matches!(surface.render(solid(2, 2)), Err(FrameCodecError::GraphicsContext(_))));
        assert!(matches!(
            bridge.await_frame_ready(Duration::from_millis(1)),
            Err(FrameCodecError::GraphicsContext(_))
        ));
    }

    #[test]
    fn release_wakes_a_waiting_encoder() {
        let bridge = Arc::new(SurfaceBridge::new());
        let surface = bridge.acquire_for_encode(2, 2, PixelLayout::Yuv420p).unwrap();
        let waiter = thread::spawn(move || surface.take_frame(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        bridge.release();
        assert!(waiter.join().unwrap().is_err());
    }

    #[test]
    fn zero_and_odd_dimensions_are_rejected() {
        let bridge = SurfaceBridge::new();
        assert!(bridge.acquire_for_decode(0, 10).is_err());
        assert!(bridge.acquire_for_encode(5, 4, PixelLayout::Nv12).is_err());
    }

    #[test]
    fn submitted_bitmaps_are_resized_and_queued_in_order() {
        let bridge = SurfaceBridge::new();
        let surface = bridge.acquire_for_encode(4, 4, PixelLayout::Nv12).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([0, 255, 0])));

        bridge.submit_bitmap_frame(&image, 0).unwrap();
        bridge.submit_bitmap_frame(&image, 33_333).unwrap();
        assert_eq!(surface.pending(), 2);

        let first = surface.take_frame(Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.presentation_time_us, 0);
        assert_eq!((first.pixels.width(), first.pixels.height()), (4, 4));
        assert_eq!(first.pixels.layout(), PixelLayout::Nv12);
        let second = surface.take_frame(Duration::ZERO).unwrap().unwrap();
        assert_eq!(second.presentation_time_us, 33_333);
    }
}
