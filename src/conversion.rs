//! Pixel layouts and colour conversion.
//!
//! The conversion surface moves pixels between the codec's native layouts
//! (planar and semi-planar YUV 4:2:0) and packed RGB, which is what image
//! compression and decoding work with. Conversions use the BT.601
//! limited-range integer approximations.

use image::RgbImage;

use crate::error::FrameCodecError;

/// Memory layout of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelLayout {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// Planar YUV 4:2:0: a Y plane, then a U plane, then a V plane.
    #[default]
    Yuv420p,
    /// Semi-planar YUV 4:2:0: a Y plane, then interleaved U/V.
    Nv12,
}

impl PixelLayout {
    /// Number of bytes a tightly-packed `width × height` frame occupies.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        match self {
            PixelLayout::Rgb24 => luma * 3,
            PixelLayout::Yuv420p | PixelLayout::Nv12 => {
                let (chroma_width, chroma_height) = chroma_dimensions(width, height);
                luma + 2 * chroma_width * chroma_height
            }
        }
    }
}

/// A tightly-packed raw frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    layout: PixelLayout,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap `data`, checking that its length matches the layout.
    pub fn new(
        layout: PixelLayout,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Self, FrameCodecError> {
        let expected = layout.frame_size(width, height);
        if data.len() != expected {
            return Err(FrameCodecError::Processing(format!(
                "{layout:?} frame of {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            layout,
            width,
            height,
            data,
        })
    }

    /// Layout of the pixel data.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The packed pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert to packed RGB.
    pub fn to_rgb(&self) -> RgbImage {
        let rgb = match self.layout {
            PixelLayout::Rgb24 => self.data.clone(),
            PixelLayout::Yuv420p | PixelLayout::Nv12 => yuv420_to_rgb(self),
        };
        RgbImage::from_raw(self.width, self.height, rgb)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Convert a packed RGB image into `layout`.
    pub fn from_rgb(image: &RgbImage, layout: PixelLayout) -> Self {
        let (width, height) = image.dimensions();
        let data = match layout {
            PixelLayout::Rgb24 => image.as_raw().clone(),
            PixelLayout::Yuv420p | PixelLayout::Nv12 => rgb_to_yuv420(image, layout),
        };
        Self {
            layout,
            width,
            height,
            data,
        }
    }
}

/// Copy `rows` rows of `row_bytes` each out of a strided plane.
///
/// Codec frames frequently carry per-row padding (stride > row bytes). The
/// result is tightly packed.
pub fn pack_plane(data: &[u8], stride: usize, row_bytes: usize, rows: usize) -> Vec<u8> {
    if stride == row_bytes {
        data[..row_bytes * rows].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * rows);
        for row in 0..rows {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_bytes]);
        }
        buffer
    }
}

fn chroma_dimensions(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn rgb_to_yuv420(image: &RgbImage, layout: PixelLayout) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let (chroma_width, chroma_height) = chroma_dimensions(width, height);
    let luma_size = width as usize * height as usize;
    let chroma_size = chroma_width * chroma_height;
    let mut out = vec![0u8; luma_size + 2 * chroma_size];

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(i32::from);
        let luma = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        out[y as usize * width as usize + x as usize] = clamp_u8(luma);
    }

    for chroma_y in 0..chroma_height {
        for chroma_x in 0..chroma_width {
            let (mut r, mut g, mut b, mut count) = (0i32, 0i32, 0i32, 0i32);
            for dy in 0..2 {
                for dx in 0..2 {
                    let x = (chroma_x * 2 + dx) as u32;
                    let y = (chroma_y * 2 + dy) as u32;
                    if x < width && y < height {
                        let [pr, pg, pb] = image.get_pixel(x, y).0.map(i32::from);
                        r += pr;
                        g += pg;
                        b += pb;
                        count += 1;
                    }
                }
            }
            let (r, g, b) = (r / count, g / count, b / count);
            let u = clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
            let v = clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);

            let index = chroma_y * chroma_width + chroma_x;
            match layout {
                PixelLayout::Nv12 => {
                    out[luma_size + 2 * index] = u;
                    out[luma_size + 2 * index + 1] = v;
                }
                _ => {
                    out[luma_size + index] = u;
                    out[luma_size + chroma_size + index] = v;
                }
            }
        }
    }

    out
}

fn yuv420_to_rgb(buffer: &PixelBuffer) -> Vec<u8> {
    let width = buffer.width as usize;
    let height = buffer.height as usize;
    let (chroma_width, chroma_height) = chroma_dimensions(buffer.width, buffer.height);
    let luma_size = width * height;
    let chroma_size = chroma_width * chroma_height;
    let data = &buffer.data;
    let mut rgb = Vec::with_capacity(luma_size * 3);

    for y in 0..height {
        for x in 0..width {
            let index = (y / 2) * chroma_width + x / 2;
            let (u, v) = match buffer.layout {
                PixelLayout::Nv12 => (data[luma_size + 2 * index], data[luma_size + 2 * index + 1]),
                _ => (data[luma_size + index], data[luma_size + chroma_size + index]),
            };

            let c = i32::from(data[y * width + x]) - 16;
            let d = i32::from(u) - 128;
            let e = i32::from(v) - 128;

            rgb.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }

    rgb
}
