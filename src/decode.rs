//! Image decoding for layers.
//!
//! Layers only ever see 8-bit grayscale pixels. Anything able to produce a
//! [`GrayImage`] from bytes can back a layer through [`ImageDecoder`].

#[cfg(feature = "png")]
use crate::error::Error;
use crate::error::Result;

/// A row-major 8-bit grayscale image.
///
/// The pixel buffer always holds exactly `width * height` bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrayImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GrayImage {
    /// Wrap raw pixels. Returns `None` if the buffer size does not match.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() as u64 != width as u64 * height as u64 {
            return None;
        }
        Some(GrayImage {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// True if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel at column `x`, row `y`.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}

/// Turns compressed image bytes into grayscale pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<GrayImage>;
}

/// PNG decoder producing 8-bit luma.
///
/// Colour images are reduced with BT.601 weights and alpha is multiplied in,
/// so fully transparent pixels come out blank.
#[cfg(feature = "png")]
#[derive(Copy, Clone, Debug, Default)]
pub struct PngDecoder;

#[cfg(feature = "png")]
impl ImageDecoder for PngDecoder {
    fn decode(&self, data: &[u8]) -> Result<GrayImage> {
        let mut decoder = png::Decoder::new(data);
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info().map_err(Error::decode)?;

        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).map_err(Error::decode)?;

        let width = info.width as usize;
        let channels = info.color_type.samples();
        let mut pixels = Vec::with_capacity(width * info.height as usize);

        for row in buf.chunks(info.line_size).take(info.height as usize) {
            for px in row[..width * channels].chunks_exact(channels) {
                pixels.push(to_luma(info.color_type, px));
            }
        }

        let len = pixels.len();
        GrayImage::new(info.width, info.height, pixels).ok_or(Error::ImageSize {
            width: info.width,
            height: info.height,
            len,
        })
    }
}

#[cfg(feature = "png")]
fn to_luma(color_type: png::ColorType, px: &[u8]) -> u8 {
    use png::ColorType;

    let luma = |r: u8, g: u8, b: u8| -> u32 {
        (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000
    };
    let with_alpha = |value: u32, alpha: u8| -> u8 { ((value * alpha as u32 + 127) / 255) as u8 };

    match color_type {
        ColorType::Grayscale | ColorType::Indexed => px[0],
        ColorType::GrayscaleAlpha => with_alpha(px[0] as u32, px[1]),
        ColorType::Rgb => luma(px[0], px[1], px[2]) as u8,
        ColorType::Rgba => with_alpha(luma(px[0], px[1], px[2]), px[3]),
    }
}
