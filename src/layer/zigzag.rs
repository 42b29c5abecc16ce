//! Serpentine (boustrophedon) raster layer.

use std::sync::Arc;

use log::debug;

use crate::decode::{GrayImage, ImageDecoder};
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::protocol::{Sample, SAMPLE_SIZE_BYTES};

/// Streams an image row by row, alternating direction on every row.
///
/// Even rows run left to right and odd rows right to left, so consecutive
/// samples are always one pixel apart and the galvos never have to fly back
/// across the image. Every pixel is emitted, but only non-zero pixels count
/// toward [`total_samples`](Layer::total_samples).
///
/// This layer encodes the LaserShark V2.x sample format.
pub struct ZigZagLayer {
    decoder: Arc<dyn ImageDecoder>,
    populated: bool,
    image: GrayImage,
    x_origin: u32,
    y_origin: u32,
    cursor_x: u32,
    cursor_y: u32,
    total_samples: u32,
    samples_left: u32,
}

impl ZigZagLayer {
    /// An empty layer decoding PNG data.
    #[cfg(feature = "png")]
    pub fn new() -> Self {
        Self::with_decoder(crate::decode::PngDecoder)
    }

    /// An empty layer using a custom image decoder.
    pub fn with_decoder(decoder: impl ImageDecoder + 'static) -> Self {
        ZigZagLayer {
            decoder: Arc::new(decoder),
            populated: false,
            image: GrayImage::default(),
            x_origin: 0,
            y_origin: 0,
            cursor_x: 0,
            cursor_y: 0,
            total_samples: 0,
            samples_left: 0,
        }
    }

    /// Populate from an already decoded image.
    pub fn populate_image(&mut self, x_origin: u32, y_origin: u32, image: GrayImage) -> Result<()> {
        if self.populated {
            return Err(Error::AlreadyPopulated);
        }
        if image.is_empty() {
            return Err(Error::EmptyImage);
        }

        let lit = image.pixels().iter().filter(|&&p| p != 0).count();
        debug!(
            "Layer dimensions x: {} y: {}, {} lit pixels",
            image.width(),
            image.height(),
            lit
        );

        self.image = image;
        self.x_origin = x_origin;
        self.y_origin = y_origin;
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.total_samples = u32::try_from(lit).unwrap_or(u32::MAX);
        self.samples_left = self.total_samples;
        self.populated = true;
        Ok(())
    }

    /// Current traversal position within the image.
    pub fn cursor(&self) -> (u32, u32) {
        (self.cursor_x, self.cursor_y)
    }

    /// True once every pixel has been emitted.
    fn traversal_complete(&self) -> bool {
        self.populated && self.cursor_y >= self.image.height()
    }

    fn next_sample(&mut self) -> Sample {
        if self.traversal_complete() {
            // Park on the last visited pixel with the beam off.
            let y = self.image.height() - 1;
            return Sample::blank_at(
                deflection(self.x_origin, self.cursor_x),
                deflection(self.y_origin, y),
            );
        }

        let intensity = self.image.get(self.cursor_x, self.cursor_y);
        let sample = Sample::from_intensity(
            deflection(self.x_origin, self.cursor_x),
            deflection(self.y_origin, self.cursor_y),
            intensity,
        );
        if intensity != 0 {
            self.samples_left = self.samples_left.saturating_sub(1);
        }
        self.advance();
        sample
    }

    fn advance(&mut self) {
        if self.cursor_y & 1 == 1 {
            if self.cursor_x == 0 {
                self.cursor_y += 1;
            } else {
                self.cursor_x -= 1;
            }
        } else if self.cursor_x == self.image.width() - 1 {
            self.cursor_y += 1;
        } else {
            self.cursor_x += 1;
        }
    }
}

#[cfg(feature = "png")]
impl Default for ZigZagLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for ZigZagLayer {
    fn populate(&mut self, x_origin: u32, y_origin: u32, data: &[u8]) -> Result<()> {
        if self.populated {
            return Err(Error::AlreadyPopulated);
        }
        let image = self.decoder.decode(data)?;
        self.populate_image(x_origin, y_origin, image)
    }

    fn clear(&mut self) {
        self.populated = false;
        self.image = GrayImage::default();
        self.x_origin = 0;
        self.y_origin = 0;
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.total_samples = 0;
        self.samples_left = 0;
    }

    fn is_populated(&self) -> bool {
        self.populated
    }

    fn fill_transfer_buffer(&mut self, sample_count: usize, buf: &mut [u8]) -> usize {
        if !self.populated {
            return 0;
        }

        let count = sample_count.min(buf.len() / SAMPLE_SIZE_BYTES);
        for chunk in buf.chunks_exact_mut(SAMPLE_SIZE_BYTES).take(count) {
            let sample = self.next_sample();
            chunk.copy_from_slice(&sample.to_bytes());
        }
        count
    }

    fn samples_left(&self) -> u32 {
        self.samples_left
    }

    fn total_samples(&self) -> u32 {
        self.total_samples
    }

    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn origin(&self) -> (u32, u32) {
        (self.x_origin, self.y_origin)
    }
}

fn deflection(origin: u32, position: u32) -> u16 {
    u16::try_from(origin.saturating_add(position)).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Hands out a fixed image regardless of input, or fails.
    struct FixedDecoder(Option<GrayImage>);

    impl ImageDecoder for FixedDecoder {
        fn decode(&self, _data: &[u8]) -> Result<GrayImage> {
            self.0
                .clone()
                .ok_or_else(|| Error::decode(io::Error::new(io::ErrorKind::InvalidData, "bad image")))
        }
    }

    fn layer_with(width: u32, height: u32, pixels: Vec<u8>, origin: (u32, u32)) -> ZigZagLayer {
        let image = GrayImage::new(width, height, pixels).unwrap();
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(None));
        layer.populate_image(origin.0, origin.1, image).unwrap();
        layer
    }

    fn drain(layer: &mut ZigZagLayer, n: usize) -> Vec<Sample> {
        let mut buf = vec![0u8; n * SAMPLE_SIZE_BYTES];
        let written = layer.fill_transfer_buffer(n, &mut buf);
        buf.chunks_exact(SAMPLE_SIZE_BYTES)
            .take(written)
            .map(|c| Sample::from_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_unpopulated_layer_is_empty() {
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(None));
        assert!(!layer.is_populated());
        assert_eq!(layer.total_samples(), 0);
        assert_eq!(layer.samples_left(), 0);
        assert_eq!((layer.width(), layer.height()), (0, 0));
        let mut buf = [0u8; 64];
        assert_eq!(layer.fill_transfer_buffer(8, &mut buf), 0);
    }

    #[test]
    fn test_total_excludes_zero_pixels() {
        let layer = layer_with(3, 2, vec![0, 5, 0, 255, 0, 1], (0, 0));
        assert_eq!(layer.total_samples(), 3);
        assert_eq!(layer.samples_left(), 3);
    }

    #[test]
    fn test_populate_through_decoder() {
        let image = GrayImage::new(2, 1, vec![9, 0]).unwrap();
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(Some(image)));
        layer.populate(4, 5, b"ignored").unwrap();
        assert!(layer.is_populated());
        assert_eq!(layer.origin(), (4, 5));
        assert_eq!(layer.total_samples(), 1);
    }

    #[test]
    fn test_repopulate_fails_and_keeps_state() {
        let image = GrayImage::new(1, 1, vec![7]).unwrap();
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(Some(image)));
        layer.populate(1, 2, b"").unwrap();
        drain(&mut layer, 1);

        let err = layer.populate(8, 9, b"").unwrap_err();
        assert!(matches!(err, Error::AlreadyPopulated));
        assert_eq!(layer.origin(), (1, 2));
        assert_eq!(layer.total_samples(), 1);
        assert_eq!(layer.samples_left(), 0);
    }

    #[test]
    fn test_decode_failure_leaves_layer_unpopulated() {
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(None));
        assert!(matches!(layer.populate(0, 0, b"x"), Err(Error::Decode(_))));
        assert!(!layer.is_populated());
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(Some(GrayImage::default())));
        assert!(matches!(layer.populate(0, 0, b""), Err(Error::EmptyImage)));
        assert!(!layer.is_populated());
    }

    #[test]
    fn test_zero_width_image_is_rejected() {
        let image = GrayImage::new(0, 3, Vec::new()).unwrap();
        let mut layer = ZigZagLayer::with_decoder(FixedDecoder(Some(image)));
        assert!(matches!(layer.populate(0, 0, b""), Err(Error::EmptyImage)));
        assert!(!layer.is_populated());
        let mut buf = [0u8; SAMPLE_SIZE_BYTES];
        assert_eq!(layer.fill_transfer_buffer(1, &mut buf), 0);
    }

    #[test]
    fn test_serpentine_order() {
        let mut layer = layer_with(3, 2, vec![1; 6], (0, 0));
        let coords: Vec<(u16, u16)> = drain(&mut layer, 6).iter().map(|s| (s.x, s.y)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0), (2, 0), (2, 1), (1, 1), (0, 1)]);
        assert!(layer.traversal_complete());
    }

    #[test]
    fn test_serpentine_across_calls() {
        let mut layer = layer_with(2, 3, vec![1; 6], (0, 0));
        let mut coords = Vec::new();
        for _ in 0..3 {
            coords.extend(drain(&mut layer, 2).iter().map(|s| (s.x, s.y)));
        }
        assert_eq!(coords, vec![(0, 0), (1, 0), (1, 1), (0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_remaining_counts_only_lit_samples() {
        let mut layer = layer_with(4, 1, vec![0, 10, 0, 20], (0, 0));
        assert_eq!(layer.samples_left(), 2);
        drain(&mut layer, 1);
        assert_eq!(layer.samples_left(), 2);
        drain(&mut layer, 1);
        assert_eq!(layer.samples_left(), 1);
        drain(&mut layer, 2);
        assert_eq!(layer.samples_left(), 0);
    }

    #[test]
    fn test_zero_pixels_are_emitted_blank() {
        let mut layer = layer_with(2, 1, vec![0, 255], (0, 0));
        let samples = drain(&mut layer, 2);
        assert_eq!(samples[0].a, 0);
        assert!(!samples[0].is_on());
        assert!(samples[0].is_interleaved());
        assert_eq!(samples[1].a, 4080);
        assert_eq!(samples[1].b, 4080);
        assert!(samples[1].is_on());
    }

    #[test]
    fn test_white_square_with_origin() {
        let mut layer = layer_with(2, 2, vec![255; 4], (10, 20));
        assert_eq!(layer.total_samples(), 4);

        let samples = drain(&mut layer, 4);
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.is_on()));
        let xs: Vec<u16> = samples.iter().map(|s| s.x).collect();
        let ys: Vec<u16> = samples.iter().map(|s| s.y).collect();
        assert_eq!(xs, vec![10, 11, 11, 10]);
        assert_eq!(ys, vec![20, 20, 21, 21]);
        assert_eq!(layer.samples_left(), 0);
    }

    #[test]
    fn test_fill_past_end_parks_blanked() {
        let mut layer = layer_with(2, 1, vec![200, 200], (3, 3));
        let samples = drain(&mut layer, 4);
        assert_eq!(samples.len(), 4);
        assert!(samples[2..].iter().all(|s| !s.is_on() && s.a == 0));
        assert_eq!((samples[3].x, samples[3].y), (4, 3));
        assert_eq!(layer.samples_left(), 0);
    }

    #[test]
    fn test_fill_is_capped_by_buffer() {
        let mut layer = layer_with(4, 4, vec![1; 16], (0, 0));
        let mut buf = [0u8; 3 * SAMPLE_SIZE_BYTES];
        assert_eq!(layer.fill_transfer_buffer(10, &mut buf), 3);
        assert_eq!(layer.fill_transfer_buffer(0, &mut buf), 0);
        assert_eq!(layer.samples_left(), 13);
    }

    #[test]
    fn test_single_column_image() {
        let mut layer = layer_with(1, 3, vec![1, 1, 1], (0, 0));
        let ys: Vec<u16> = drain(&mut layer, 3).iter().map(|s| s.y).collect();
        assert_eq!(ys, vec![0, 1, 2]);
    }

    #[test]
    fn test_clear_resets_layer() {
        let mut layer = layer_with(2, 2, vec![1; 4], (1, 1));
        layer.clear();
        assert!(!layer.is_populated());
        assert_eq!(layer.total_samples(), 0);
        assert_eq!(layer.width(), 0);
        let image = GrayImage::new(1, 1, vec![1]).unwrap();
        layer.populate_image(0, 0, image).unwrap();
        assert!(layer.is_populated());
    }
}
