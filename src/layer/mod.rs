//! Renderable layers.
//!
//! A layer is an image the streaming worker consumes sample by sample. The
//! worker only ever talks to the [`Layer`] trait, so new traversal orders can
//! be added without touching it.

pub mod zigzag;

pub use self::zigzag::ZigZagLayer;

use crate::error::Result;

/// Capability interface implemented by every layer type.
///
/// Layers are not internally synchronized. The session keeps an installed
/// layer behind its job lock.
pub trait Layer: Send {
    /// Decode `data` and place the image with its upper-left corner at
    /// (`x_origin`, `y_origin`) in device coordinates.
    ///
    /// Fails if the data does not decode, the image is empty, or the layer
    /// was already populated. A failed call leaves the layer unchanged.
    fn populate(&mut self, x_origin: u32, y_origin: u32, data: &[u8]) -> Result<()>;

    /// Drop the image and return to the unpopulated state.
    fn clear(&mut self);

    fn is_populated(&self) -> bool;

    /// Encode up to `sample_count` wire samples into `buf`.
    ///
    /// At most `buf.len() / SAMPLE_SIZE_BYTES` samples are written. Returns
    /// the number of samples encoded, which is 0 for an unpopulated layer.
    fn fill_transfer_buffer(&mut self, sample_count: usize, buf: &mut [u8]) -> usize;

    /// "On" samples not yet emitted.
    fn samples_left(&self) -> u32;

    /// "On" samples in the whole image.
    fn total_samples(&self) -> u32;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Device coordinates of the image's upper-left corner.
    fn origin(&self) -> (u32, u32);
}
