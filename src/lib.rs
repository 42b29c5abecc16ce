//! Host driver for the LaserShark USB galvo laser projector.
//!
//! The crate negotiates a USB session with the device, streams image-derived
//! deflection and intensity samples to it on a background thread, and exposes
//! status and control to callers.
//!
//! # Overview
//!
//! - [`LaserShark`] is the device session. It claims the control and data
//!   interfaces, answers parameter queries over the command channel and owns
//!   at most one streaming job.
//! - [`Layer`] is anything the streaming worker can drain into the device.
//!   [`ZigZagLayer`] rasterizes a grayscale image in serpentine order.
//! - [`SessionConfig`] holds the tunables (default sample rate, transfer size,
//!   timeouts, drain polling).
//!
//! # Example
//!
//! ```no_run
//! use lasershark::{LaserShark, Layer, ZigZagLayer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let png_bytes = std::fs::read("layer.png")?;
//!
//!     let mut shark = LaserShark::with_rusb()?;
//!     if !shark.connect()? {
//!         return Err("no LaserShark attached".into());
//!     }
//!     shark.set_sample_rate(30_000)?;
//!
//!     let mut layer = ZigZagLayer::new();
//!     layer.populate(0, 0, &png_bytes)?;
//!     shark.set_layer(Box::new(layer));
//!     shark.start_layer()?;
//!
//!     while shark.layer_running() {
//!         std::thread::sleep(std::time::Duration::from_millis(100));
//!     }
//!     let error = shark.layer_error_message();
//!     if !error.is_empty() {
//!         eprintln!("layer failed: {}", error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `png` (default): [`decode::PngDecoder`] and [`ZigZagLayer::new`]
//! - `serde`: serialization for configuration and status types
//! - `testutils`: an in-memory simulated device for tests

pub mod command;
pub mod config;
pub mod decode;
mod error;
pub mod layer;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
mod worker;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

// Error types
pub use error::{Error, Result};

// Session and configuration
pub use config::SessionConfig;
pub use session::LaserShark;

// Layers
pub use decode::{GrayImage, ImageDecoder};
pub use layer::{Layer, ZigZagLayer};

// Transport
pub use transport::{RusbBackend, UsbBackend, UsbHandle};

// Types
pub use types::{FirmwareVersion, JobState, LayerStatus};

// Re-export rusb for consumers that need the Context type
pub use rusb;
