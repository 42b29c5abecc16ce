//! Error types for the lasershark crate.

use std::error::Error as StdError;
use std::fmt;

/// Error type shared by the command channel, device session and layers.
///
/// Only USB-level failures are errors in the transport sense. A well-formed
/// exchange whose status byte reports failure is not an error; those surface as
/// `Ok(false)` / `Ok(0)` from the session accessors.
#[derive(Debug)]
pub enum Error {
    /// A USB call failed.
    Usb {
        context: String,
        source: rusb::Error,
    },

    /// A USB transfer moved fewer bytes than the frame requires.
    ShortTransfer {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Interfaces were claimed but the power-on configuration failed.
    Connect(Box<Error>),

    /// The image-decode collaborator rejected the data.
    Decode(Box<dyn StdError + Send + Sync>),

    /// The decoded image has no pixels.
    EmptyImage,

    /// A decoder produced a pixel buffer that does not match its dimensions.
    ImageSize { width: u32, height: u32, len: usize },

    /// The layer already holds an image.
    AlreadyPopulated,

    /// The streaming worker thread could not be spawned.
    Thread(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Usb { context, source } => write!(f, "error {}: {}", context, source),
            Error::ShortTransfer {
                context,
                expected,
                actual,
            } => write!(
                f,
                "error {}: transferred {} of {} bytes",
                context, actual, expected
            ),
            Error::Connect(e) => write!(f, "error connecting: {}", e),
            Error::Decode(e) => write!(f, "layer decoder error: {}", e),
            Error::EmptyImage => write!(f, "layer was empty"),
            Error::ImageSize { width, height, len } => write!(
                f,
                "decoded {}x{} image has {} pixels",
                width, height, len
            ),
            Error::AlreadyPopulated => write!(f, "layer is populated, can't re-populate"),
            Error::Thread(e) => write!(f, "error spawning stream worker: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Usb { source, .. } => Some(source),
            Error::Connect(e) => Some(e.as_ref()),
            Error::Decode(e) => Some(e.as_ref()),
            Error::Thread(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Create a USB error annotated with what was being attempted.
    pub fn usb(context: impl Into<String>, source: rusb::Error) -> Self {
        Error::Usb {
            context: context.into(),
            source,
        }
    }

    /// Create a short transfer error.
    pub fn short_transfer(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Error::ShortTransfer {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Create a decode error from any error type.
    pub fn decode(err: impl StdError + Send + Sync + 'static) -> Self {
        Error::Decode(Box::new(err))
    }

    /// Returns true if this error originated in the USB transport.
    ///
    /// A transport error leaves the session in an unknown state; the caller is
    /// expected to disconnect and reconnect.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Usb { .. } | Error::ShortTransfer { .. } => true,
            Error::Connect(e) => e.is_transport(),
            _ => false,
        }
    }

    /// Returns the underlying USB error code, if any.
    pub fn usb_error(&self) -> Option<rusb::Error> {
        match self {
            Error::Usb { source, .. } => Some(*source),
            Error::Connect(e) => e.usb_error(),
            _ => None,
        }
    }
}

/// Result type for lasershark operations.
pub type Result<T> = std::result::Result<T, Error>;
