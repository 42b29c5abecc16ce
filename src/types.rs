//! Status types shared between the session and its callers.

use std::fmt;

use crate::protocol::SUPPORTED_FIRMWARE_MAJOR;

/// Firmware version reported by the device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
}

impl FirmwareVersion {
    /// Whether the sample layout this crate encodes matches the firmware.
    pub fn is_supported(&self) -> bool {
        self.major == SUPPORTED_FIRMWARE_MAJOR
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Lifecycle of a streaming job.
///
/// A job moves `Idle -> Starting -> Running -> Draining -> Idle`. Failures
/// jump straight to cleanup and land back in `Idle` with the error message set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobState {
    #[default]
    Idle,
    /// Worker spawned, querying the device and enabling output.
    Starting,
    /// Samples are being pushed to the device.
    Running,
    /// Streaming ended; waiting for the ring buffer and making the device safe.
    Draining,
}

impl JobState {
    /// Whether a worker owns the layer in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, JobState::Idle)
    }
}

/// A consistent snapshot of the job and its layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerStatus {
    pub state: JobState,
    pub samples_left: u32,
    pub total_samples: u32,
    /// Empty when no error occurred.
    pub error: String,
}

impl LayerStatus {
    pub fn running(&self) -> bool {
        self.state.is_active()
    }

    pub fn done(&self) -> bool {
        !self.running()
    }
}
