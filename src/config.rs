//! Session configuration.

use std::time::Duration;

use crate::protocol::{LASERSHARK_PID, LASERSHARK_VID};

/// Sample rate applied on every connect.
pub const DEFAULT_SAMPLE_RATE: u32 = 20_000;

/// Samples sent per bulk transfer on the data endpoint.
pub const DEFAULT_SAMPLES_PER_TRANSFER: usize = 64;

/// Tunables for a [`LaserShark`](crate::LaserShark) session.
///
/// Build one with [`SessionConfig::default()`] and the `with_*` setters:
///
/// ```
/// use lasershark::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_default_sample_rate(30_000)
///     .with_control_timeout(Duration::from_millis(250));
/// assert_eq!(config.default_sample_rate, 30_000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// USB vendor id to open.
    pub vendor_id: u16,
    /// USB product id to open.
    pub product_id: u16,
    /// Sample rate set right after the interfaces are claimed.
    pub default_sample_rate: u32,
    /// Upper bound on samples per data transfer.
    pub samples_per_transfer: usize,
    /// Timeout for each leg of a command exchange. Zero waits forever.
    pub control_timeout: Duration,
    /// Timeout for data transfers. Zero waits forever.
    pub data_timeout: Duration,
    /// Sleep between ring buffer polls while draining.
    pub drain_poll_interval: Duration,
    /// Give up draining after this many polls.
    pub drain_max_polls: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            vendor_id: LASERSHARK_VID,
            product_id: LASERSHARK_PID,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            samples_per_transfer: DEFAULT_SAMPLES_PER_TRANSFER,
            control_timeout: Duration::ZERO,
            data_timeout: Duration::ZERO,
            drain_poll_interval: Duration::from_millis(1),
            drain_max_polls: 60_000,
        }
    }
}

impl SessionConfig {
    pub fn with_device_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_default_sample_rate(mut self, rate: u32) -> Self {
        self.default_sample_rate = rate;
        self
    }

    /// Set the per-transfer sample bound. Values below 1 are raised to 1.
    pub fn with_samples_per_transfer(mut self, samples: usize) -> Self {
        self.samples_per_transfer = samples.max(1);
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    pub fn with_drain_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.drain_poll_interval = interval;
        self.drain_max_polls = max_polls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device() {
        let config = SessionConfig::default();
        assert_eq!(config.vendor_id, 0x1fc9);
        assert_eq!(config.product_id, 0x04d8);
        assert_eq!(config.default_sample_rate, 20_000);
        assert_eq!(config.samples_per_transfer, 64);
        assert_eq!(config.control_timeout, Duration::ZERO);
    }

    #[test]
    fn samples_per_transfer_is_at_least_one() {
        let config = SessionConfig::default().with_samples_per_transfer(0);
        assert_eq!(config.samples_per_transfer, 1);
    }
}
