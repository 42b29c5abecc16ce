//! USB transport used by the session.
//!
//! The session never talks to `rusb` directly. It goes through [`UsbBackend`]
//! (device lookup) and [`UsbHandle`] (one open device handle) so that the
//! command channel and streaming engine can run against a simulated device
//! in tests. [`RusbBackend`] is the implementation for real hardware.

use std::time::Duration;

use rusb::{DeviceHandle, UsbContext};

use crate::protocol::{LASERSHARK_PID, LASERSHARK_VID};

/// An open handle to a LaserShark.
///
/// Claiming and releasing need exclusive access; the bulk transfers are
/// shared between the caller and the streaming worker.
pub trait UsbHandle: Send + Sync + 'static {
    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()>;

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()>;

    /// Write to a bulk OUT endpoint, returning the number of bytes sent.
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;

    /// Read from a bulk IN endpoint, returning the number of bytes received.
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
}

/// Finds and opens devices.
pub trait UsbBackend: Send + Sync + 'static {
    type Handle: UsbHandle;

    /// Open the first device matching the ids, or `None` if there is none.
    fn open_device(&self, vendor_id: u16, product_id: u16) -> rusb::Result<Option<Self::Handle>>;
}

impl<T: UsbContext + 'static> UsbHandle for DeviceHandle<T> {
    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, iface)
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, iface)
    }

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()> {
        DeviceHandle::set_alternate_setting(self, iface, setting)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }
}

/// libusb-backed transport.
pub struct RusbBackend {
    context: rusb::Context,
}

impl RusbBackend {
    /// Create a backend with its own libusb context.
    pub fn new() -> rusb::Result<Self> {
        Ok(RusbBackend {
            context: rusb::Context::new()?,
        })
    }

    /// Use an existing libusb context.
    pub fn with_context(context: rusb::Context) -> Self {
        RusbBackend { context }
    }

    pub fn context(&self) -> &rusb::Context {
        &self.context
    }

    /// List every attached device with the given ids.
    pub fn list_devices(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> rusb::Result<Vec<rusb::Device<rusb::Context>>> {
        let devices = self.context.devices()?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let descriptor = device.device_descriptor()?;
            if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
                found.push(device);
            }
        }

        Ok(found)
    }
}

impl UsbBackend for RusbBackend {
    type Handle = DeviceHandle<rusb::Context>;

    fn open_device(&self, vendor_id: u16, product_id: u16) -> rusb::Result<Option<Self::Handle>> {
        Ok(self.context.open_device_with_vid_pid(vendor_id, product_id))
    }
}

/// List attached LaserShark devices.
pub fn list_devices() -> rusb::Result<Vec<rusb::Device<rusb::Context>>> {
    RusbBackend::new()?.list_devices(LASERSHARK_VID, LASERSHARK_PID)
}

/// Check if a USB device is a LaserShark.
pub fn is_lasershark_device<T: UsbContext>(device: &rusb::Device<T>) -> bool {
    device
        .device_descriptor()
        .map_or(false, |d| d.vendor_id() == LASERSHARK_VID && d.product_id() == LASERSHARK_PID)
}
