//! Request/response exchanges on the control endpoints.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{CommandStatus, CONTROL_PACKET_SIZE, ENDPOINT_CONTROL_IN, ENDPOINT_CONTROL_OUT};
use crate::transport::UsbHandle;

/// Value carried after the command byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// A bare command byte (queries).
    None,
    /// One value byte.
    U8(u8),
    /// A little-endian 32-bit value.
    U32(u32),
}

/// A decoded control response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// The command byte echoed back by the firmware.
    pub command: u8,
    pub status: CommandStatus,
    /// The 32-bit return value. Meaningless unless `status` is `Success`.
    pub value: u32,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// The return value when the device reported success.
    pub fn success_value(&self) -> Option<u32> {
        self.is_success().then_some(self.value)
    }

    /// Parse a full response frame.
    pub fn parse(frame: &[u8; CONTROL_PACKET_SIZE]) -> Self {
        Response {
            command: frame[0],
            status: CommandStatus::from_byte(frame[1]),
            value: u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]),
        }
    }
}

/// Serializes command exchanges on the control interface.
///
/// Each call to [`request`](Self::request) holds the channel lock for the whole
/// write/read pair, so responses can never be interleaved between callers.
pub struct CommandChannel<H> {
    handle: H,
    lock: Mutex<()>,
    timeout: Duration,
}

impl<H: UsbHandle> CommandChannel<H> {
    pub fn new(handle: H, timeout: Duration) -> Self {
        CommandChannel {
            handle,
            lock: Mutex::new(()),
            timeout,
        }
    }

    pub fn into_handle(self) -> H {
        self.handle
    }

    /// Send one command and wait for its 64-byte response.
    ///
    /// Any USB failure or short transfer on either leg is an error. A response
    /// with a failure status is returned as-is for the caller to interpret.
    pub fn request(&self, command: u8, payload: Payload) -> Result<Response> {
        let mut frame = [0u8; 5];
        frame[0] = command;
        let len = match payload {
            Payload::None => 1,
            Payload::U8(value) => {
                frame[1] = value;
                2
            }
            Payload::U32(value) => {
                frame[1..5].copy_from_slice(&value.to_le_bytes());
                5
            }
        };

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let context = || format!("transmitting command {:#04x}", command);
        let sent = self
            .handle
            .write_bulk(ENDPOINT_CONTROL_OUT, &frame[..len], self.timeout)
            .map_err(|e| Error::usb(context(), e))?;
        if sent != len {
            return Err(Error::short_transfer(context(), len, sent));
        }

        let context = || format!("receiving response to command {:#04x}", command);
        let mut response = [0u8; CONTROL_PACKET_SIZE];
        let received = self
            .handle
            .read_bulk(ENDPOINT_CONTROL_IN, &mut response, self.timeout)
            .map_err(|e| Error::usb(context(), e))?;
        if received != CONTROL_PACKET_SIZE {
            return Err(Error::short_transfer(context(), CONTROL_PACKET_SIZE, received));
        }

        Ok(Response::parse(&response))
    }

    /// Send a single value byte. Returns whether the device reported success.
    pub fn set_u8(&self, command: u8, value: u8) -> Result<bool> {
        Ok(self.request(command, Payload::U8(value))?.is_success())
    }

    /// Send a 32-bit value. Returns whether the device reported success.
    pub fn set_u32(&self, command: u8, value: u32) -> Result<bool> {
        Ok(self.request(command, Payload::U32(value))?.is_success())
    }

    /// Query a 32-bit value. `None` when the device reported failure.
    pub fn get_u32(&self, command: u8) -> Result<Option<u32>> {
        Ok(self.request(command, Payload::None)?.success_value())
    }
}
