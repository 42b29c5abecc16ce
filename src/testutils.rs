//! An in-memory LaserShark for exercising the session without hardware.
//!
//! [`SimulatedDevice`] is a [`UsbBackend`]; every handle it opens shares the
//! same device state, so tests keep a clone around to inspect what the driver
//! sent and to inject failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::protocol::{
    CommandStatus, Sample, CMD_CLEAR_RINGBUFFER, CMD_GET_DAC_MAX, CMD_GET_FW_MAJOR_VERSION,
    CMD_GET_FW_MINOR_VERSION, CMD_GET_ILDA_RATE, CMD_GET_MAX_ILDA_RATE,
    CMD_GET_RINGBUFFER_EMPTY_SAMPLE_COUNT, CMD_GET_RINGBUFFER_SAMPLE_COUNT, CMD_SET_ILDA_RATE,
    CMD_SET_OUTPUT, CONTROL_PACKET_SIZE, ENDPOINT_CONTROL_IN, ENDPOINT_CONTROL_OUT,
    ENDPOINT_DATA_OUT, LASERSHARK_PID, LASERSHARK_VID, SAMPLE_SIZE_BYTES,
};
use crate::transport::{UsbBackend, UsbHandle};

#[derive(Debug)]
struct DeviceState {
    present: bool,
    open_handles: usize,
    claimed: HashSet<u8>,
    alt_setting: Option<(u8, u8)>,

    rate: u32,
    max_rate: u32,
    dac_max: u32,
    capacity: u32,
    buffered: u32,
    drain_per_poll: u32,
    firmware: (u32, u32),
    output_enabled: bool,
    output_history: Vec<bool>,

    control_frames: Vec<Vec<u8>>,
    pending_response: Option<[u8; CONTROL_PACKET_SIZE]>,
    data: Vec<u8>,
    transfer_sizes: Vec<usize>,

    /// Command -> exchanges allowed to succeed before FAIL is answered.
    failing_commands: HashMap<u8, usize>,
    /// Command -> (exchanges allowed to succeed, error returned on write).
    transport_failures: HashMap<u8, (usize, rusb::Error)>,
    claim_error: Option<(u8, rusb::Error)>,
    alt_setting_error: Option<rusb::Error>,
    control_error: Option<rusb::Error>,
    short_response: bool,
    data_error: Option<rusb::Error>,
    hold_data: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            present: true,
            open_handles: 0,
            claimed: HashSet::new(),
            alt_setting: None,
            rate: 0,
            max_rate: 40_000,
            dac_max: 4095,
            capacity: 1024,
            buffered: 0,
            drain_per_poll: u32::MAX,
            firmware: (2, 2),
            output_enabled: true,
            output_history: Vec::new(),
            control_frames: Vec::new(),
            pending_response: None,
            data: Vec::new(),
            transfer_sizes: Vec::new(),
            failing_commands: HashMap::new(),
            transport_failures: HashMap::new(),
            claim_error: None,
            alt_setting_error: None,
            control_error: None,
            short_response: false,
            data_error: None,
            hold_data: false,
        }
    }
}

impl DeviceState {
    /// Times `command` was written before the frame being handled.
    fn prior_exchanges(&self, command: u8) -> usize {
        self.control_frames
            .iter()
            .filter(|f| f[0] == command)
            .count()
            .saturating_sub(1)
    }

    fn transport_failure(&self, command: u8) -> Option<rusb::Error> {
        match self.transport_failures.get(&command) {
            Some(&(successes, error)) if self.prior_exchanges(command) >= successes => Some(error),
            _ => None,
        }
    }

    fn respond(&mut self, frame: &[u8]) -> [u8; CONTROL_PACKET_SIZE] {
        let command = frame[0];
        let u32_arg = || {
            frame
                .get(1..5)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };

        let fails = matches!(
            self.failing_commands.get(&command),
            Some(&successes) if self.prior_exchanges(command) >= successes
        );
        if fails {
            let mut response = [0u8; CONTROL_PACKET_SIZE];
            response[0] = command;
            response[1] = CommandStatus::FAIL;
            return response;
        }

        let outcome: Option<u32> = match command {
            CMD_SET_OUTPUT => frame.get(1).map(|&v| {
                self.output_enabled = v == 1;
                self.output_history.push(self.output_enabled);
                0
            }),
            CMD_SET_ILDA_RATE => u32_arg().map(|rate| {
                self.rate = rate;
                0
            }),
            CMD_GET_ILDA_RATE => Some(self.rate),
            CMD_GET_MAX_ILDA_RATE => Some(self.max_rate),
            CMD_GET_DAC_MAX => Some(self.dac_max),
            CMD_GET_RINGBUFFER_SAMPLE_COUNT => Some(self.capacity),
            CMD_GET_RINGBUFFER_EMPTY_SAMPLE_COUNT => {
                self.buffered = self.buffered.saturating_sub(self.drain_per_poll);
                Some(
                    self.capacity
                        .saturating_sub(1)
                        .saturating_sub(self.buffered),
                )
            }
            CMD_GET_FW_MAJOR_VERSION => Some(self.firmware.0),
            CMD_GET_FW_MINOR_VERSION => Some(self.firmware.1),
            CMD_CLEAR_RINGBUFFER => {
                self.buffered = 0;
                Some(0)
            }
            _ => None,
        };

        let mut response = [0u8; CONTROL_PACKET_SIZE];
        response[0] = command;
        match outcome {
            Some(value) => {
                response[1] = CommandStatus::SUCCESS;
                response[2..6].copy_from_slice(&value.to_le_bytes());
            }
            None => response[1] = CommandStatus::UNKNOWN,
        }
        response
    }
}

/// A simulated LaserShark that can be opened any number of times.
#[derive(Clone, Debug, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

/// A handle onto a [`SimulatedDevice`].
#[derive(Debug)]
pub struct SimulatedHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a handle directly, bypassing the backend lookup.
    pub fn handle(&self) -> SimulatedHandle {
        self.state().open_handles += 1;
        SimulatedHandle {
            state: self.state.clone(),
        }
    }

    /// Simulate plugging or unplugging the device.
    pub fn set_present(&self, present: bool) {
        self.state().present = present;
    }

    pub fn set_resolution(&self, dac_max: u32) {
        self.state().dac_max = dac_max;
    }

    pub fn set_ringbuffer_capacity(&self, capacity: u32) {
        self.state().capacity = capacity;
    }

    /// Samples the device plays out per empty-count query. Zero never drains.
    pub fn set_drain_per_poll(&self, samples: u32) {
        self.state().drain_per_poll = samples;
    }

    pub fn set_firmware(&self, major: u32, minor: u32) {
        self.state().firmware = (major, minor);
    }

    /// Answer `command` with a FAIL status from now on.
    pub fn fail_command(&self, command: u8) {
        self.fail_command_after(command, 0);
    }

    /// Answer `command` with a FAIL status once it has been exchanged
    /// `successes` times.
    pub fn fail_command_after(&self, command: u8, successes: usize) {
        self.state().failing_commands.insert(command, successes);
    }

    /// Fail writes of `command` with `error` from now on.
    pub fn fail_command_transport(&self, command: u8, error: rusb::Error) {
        self.fail_command_transport_after(command, 0, error);
    }

    /// Fail writes of `command` with `error` once it has been exchanged
    /// `successes` times.
    pub fn fail_command_transport_after(&self, command: u8, successes: usize, error: rusb::Error) {
        self.state()
            .transport_failures
            .insert(command, (successes, error));
    }

    pub fn fail_claim(&self, iface: u8, error: rusb::Error) {
        self.state().claim_error = Some((iface, error));
    }

    pub fn fail_alt_setting(&self, error: rusb::Error) {
        self.state().alt_setting_error = Some(error);
    }

    /// Fail every control write with `error`.
    pub fn set_control_error(&self, error: Option<rusb::Error>) {
        self.state().control_error = error;
    }

    /// Truncate every control response.
    pub fn set_short_response(&self, short: bool) {
        self.state().short_response = short;
    }

    /// Fail every data transfer with `error`.
    pub fn set_data_error(&self, error: Option<rusb::Error>) {
        self.state().data_error = error;
    }

    /// Block data transfers until released.
    pub fn set_hold_data(&self, hold: bool) {
        self.state().hold_data = hold;
    }

    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }

    pub fn is_claimed(&self, iface: u8) -> bool {
        self.state().claimed.contains(&iface)
    }

    pub fn alt_setting(&self) -> Option<(u8, u8)> {
        self.state().alt_setting
    }

    pub fn sample_rate(&self) -> u32 {
        self.state().rate
    }

    pub fn output_enabled(&self) -> bool {
        self.state().output_enabled
    }

    /// Every value written with the set-output command, in order.
    pub fn output_history(&self) -> Vec<bool> {
        self.state().output_history.clone()
    }

    /// Raw control frames in the order they were written.
    pub fn control_frames(&self) -> Vec<Vec<u8>> {
        self.state().control_frames.clone()
    }

    /// Command bytes in the order they were written.
    pub fn commands(&self) -> Vec<u8> {
        self.state().control_frames.iter().map(|f| f[0]).collect()
    }

    /// Byte lengths of each data transfer.
    pub fn transfer_sizes(&self) -> Vec<usize> {
        self.state().transfer_sizes.clone()
    }

    /// Every sample received on the data endpoint.
    pub fn received_samples(&self) -> Vec<Sample> {
        self.state()
            .data
            .chunks_exact(SAMPLE_SIZE_BYTES)
            .map(|c| Sample::from_bytes(&[c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect()
    }
}

impl UsbBackend for SimulatedDevice {
    type Handle = SimulatedHandle;

    fn open_device(&self, vendor_id: u16, product_id: u16) -> rusb::Result<Option<Self::Handle>> {
        let matches = vendor_id == LASERSHARK_VID && product_id == LASERSHARK_PID;
        if !matches || !self.state().present {
            return Ok(None);
        }
        Ok(Some(self.handle()))
    }
}

impl SimulatedHandle {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UsbHandle for SimulatedHandle {
    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.state();
        match state.claim_error {
            Some((failing, error)) if failing == iface => Err(error),
            _ if state.claimed.contains(&iface) => Err(rusb::Error::Busy),
            _ => {
                state.claimed.insert(iface);
                Ok(())
            }
        }
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        if self.state().claimed.remove(&iface) {
            Ok(())
        } else {
            Err(rusb::Error::NotFound)
        }
    }

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()> {
        let mut state = self.state();
        if let Some(error) = state.alt_setting_error {
            return Err(error);
        }
        state.alt_setting = Some((iface, setting));
        Ok(())
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        match endpoint {
            ENDPOINT_CONTROL_OUT => {
                let mut state = self.state();
                state.control_frames.push(data.to_vec());
                if let Some(error) = state.control_error {
                    return Err(error);
                }
                if let Some(error) = data.first().and_then(|&c| state.transport_failure(c)) {
                    return Err(error);
                }
                let response = state.respond(data);
                state.pending_response = Some(response);
                Ok(data.len())
            }
            ENDPOINT_DATA_OUT => {
                while self.state().hold_data {
                    thread::sleep(Duration::from_millis(1));
                }
                let mut state = self.state();
                if let Some(error) = state.data_error {
                    return Err(error);
                }
                state.data.extend_from_slice(data);
                state.transfer_sizes.push(data.len());
                state.buffered += (data.len() / SAMPLE_SIZE_BYTES) as u32;
                Ok(data.len())
            }
            _ => Err(rusb::Error::InvalidParam),
        }
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        if endpoint != ENDPOINT_CONTROL_IN {
            return Err(rusb::Error::InvalidParam);
        }
        let mut state = self.state();
        let response = state.pending_response.take().ok_or(rusb::Error::Timeout)?;
        let len = if state.short_response {
            12
        } else {
            CONTROL_PACKET_SIZE
        };
        let len = len.min(buf.len());
        buf[..len].copy_from_slice(&response[..len]);
        Ok(len)
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        let mut state = self.state();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}
