//! The LaserShark device session.
//!
//! [`LaserShark`] owns the USB link and at most one streaming job. Two locks
//! guard disjoint state: the command channel lock serializes control
//! exchanges, and the job lock guards the job state, its error text and the
//! installed layer. Status queries only ever take the job lock, which the
//! streaming worker never holds across USB calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::command::CommandChannel;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::protocol::{
    CMD_CLEAR_RINGBUFFER, CMD_GET_DAC_MAX, CMD_GET_FW_MAJOR_VERSION, CMD_GET_FW_MINOR_VERSION,
    CMD_GET_ILDA_RATE, CMD_GET_MAX_ILDA_RATE, CMD_GET_RINGBUFFER_EMPTY_SAMPLE_COUNT,
    CMD_GET_RINGBUFFER_SAMPLE_COUNT, CMD_SET_ILDA_RATE, CMD_SET_OUTPUT, CONTROL_INTERFACE,
    DATA_ALT_SETTING, DATA_INTERFACE, ENDPOINT_DATA_OUT, OUTPUT_DISABLE, OUTPUT_ENABLE,
};
use crate::transport::{RusbBackend, UsbBackend, UsbHandle};
use crate::types::{FirmwareVersion, JobState, LayerStatus};
use crate::worker::{JobShared, StreamWorker};

/// A claimed connection: control interface behind the command channel, data
/// interface for bulk sample transfers.
pub(crate) struct Link<H> {
    channel: CommandChannel<H>,
    data: H,
    data_timeout: Duration,
}

impl<H: UsbHandle> Link<H> {
    pub fn set_output(&self, enable: bool) -> Result<bool> {
        let value = if enable { OUTPUT_ENABLE } else { OUTPUT_DISABLE };
        self.channel.set_u8(CMD_SET_OUTPUT, value)
    }

    pub fn clear_samples(&self) -> Result<bool> {
        self.channel.set_u8(CMD_CLEAR_RINGBUFFER, 0)
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<bool> {
        self.channel.set_u32(CMD_SET_ILDA_RATE, rate)
    }

    /// Query a 32-bit value, mapping a protocol failure to 0.
    pub fn get_u32_or_zero(&self, command: u8) -> Result<u32> {
        Ok(self.channel.get_u32(command)?.unwrap_or(0))
    }

    pub fn resolution(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_DAC_MAX)
    }

    pub fn ringbuffer_sample_count(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_RINGBUFFER_SAMPLE_COUNT)
    }

    pub fn ringbuffer_empty_sample_count(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_RINGBUFFER_EMPTY_SAMPLE_COUNT)
    }

    /// Write encoded samples to the data endpoint.
    pub fn send_samples(&self, buf: &[u8]) -> Result<()> {
        let sent = self
            .data
            .write_bulk(ENDPOINT_DATA_OUT, buf, self.data_timeout)
            .map_err(|e| Error::usb("sending samples", e))?;
        if sent != buf.len() {
            return Err(Error::short_transfer("sending samples", buf.len(), sent));
        }
        Ok(())
    }

    /// Release both interfaces and close the handles.
    fn release(self) {
        let mut control = self.channel.into_handle();
        let mut data = self.data;
        if let Err(e) = data.release_interface(DATA_INTERFACE) {
            warn!("LaserShark could not release data interface: {}", e);
        }
        if let Err(e) = control.release_interface(CONTROL_INTERFACE) {
            warn!("LaserShark could not release control interface: {}", e);
        }
    }
}

/// A session with one LaserShark.
///
/// Command accessors return `Ok(false)` / `Ok(0)` both when the device reports
/// a protocol failure and when the session is not connected; `Err` is reserved
/// for transport failures, after which the caller should reconnect.
///
/// Dropping the session disconnects it, stopping any running job first.
pub struct LaserShark<B: UsbBackend> {
    backend: B,
    config: SessionConfig,
    link: Option<Arc<Link<B::Handle>>>,
    job: Arc<JobShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LaserShark<RusbBackend> {
    /// A session on real hardware through libusb, with default settings.
    pub fn with_rusb() -> Result<Self> {
        let backend = RusbBackend::new().map_err(|e| Error::usb("initializing libusb", e))?;
        Ok(Self::new(backend))
    }
}

impl<B: UsbBackend> LaserShark<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config(backend: B, config: SessionConfig) -> Self {
        LaserShark {
            backend,
            config,
            link: None,
            job: Arc::new(JobShared::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open and claim the device, then disable output and apply the default
    /// sample rate.
    ///
    /// Returns `Ok(false)` if already connected or if no device is attached.
    /// Any failure after the first claim unwinds everything acquired so far.
    pub fn connect(&mut self) -> Result<bool> {
        if self.is_connected() {
            return Ok(false);
        }

        let (vid, pid) = (self.config.vendor_id, self.config.product_id);
        let open = |what: &str| {
            self.backend
                .open_device(vid, pid)
                .map_err(|e| Error::usb(format!("opening {} handle", what), e))
        };
        let Some(mut control) = open("control")? else {
            return Ok(false);
        };
        let Some(mut data) = open("data")? else {
            return Ok(false);
        };

        control
            .claim_interface(CONTROL_INTERFACE)
            .map_err(|e| Error::usb("claiming control interface", e))?;

        if let Err(e) = data.claim_interface(DATA_INTERFACE) {
            let _ = control.release_interface(CONTROL_INTERFACE);
            return Err(Error::usb("claiming data interface", e));
        }

        if let Err(e) = data.set_alternate_setting(DATA_INTERFACE, DATA_ALT_SETTING) {
            let _ = data.release_interface(DATA_INTERFACE);
            let _ = control.release_interface(CONTROL_INTERFACE);
            return Err(Error::usb("setting alternative (bulk) data interface", e));
        }

        self.link = Some(Arc::new(Link {
            channel: CommandChannel::new(control, self.config.control_timeout),
            data,
            data_timeout: self.config.data_timeout,
        }));

        if let Err(e) = self.power_on() {
            self.release_link();
            return Err(Error::Connect(Box::new(e)));
        }

        info!("LaserShark connected");
        Ok(true)
    }

    fn power_on(&self) -> Result<()> {
        if !self.set_output(false)? {
            warn!("LaserShark refused to disable output on connect");
        }
        let rate = self.config.default_sample_rate;
        if !self.set_sample_rate(rate)? {
            warn!("LaserShark refused default sample rate {}", rate);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Stop any job, release the interfaces and close the device. Safe to call
    /// at any time, including repeatedly.
    pub fn disconnect(&mut self) {
        self.stop_and_clear_layer();
        if self.release_link() {
            info!("LaserShark disconnected");
        }
    }

    fn release_link(&mut self) -> bool {
        let Some(link) = self.link.take() else {
            return false;
        };
        match Arc::try_unwrap(link) {
            Ok(link) => link.release(),
            Err(_) => warn!("LaserShark link still in use at disconnect, closing without release"),
        }
        true
    }

    fn link(&self) -> Option<&Link<B::Handle>> {
        self.link.as_deref()
    }

    fn set_output(&self, enable: bool) -> Result<bool> {
        match self.link() {
            Some(link) => link.set_output(enable),
            None => Ok(false),
        }
    }

    fn get_u32_or_zero(&self, command: u8) -> Result<u32> {
        match self.link() {
            Some(link) => link.get_u32_or_zero(command),
            None => Ok(0),
        }
    }

    /// Set the output sample rate in samples per second.
    pub fn set_sample_rate(&self, rate: u32) -> Result<bool> {
        match self.link() {
            Some(link) => link.set_sample_rate(rate),
            None => Ok(false),
        }
    }

    /// The current sample rate, or 0.
    pub fn sample_rate(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_ILDA_RATE)
    }

    /// The highest sample rate the device supports, or 0.
    pub fn max_sample_rate(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_MAX_ILDA_RATE)
    }

    /// The largest DAC value, i.e. the addressable deflection range, or 0.
    pub fn resolution(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_DAC_MAX)
    }

    pub fn firmware_major_version(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_FW_MAJOR_VERSION)
    }

    pub fn firmware_minor_version(&self) -> Result<u32> {
        self.get_u32_or_zero(CMD_GET_FW_MINOR_VERSION)
    }

    pub fn firmware_version(&self) -> Result<FirmwareVersion> {
        Ok(FirmwareVersion {
            major: self.firmware_major_version()?,
            minor: self.firmware_minor_version()?,
        })
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a layer, destroying the previous one.
    ///
    /// Rejected while a job is running; the rejected layer is dropped.
    pub fn set_layer(&self, layer: Box<dyn Layer>) -> bool {
        let _worker = self.worker_slot();
        let mut inner = self.job.lock();
        if inner.state.is_active() {
            return false;
        }
        inner.layer = Some(layer);
        true
    }

    /// Start streaming the installed layer.
    ///
    /// Returns `Ok(false)` if a job is already running, leaving its state and
    /// error untouched. With no layer installed this succeeds without starting
    /// anything. A job started while disconnected fails setup in the worker
    /// and reports it through [`layer_error_message`](Self::layer_error_message).
    pub fn start_layer(&self) -> Result<bool> {
        let mut worker = self.worker_slot();
        if self.job.lock().state.is_active() {
            return Ok(false);
        }

        // Reap the previous, already finished job.
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!("LaserShark stream worker panicked");
            }
        }

        let mut inner = self.job.lock();
        inner.error.clear();
        if inner.layer.is_none() {
            return Ok(true);
        }
        if self.link.is_none() {
            warn!("LaserShark not connected, layer job will fail");
        }

        let stream = StreamWorker::new(self.link.clone(), self.job.clone(), self.config.clone());
        inner.state = JobState::Starting;
        self.job.request_run();
        drop(inner);

        match thread::Builder::new()
            .name("lasershark-stream".into())
            .spawn(move || stream.run())
        {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.job.cancel();
                self.job.lock().state = JobState::Idle;
                Err(Error::Thread(e))
            }
        }
    }

    /// Cancel the running job (waiting for its worker to exit), then destroy
    /// the installed layer and clear the error. Safe with no job running.
    pub fn stop_and_clear_layer(&self) {
        let mut worker = self.worker_slot();
        if let Some(handle) = worker.take() {
            self.job.cancel();
            if handle.join().is_err() {
                warn!("LaserShark stream worker panicked");
            }
        }

        let mut inner = self.job.lock();
        inner.layer = None;
        inner.error.clear();
        inner.state = JobState::Idle;
    }

    pub fn layer_running(&self) -> bool {
        self.job.lock().state.is_active()
    }

    pub fn layer_done(&self) -> bool {
        !self.layer_running()
    }

    /// "On" samples not yet streamed, or 0 without a layer.
    pub fn layer_samples_left(&self) -> u32 {
        self.job.lock().layer.as_ref().map_or(0, |l| l.samples_left())
    }

    /// "On" samples in the installed layer, or 0 without a layer.
    pub fn layer_total_samples(&self) -> u32 {
        self.job.lock().layer.as_ref().map_or(0, |l| l.total_samples())
    }

    /// Failure text of the last job; empty if none.
    pub fn layer_error_message(&self) -> String {
        self.job.lock().error.clone()
    }

    /// Job state, progress and error read in one go.
    pub fn layer_status(&self) -> LayerStatus {
        self.job.lock().status()
    }
}

impl<B: UsbBackend> Drop for LaserShark<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
