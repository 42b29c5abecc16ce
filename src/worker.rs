//! Background streaming of a layer to the device.
//!
//! A [`StreamWorker`] runs on its own thread for the lifetime of one job. It
//! never returns anything to the session directly: progress and failures are
//! published through [`JobShared`], which the session polls.
//!
//! The worker only takes the job lock to encode a batch of samples or to
//! publish state. USB calls and sleeps happen without it, so status queries
//! stay responsive while a transfer is in flight.
//!
//! Cancellation is cooperative. The run flag is checked once per transfer and
//! once per drain poll; a transfer that blocks delays cancellation until it
//! returns.
//!
//! A panic inside the job (for example from a misbehaving [`Layer`]) is caught
//! and recorded, and the device is still made safe before the job goes idle.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error};

use crate::config::SessionConfig;
use crate::layer::Layer;
use crate::protocol::SAMPLE_SIZE_BYTES;
use crate::session::Link;
use crate::transport::UsbHandle;
use crate::types::{JobState, LayerStatus};

/// Job state shared between the session and its worker.
#[derive(Default)]
pub(crate) struct JobShared {
    should_run: AtomicBool,
    inner: Mutex<JobInner>,
}

/// Everything guarded by the job lock.
#[derive(Default)]
pub(crate) struct JobInner {
    pub state: JobState,
    /// Accumulated failure text. Empty means no error.
    pub error: String,
    pub layer: Option<Box<dyn Layer>>,
}

impl JobInner {
    pub fn status(&self) -> LayerStatus {
        let (samples_left, total_samples) = self
            .layer
            .as_ref()
            .map_or((0, 0), |l| (l.samples_left(), l.total_samples()));
        LayerStatus {
            state: self.state,
            samples_left,
            total_samples,
            error: self.error.clone(),
        }
    }
}

impl JobShared {
    pub fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn should_run(&self) -> bool {
        self.should_run.load(Ordering::SeqCst)
    }

    pub fn request_run(&self) {
        self.should_run.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.should_run.store(false, Ordering::SeqCst);
    }

    /// Record a failure without losing an earlier one.
    pub fn record_error(&self, message: impl fmt::Display) {
        let mut inner = self.lock();
        if inner.error.is_empty() {
            inner.error = message.to_string();
        } else {
            inner.error.push_str("; also ");
            inner.error.push_str(&message.to_string());
        }
    }

    fn set_state(&self, state: JobState) {
        self.lock().state = state;
    }
}

/// Drains one layer into the data endpoint.
///
/// A worker started without a link fails setup and records why.
pub(crate) struct StreamWorker<H> {
    link: Option<Arc<Link<H>>>,
    job: Arc<JobShared>,
    config: SessionConfig,
}

impl<H: UsbHandle> StreamWorker<H> {
    pub fn new(link: Option<Arc<Link<H>>>, job: Arc<JobShared>, config: SessionConfig) -> Self {
        StreamWorker { link, job, config }
    }

    /// Run the job to completion. Always leaves the job `Idle` with the layer
    /// destroyed, and always attempts to make the device safe.
    pub fn run(self) {
        debug!("LaserShark stream worker starting");

        if panic::catch_unwind(AssertUnwindSafe(|| self.run_job())).is_err() {
            self.job.record_error("stream worker panicked");
            self.job.cancel();
            self.make_safe();
        }

        self.job.cancel();
        let mut inner = self.job.lock();
        inner.layer = None;
        inner.state = JobState::Idle;
        if !inner.error.is_empty() {
            error!("LaserShark layer job failed: {}", inner.error);
        }
        drop(inner);

        debug!("LaserShark stream worker exiting");
    }

    fn run_job(&self) {
        let prepared = if self.job.should_run() {
            self.prepare()
        } else {
            Err("stopped before streaming started".to_string())
        };

        let capacity = match prepared {
            Ok(capacity) => {
                self.job.set_state(JobState::Running);
                self.stream();
                Some(capacity)
            }
            Err(message) => {
                self.job.record_error(message);
                self.job.cancel();
                None
            }
        };

        self.job.set_state(JobState::Draining);
        if let Some(capacity) = capacity {
            self.wait_for_drain(capacity);
        }
        self.make_safe();
    }

    fn link(&self) -> Option<&Link<H>> {
        self.link.as_deref()
    }

    /// Query the device, validate the layer against it, then clear the ring
    /// buffer and enable output. Returns the ring buffer capacity.
    fn prepare(&self) -> Result<u32, String> {
        let Some(link) = self.link() else {
            return Err("error getting ringbuffer samples".to_string());
        };

        let capacity = link
            .ringbuffer_sample_count()
            .map_err(|e| e.to_string())?;
        if capacity == 0 {
            return Err("error getting ringbuffer samples".to_string());
        }

        let resolution = link.resolution().map_err(|e| e.to_string())?;
        if resolution == 0 {
            return Err("LaserShark resolution was reported as 0".to_string());
        }

        let (width, height, (x, y)) = {
            let inner = self.job.lock();
            let layer = inner.layer.as_ref().ok_or("no layer installed")?;
            (layer.width(), layer.height(), layer.origin())
        };
        let right = u64::from(x) + u64::from(width);
        let bottom = u64::from(y) + u64::from(height);
        if right > u64::from(resolution) || bottom > u64::from(resolution) {
            return Err(format!(
                "layer {}x{} at ({}, {}) exceeds device resolution {}",
                width, height, x, y, resolution
            ));
        }

        if !link.clear_samples().map_err(|e| e.to_string())? {
            return Err("error clearing ringbuffer".to_string());
        }
        if !link.set_output(true).map_err(|e| e.to_string())? {
            return Err("error enabling output".to_string());
        }

        debug!(
            "LaserShark streaming {}x{} layer, ringbuffer {} samples, resolution {}",
            width, height, capacity, resolution
        );
        Ok(capacity)
    }

    fn stream(&self) {
        let Some(link) = self.link() else {
            return;
        };
        let per_transfer = self.config.samples_per_transfer.max(1);
        let mut buf = vec![0u8; per_transfer * SAMPLE_SIZE_BYTES];

        while self.job.should_run() {
            let filled = {
                let mut inner = self.job.lock();
                let Some(layer) = inner.layer.as_mut() else {
                    break;
                };
                let left = layer.samples_left() as usize;
                if left == 0 {
                    break;
                }
                layer.fill_transfer_buffer(left.min(per_transfer), &mut buf)
            };
            if filled == 0 {
                break;
            }

            if let Err(e) = link.send_samples(&buf[..filled * SAMPLE_SIZE_BYTES]) {
                self.job.record_error(e);
                self.job.cancel();
                break;
            }
        }
    }

    /// Wait for the device to play out what it has buffered.
    fn wait_for_drain(&self, capacity: u32) {
        let Some(link) = self.link() else {
            return;
        };
        let target = capacity - 1;
        let mut polls = 0;

        while self.job.should_run() {
            match link.ringbuffer_empty_sample_count() {
                Ok(empty) if empty >= target => return,
                Ok(_) => {}
                Err(e) => {
                    self.job.record_error(format_args!(
                        "could not wait for all samples to be completed: {}",
                        e
                    ));
                    return;
                }
            }

            polls += 1;
            if polls >= self.config.drain_max_polls {
                self.job
                    .record_error("timed out waiting for the ring buffer to drain");
                return;
            }
            thread::sleep(self.config.drain_poll_interval);
        }
    }

    /// Disable output and clear whatever is left in the ring buffer. Without
    /// a link there is no device to make safe.
    fn make_safe(&self) {
        let Some(link) = self.link() else {
            return;
        };

        match link.set_output(false) {
            Ok(true) => {}
            Ok(false) => self.job.record_error("could not disable output"),
            Err(e) => self
                .job
                .record_error(format_args!("could not disable output: {}", e)),
        }

        match link.clear_samples() {
            Ok(true) => {}
            Ok(false) => self.job.record_error("could not clear ringbuffer"),
            Err(e) => self
                .job
                .record_error(format_args!("could not clear ringbuffer: {}", e)),
        }
    }
}
