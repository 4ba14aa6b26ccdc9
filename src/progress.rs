//! Progress accounting for a snapshot batch.
//!
//! Progress is a stream of additive increments pushed into a [`ProgressSink`].
//! A batch spends [`STARTUP_UNITS`] when the worker pool starts, splits
//! [`DEVICE_POOL_UNITS`] evenly across devices, and spends
//! [`COMPLETION_UNITS`] once the report is written. Inside one device's share,
//! 10% goes to the connect start, 20% to authentication and 70% is divided
//! across the commands.
//!
//! A fully successful batch therefore sums to 101; [`ProgressTracker`] clamps
//! the displayed total at 100. Failed devices never spend their remaining
//! share.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Units emitted once before any device starts.
pub const STARTUP_UNITS: f64 = 9.0;
/// Units shared by all devices of a batch.
pub const DEVICE_POOL_UNITS: f64 = 90.0;
/// Units emitted after the report has been written.
pub const COMPLETION_UNITS: f64 = 2.0;
/// Upper bound of the displayed progress.
pub const PROGRESS_MAX: f64 = 100.0;

const CONNECT_SHARE: f64 = 0.1;
const AUTH_SHARE: f64 = 0.2;
const COMMAND_SHARE: f64 = 0.7;

/// Receives progress increments. Cheap to clone and safe to call from any worker.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Option<Arc<dyn Fn(f64) + Send + Sync>>,
}

impl ProgressSink {
    /// Sink calling `f` with every increment.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            inner: Some(Arc::new(f)),
        }
    }

    /// Sink forwarding increments into an unbounded tokio channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<f64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::from_fn(move |units| {
            // Receiver dropped: the caller stopped listening.
            let _ = tx.send(units);
        });
        (sink, rx)
    }

    /// Sink discarding every increment.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Pushes one increment. Non-positive increments are dropped.
    pub fn advance(&self, units: f64) {
        if units <= 0.0 {
            return;
        }
        if let Some(f) = &self.inner {
            f(units);
        }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("connected", &self.inner.is_some())
            .finish()
    }
}

/// Per-device increments for one batch shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPlan {
    per_device: f64,
    command_count: usize,
}

impl ProgressPlan {
    pub fn new(device_count: usize, command_count: usize) -> Self {
        let per_device = if device_count == 0 {
            0.0
        } else {
            DEVICE_POOL_UNITS / device_count as f64
        };
        Self {
            per_device,
            command_count,
        }
    }

    /// Share of the device pool owned by one device.
    pub fn per_device(&self) -> f64 {
        self.per_device
    }

    /// Emitted when a device starts connecting.
    pub fn connect_start(&self) -> f64 {
        self.per_device * CONNECT_SHARE
    }

    /// Emitted once the device session is authenticated.
    pub fn authenticated(&self) -> f64 {
        self.per_device * AUTH_SHARE
    }

    /// Emitted after each completed command.
    pub fn per_command(&self) -> f64 {
        if self.command_count == 0 {
            0.0
        } else {
            self.command_share() / self.command_count as f64
        }
    }

    /// Whole command slice of one device.
    pub fn command_share(&self) -> f64 {
        self.per_device * COMMAND_SHARE
    }

    pub fn command_count(&self) -> usize {
        self.command_count
    }
}

/// Accumulates increments for display, clamped at [`PROGRESS_MAX`].
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total: Arc<Mutex<f64>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink adding every increment into this tracker.
    pub fn sink(&self) -> ProgressSink {
        let total = Arc::clone(&self.total);
        ProgressSink::from_fn(move |units| {
            if let Ok(mut total) = total.lock() {
                *total += units;
            }
        })
    }

    /// Raw sum of all increments received so far.
    pub fn raw_total(&self) -> f64 {
        self.total.lock().map(|total| *total).unwrap_or(0.0)
    }

    /// Displayed progress in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        self.raw_total().clamp(0.0, PROGRESS_MAX)
    }
}
