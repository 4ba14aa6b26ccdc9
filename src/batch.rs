//! Concurrent batch execution.
//!
//! [`BatchCoordinator`] fans one [`SessionRunner`] per device out onto a
//! bounded pool of tokio tasks and waits for every device to settle. Failures
//! stay with their device: the batch result always holds one outcome per input
//! device, in input order.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::{DEFAULT_MAX_WORKERS, SessionConfig, SnapshotJob, non_blank};
use crate::error::SnapshotError;
use crate::progress::{COMPLETION_UNITS, ProgressPlan, ProgressSink, STARTUP_UNITS};
use crate::report::ReportAssembler;
use crate::runner::{DeviceRun, SessionResult, SessionRunner};
use crate::session::SessionOpener;

/// What ended a device run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FailureKind {
    /// The session never opened.
    Connection,
    /// A command failed; the remaining commands were skipped.
    Command,
    /// The worker panicked.
    Aborted,
}

/// Failure recorded for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceFailure {
    pub kind: FailureKind,
    /// Command that failed, for [`FailureKind::Command`].
    pub command: Option<String>,
    pub reason: String,
}

impl From<&SnapshotError> for DeviceFailure {
    fn from(err: &SnapshotError) -> Self {
        let (kind, command) = match err {
            SnapshotError::Connection { .. } => (FailureKind::Connection, None),
            SnapshotError::Command { command, .. } => (FailureKind::Command, Some(command.clone())),
            _ => (FailureKind::Aborted, None),
        };
        Self {
            kind,
            command,
            reason: err.to_string(),
        }
    }
}

/// Terminal state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceOutcome {
    pub result: SessionResult,
    pub failure: Option<DeviceFailure>,
}

impl DeviceOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Outcomes of a whole batch, in device-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchResult {
    pub devices: Vec<DeviceOutcome>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.devices.iter()
    }

    /// First outcome recorded for `device`.
    pub fn get(&self, device: &str) -> Option<&DeviceOutcome> {
        self.devices
            .iter()
            .find(|outcome| outcome.result.device == device)
    }

    /// Outcomes that ended with a failure.
    pub fn failed(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.devices.iter().filter(|outcome| !outcome.is_success())
    }
}

/// Runs every device of a batch on a bounded worker pool.
pub struct BatchCoordinator<O> {
    opener: Arc<O>,
    session: SessionConfig,
    max_workers: usize,
}

impl<O: SessionOpener> BatchCoordinator<O> {
    pub fn new(opener: Arc<O>, session: SessionConfig) -> Self {
        Self {
            opener,
            session,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Upper bound of simultaneously open sessions. Zero is treated as one.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Number of workers used for `device_count` devices.
    pub fn pool_size(&self, device_count: usize) -> usize {
        self.max_workers.max(1).min(device_count)
    }

    /// Runs all devices and returns once each one has reached a terminal state.
    pub async fn run(
        &self,
        devices: &[String],
        commands: &[String],
        progress: &ProgressSink,
    ) -> BatchResult {
        progress.advance(STARTUP_UNITS);
        if devices.is_empty() {
            return BatchResult::default();
        }

        let pool_size = self.pool_size(devices.len());
        info!(
            "Collecting {} command(s) from {} device(s) with {} worker(s)",
            commands.len(),
            devices.len(),
            pool_size
        );

        let runner = SessionRunner::new(
            Arc::clone(&self.opener),
            self.session.credentials(),
            self.session.proxy(),
            ProgressPlan::new(devices.len(), commands.len()),
            progress.clone(),
        );
        let commands: Arc<[String]> = commands.into();
        let semaphore = Arc::new(Semaphore::new(pool_size));

        let mut handles = Vec::with_capacity(devices.len());
        for device in devices {
            // The semaphore is never closed.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let runner = runner.clone();
            let commands = Arc::clone(&commands);
            let device = device.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                runner.run(&device, &commands).await
            }));
        }

        let mut slots = Vec::with_capacity(devices.len());
        for (index, device) in devices.iter().enumerate() {
            let run = match handles.get_mut(index) {
                Some(handle) => match handle.await {
                    Ok(run) => run,
                    Err(join_err) => DeviceRun {
                        result: SessionResult::new(device.as_str()),
                        error: Some(SnapshotError::WorkerAborted {
                            device: device.clone(),
                            reason: join_err.to_string(),
                        }),
                    },
                },
                None => DeviceRun {
                    result: SessionResult::new(device.as_str()),
                    error: Some(SnapshotError::WorkerAborted {
                        device: device.clone(),
                        reason: "worker pool closed".to_string(),
                    }),
                },
            };

            if let Some(err) = &run.error {
                error!("{}: {}", device, err);
            }
            slots.push(DeviceOutcome {
                failure: run.error.as_ref().map(DeviceFailure::from),
                result: run.result,
            });
        }

        let result = BatchResult { devices: slots };
        info!(
            "Batch finished: {} of {} device(s) failed",
            result.failed().count(),
            result.len()
        );
        result
    }
}

/// Batch result plus the report artifacts written for it.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub batch: BatchResult,
    pub artifacts: Vec<PathBuf>,
}

/// Runs a complete snapshot job: collect from all devices, then write the report.
///
/// Only configuration and report errors are returned; device failures are
/// recorded in the returned [`BatchResult`].
pub async fn run_snapshot<O: SessionOpener>(
    opener: O,
    job: &SnapshotJob,
    progress: &ProgressSink,
) -> Result<SnapshotReport, SnapshotError> {
    job.session.validate()?;
    std::fs::create_dir_all(&job.output_dir)
        .map_err(|e| SnapshotError::report_write(&job.output_dir, e))?;

    let coordinator = BatchCoordinator::new(Arc::new(opener), job.session.clone())
        .with_max_workers(job.max_workers);
    let devices = non_blank(&job.devices);
    let commands = non_blank(&job.commands);
    let batch = coordinator.run(&devices, &commands, progress).await;

    let artifacts = ReportAssembler::new(&job.output_dir, &job.report_title)
        .assemble(&batch, job.output)?;
    progress.advance(COMPLETION_UNITS);
    info!("Report written to {}", job.output_dir.display());

    Ok(SnapshotReport { batch, artifacts })
}
