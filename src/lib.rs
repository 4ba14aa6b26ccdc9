//! # netsnap - Concurrent Configuration Snapshots for Network Devices
//!
//! `netsnap` connects to many network devices in parallel, runs the same list
//! of CLI commands on each one and writes the captured output as a report. A
//! slow or failing device never stops the rest of the batch: every device ends
//! up with exactly one outcome, in input order.
//!
//! ## Features
//!
//! - **Bounded Worker Pool**: At most `max_workers` sessions are open at once
//! - **Failure Isolation**: Connection, command and worker failures are recorded per device
//! - **Fine-grained Progress**: Per-device and per-command increments pushed into a [`progress::ProgressSink`]
//! - **Reports**: One text file per device, or a single xlsx/csv table
//! - **SSH Transport**: Interactive shells with prompt templates, pager handling and jump hosts
//! - **Record & Replay**: Capture sessions to JSONL and replay whole batches offline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netsnap::batch::run_snapshot;
//! use netsnap::config::{SessionConfig, SnapshotJob};
//! use netsnap::progress::ProgressTracker;
//! use netsnap::report::{OutputType, TableFormat};
//! use netsnap::session::SshOpener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = SessionConfig::from_json(
//!         r#"{"NETWORK_USERNAME": "admin", "NETWORK_PASSWORD": "secret"}"#,
//!     )?;
//!     let job = SnapshotJob::new(
//!         vec!["192.168.1.1".to_string(), "192.168.1.2".to_string()],
//!         vec!["show version".to_string()],
//!         OutputType::Tabular(TableFormat::Xlsx),
//!         "./snapshots",
//!         session.clone(),
//!     );
//!
//!     let tracker = ProgressTracker::new();
//!     let opener = SshOpener::from_session_config(&session)?;
//!     let report = run_snapshot(opener, &job, &tracker.sink()).await?;
//!
//!     println!("{:.0}% - {:?}", tracker.percent(), report.artifacts);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`batch::BatchCoordinator`] / [`batch::run_snapshot`] - runs a whole batch
//! - [`runner::SessionRunner`] - runs the command list on one device
//! - [`report::ReportAssembler`] - writes text or tabular reports
//! - [`session::SessionOpener`] / [`session::DeviceSession`] - the device session capability
//! - [`templates`] - built-in prompt templates for common vendors
//! - [`error`] - error types for sessions and batches

pub mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod progress;
pub mod report;
pub mod runner;
pub mod session;
pub mod templates;
