//! Error types for device sessions, batch runs and report output.
//!
//! [`ConnectError`] describes what went wrong on one SSH session. The batch
//! layer wraps it into [`SnapshotError`], tagging the device (and command)
//! that failed.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while opening or driving a device session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The SSH channel was disconnected while waiting for a prompt.
    ///
    /// This typically happens when the remote device closes the connection
    /// unexpectedly during login or command execution.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The session has already been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// The device never showed a prompt after login.
    ///
    /// The error contains whatever output was received before the timeout.
    #[error("init timeout: {0}")]
    InitTimeout(String),

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The device rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The jump host could not reach the target device.
    #[error("jump host error: {0}")]
    JumpHostError(String),

    /// Prompt template configuration is invalid.
    #[error("invalid prompt template config: {0}")]
    InvalidTemplateConfig(String),

    /// Requested built-in template does not exist.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A replayed session has no recording for the requested operation.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// A replayed session reproduces a failure captured in the recording.
    #[error("replayed failure: {0}")]
    ReplayedFailure(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the shell channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),

    #[error("internal error: {0}")]
    InternalServerError(String),
}

/// Errors surfaced by a snapshot batch.
///
/// `Connection`, `Command` and `WorkerAborted` are scoped to one device and
/// are contained by the batch coordinator. `ReportWrite` and `InvalidConfig`
/// terminate the batch.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Opening or authenticating the session failed.
    #[error("connection to {device} failed: {source}")]
    Connection {
        device: String,
        #[source]
        source: ConnectError,
    },

    /// Sending a command or capturing its output failed.
    #[error("command '{command}' failed on {device}: {source}")]
    Command {
        device: String,
        command: String,
        #[source]
        source: ConnectError,
    },

    /// The worker running the device panicked or was cancelled.
    #[error("worker for {device} aborted: {reason}")]
    WorkerAborted { device: String, reason: String },

    /// Persisting the report failed.
    #[error("failed to write report {}: {source}", path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Session or job configuration is missing or malformed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl SnapshotError {
    /// Wraps any writer error into a [`SnapshotError::ReportWrite`] for `path`.
    pub fn report_write<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SnapshotError::ReportWrite {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Device the error is scoped to, if any.
    pub fn device(&self) -> Option<&str> {
        match self {
            SnapshotError::Connection { device, .. }
            | SnapshotError::Command { device, .. }
            | SnapshotError::WorkerAborted { device, .. } => Some(device),
            SnapshotError::ReportWrite { .. } | SnapshotError::InvalidConfig(_) => None,
        }
    }
}
