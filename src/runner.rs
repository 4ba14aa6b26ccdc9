//! One device's command run.

use std::sync::Arc;

use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::progress::{ProgressPlan, ProgressSink};
use crate::session::{Credentials, DeviceSession, ProxyCredentials, SessionOpener};

/// Output captured for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandOutput {
    pub command: String,
    pub output: String,
}

/// Everything captured from one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionResult {
    pub device: String,
    /// Prompt shown after login, empty when the session never opened.
    pub prompt: String,
    /// Outputs in command order.
    pub command_outputs: Vec<CommandOutput>,
}

impl SessionResult {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Stores `output` under `command`, replacing an earlier output of the same command in place.
    pub fn record_output(&mut self, command: &str, output: String) {
        match self
            .command_outputs
            .iter_mut()
            .find(|entry| entry.command == command)
        {
            Some(entry) => entry.output = output,
            None => self.command_outputs.push(CommandOutput {
                command: command.to_string(),
                output,
            }),
        }
    }

    /// Output captured for `command`, if it ran.
    pub fn output(&self, command: &str) -> Option<&str> {
        self.command_outputs
            .iter()
            .find(|entry| entry.command == command)
            .map(|entry| entry.output.as_str())
    }
}

/// Result of one device run: the captured data plus the failure that ended it early.
#[derive(Debug)]
pub struct DeviceRun {
    pub result: SessionResult,
    pub error: Option<SnapshotError>,
}

/// Runs the full command list on a single device.
pub struct SessionRunner<O> {
    opener: Arc<O>,
    credentials: Credentials,
    proxy: Option<ProxyCredentials>,
    plan: ProgressPlan,
    progress: ProgressSink,
}

impl<O> Clone for SessionRunner<O> {
    fn clone(&self) -> Self {
        Self {
            opener: Arc::clone(&self.opener),
            credentials: self.credentials.clone(),
            proxy: self.proxy.clone(),
            plan: self.plan,
            progress: self.progress.clone(),
        }
    }
}

impl<O: SessionOpener> SessionRunner<O> {
    pub fn new(
        opener: Arc<O>,
        credentials: Credentials,
        proxy: Option<ProxyCredentials>,
        plan: ProgressPlan,
        progress: ProgressSink,
    ) -> Self {
        Self {
            opener,
            credentials,
            proxy,
            plan,
            progress,
        }
    }

    /// Connects to `device`, runs every command in order and closes the session.
    ///
    /// A command failure stops the remaining commands of this device only; the
    /// outputs captured before it are kept.
    pub async fn run(&self, device: &str, commands: &[String]) -> DeviceRun {
        let mut result = SessionResult::new(device);

        info!("Connecting to {}...", device);
        self.progress.advance(self.plan.connect_start());
        let mut session = match self
            .opener
            .open(device, &self.credentials, self.proxy.as_ref())
            .await
        {
            Ok(session) => session,
            Err(source) => {
                return DeviceRun {
                    result,
                    error: Some(SnapshotError::Connection {
                        device: device.to_string(),
                        source,
                    }),
                };
            }
        };

        result.prompt = session.prompt().to_string();
        info!("Connection established to {}", device);
        self.progress.advance(self.plan.authenticated());
        if commands.is_empty() {
            self.progress.advance(self.plan.command_share());
        }

        let mut error = None;
        for command in commands {
            info!("Capturing '{}' output for {}", command, device);
            match session.send_command(command).await {
                Ok(output) => {
                    let output = output.trim_end().to_string();
                    if output.is_empty() {
                        warn!("Command '{}' returned no output on {}", command, device);
                    }
                    result.record_output(command, output);
                    self.progress.advance(self.plan.per_command());
                }
                Err(source) => {
                    error = Some(SnapshotError::Command {
                        device: device.to_string(),
                        command: command.clone(),
                        source,
                    });
                    break;
                }
            }
        }

        session.close().await;
        DeviceRun { result, error }
    }
}
