//! Device session capability and its SSH implementation.
//!
//! The batch layer only knows the [`SessionOpener`] / [`DeviceSession`] pair:
//! open a session to a host, read its prompt, send commands, close it. This
//! module provides the SSH implementation ([`SshOpener`]) plus recording and
//! offline replay of sessions.
//!
//! # Main Components
//!
//! - [`SessionOpener`] / [`DeviceSession`] - the capability consumed by the batch layer
//! - [`SshOpener`] / [`SshSession`] - interactive SSH shell sessions, optionally via a jump host
//! - [`RecordingOpener`] / [`ReplayOpener`] - capture sessions to JSONL and replay them offline

use std::future::Future;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::RegexSet;
use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config;
use crate::device::{IGNORE_START_LINE, PromptHandler};
use crate::error::ConnectError;
use crate::templates;

pub use client::{SshOpener, SshSession, split_host_port};
pub use recording::{
    RecordingOpener, RecordingSession, ReplayOpener, ReplaySession, SessionEvent,
    SessionRecordEntry, SessionRecorder,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};

/// Login credentials for a device.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Jump host used to reach devices.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// An authenticated session on one device.
pub trait DeviceSession: Send {
    /// Prompt the device displayed after login.
    fn prompt(&self) -> &str;

    /// Sends one command and returns its output, without the echoed command and trailing prompt.
    fn send_command(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Closes the session. Idempotent; errors are logged, never returned.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens [`DeviceSession`]s.
pub trait SessionOpener: Send + Sync + 'static {
    type Session: DeviceSession + 'static;

    /// Connects and authenticates to `hostname`, through `proxy` when given.
    fn open(
        &self,
        hostname: &str,
        credentials: &Credentials,
        proxy: Option<&ProxyCredentials>,
    ) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}

mod client;
mod recording;
mod security;
