use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Something that happened on a device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device: String,
        prompt: String,
    },
    ConnectionFailed {
        device: String,
        reason: String,
    },
    CommandOutput {
        device: String,
        command: String,
        content: String,
    },
    CommandFailed {
        device: String,
        command: String,
        reason: String,
    },
    ConnectionClosed {
        device: String,
    },
}

impl SessionEvent {
    /// Device the event belongs to.
    pub fn device(&self) -> &str {
        match self {
            SessionEvent::ConnectionEstablished { device, .. }
            | SessionEvent::ConnectionFailed { device, .. }
            | SessionEvent::CommandOutput { device, .. }
            | SessionEvent::CommandFailed { device, .. }
            | SessionEvent::ConnectionClosed { device } => device,
        }
    }
}

/// One line of a recording.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    /// Open attempt the event belongs to, unique within the recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<u64>,
    pub event: SessionEvent,
}

/// Shared event log of every session in a batch. Clones append to the same log.
#[derive(Debug, Clone, Default)]
pub struct SessionRecorder {
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
    next_session: Arc<AtomicU64>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> Result<MutexGuard<'_, Vec<SessionRecordEntry>>, ConnectError> {
        self.entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("recorder poisoned: {e}")))
    }

    /// Appends `event`, stamped with the current time.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        self.push(None, event)
    }

    /// Appends `event` on behalf of the session numbered `session`.
    pub fn record_session_event(
        &self,
        session: u64,
        event: SessionEvent,
    ) -> Result<(), ConnectError> {
        self.push(Some(session), event)
    }

    /// Reserves the number of a new session.
    pub fn next_session(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, session: Option<u64>, event: SessionEvent) -> Result<(), ConnectError> {
        self.log()?.push(SessionRecordEntry {
            ts_ms: now_ms(),
            session,
            event,
        });
        Ok(())
    }

    /// Copy of the whole log, oldest first.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        Ok(self.log()?.clone())
    }

    /// Log entries of one device, oldest first.
    pub fn for_device(&self, device: &str) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        Ok(self
            .log()?
            .iter()
            .filter(|entry| entry.event.device() == device)
            .cloned()
            .collect())
    }

    pub fn clear(&self) -> Result<(), ConnectError> {
        self.log()?.clear();
        Ok(())
    }

    /// One JSON object per line.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let lines = self
            .log()?
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::InternalServerError(format!("encode recording: {e}")))?;
        Ok(lines.join("\n"))
    }

    /// Loads a log written by [`SessionRecorder::to_jsonl`]. Blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let entries = jsonl
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<SessionRecordEntry>(line).map_err(|e| {
                    ConnectError::InternalServerError(format!(
                        "decode recording line {}: {e}",
                        n + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let next_session = entries
            .iter()
            .filter_map(|entry| entry.session)
            .max()
            .map_or(0, |last| last + 1);
        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
            next_session: Arc::new(AtomicU64::new(next_session)),
        })
    }
}

/// Wraps an opener and records every session it opens.
#[derive(Debug, Clone)]
pub struct RecordingOpener<O> {
    inner: O,
    recorder: SessionRecorder,
}

impl<O> RecordingOpener<O> {
    pub fn new(inner: O, recorder: SessionRecorder) -> Self {
        Self { inner, recorder }
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }
}

impl<O: SessionOpener> SessionOpener for RecordingOpener<O> {
    type Session = RecordingSession<O::Session>;

    async fn open(
        &self,
        hostname: &str,
        credentials: &Credentials,
        proxy: Option<&ProxyCredentials>,
    ) -> Result<Self::Session, ConnectError> {
        let id = self.recorder.next_session();
        match self.inner.open(hostname, credentials, proxy).await {
            Ok(session) => {
                let _ = self.recorder.record_session_event(
                    id,
                    SessionEvent::ConnectionEstablished {
                        device: hostname.to_string(),
                        prompt: session.prompt().to_string(),
                    },
                );
                Ok(RecordingSession {
                    id,
                    device: hostname.to_string(),
                    inner: session,
                    recorder: self.recorder.clone(),
                    closed: false,
                })
            }
            Err(err) => {
                let _ = self.recorder.record_session_event(
                    id,
                    SessionEvent::ConnectionFailed {
                        device: hostname.to_string(),
                        reason: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }
}

/// Session wrapper produced by [`RecordingOpener`].
pub struct RecordingSession<S> {
    id: u64,
    device: String,
    inner: S,
    recorder: SessionRecorder,
    closed: bool,
}

impl<S: DeviceSession> DeviceSession for RecordingSession<S> {
    fn prompt(&self) -> &str {
        self.inner.prompt()
    }

    async fn send_command(&mut self, command: &str) -> Result<String, ConnectError> {
        let result = self.inner.send_command(command).await;
        let event = match &result {
            Ok(content) => SessionEvent::CommandOutput {
                device: self.device.clone(),
                command: command.to_string(),
                content: content.clone(),
            },
            Err(err) => SessionEvent::CommandFailed {
                device: self.device.clone(),
                command: command.to_string(),
                reason: err.to_string(),
            },
        };
        let _ = self.recorder.record_session_event(self.id, event);
        result
    }

    async fn close(&mut self) {
        self.inner.close().await;
        if !self.closed {
            self.closed = true;
            let _ = self.recorder.record_session_event(
                self.id,
                SessionEvent::ConnectionClosed {
                    device: self.device.clone(),
                },
            );
        }
    }
}

#[derive(Debug, Clone)]
enum ReplayStep {
    Output { command: String, content: String },
    Failed { command: String, reason: String },
}

#[derive(Debug, Clone)]
enum ReplayScript {
    Failed(String),
    Session {
        prompt: String,
        steps: VecDeque<ReplayStep>,
    },
}

/// Offline opener serving sessions from a recording.
///
/// Every `open` of a device consumes that device's next recorded session, so
/// duplicated device identifiers replay their sessions in recording order.
/// Commands are matched to their session by its number; entries without one
/// belong to the device's latest session.
#[derive(Debug, Default)]
pub struct ReplayOpener {
    scripts: Mutex<HashMap<String, VecDeque<ReplayScript>>>,
}

impl ReplayOpener {
    /// Build a replay opener from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, ConnectError> {
        let mut scripts: HashMap<String, VecDeque<ReplayScript>> = HashMap::new();
        // Position of each numbered session in its device's queue.
        let mut positions: HashMap<u64, usize> = HashMap::new();
        for entry in recorder.entries()? {
            let device = entry.event.device().to_string();
            let step = match entry.event {
                SessionEvent::ConnectionEstablished { prompt, .. } => {
                    let queue = scripts.entry(device).or_default();
                    if let Some(id) = entry.session {
                        positions.insert(id, queue.len());
                    }
                    queue.push_back(ReplayScript::Session {
                        prompt,
                        steps: VecDeque::new(),
                    });
                    continue;
                }
                SessionEvent::ConnectionFailed { reason, .. } => {
                    scripts
                        .entry(device)
                        .or_default()
                        .push_back(ReplayScript::Failed(reason));
                    continue;
                }
                SessionEvent::CommandOutput {
                    command, content, ..
                } => ReplayStep::Output { command, content },
                SessionEvent::CommandFailed {
                    command, reason, ..
                } => ReplayStep::Failed { command, reason },
                SessionEvent::ConnectionClosed { .. } => continue,
            };

            let queue = scripts.get_mut(&device);
            let script = match entry.session {
                Some(id) => positions
                    .get(&id)
                    .copied()
                    .and_then(|position| queue.and_then(|q| q.get_mut(position))),
                None => queue.and_then(|q| q.back_mut()),
            };
            match script {
                Some(ReplayScript::Session { steps, .. }) => steps.push_back(step),
                _ => warn!("Recorded command for {} without an open session", device),
            }
        }
        Ok(Self {
            scripts: Mutex::new(scripts),
        })
    }

    /// Build a replay opener from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Self::from_recorder(&recorder)
    }

    fn next_script(&self, hostname: &str) -> Result<ReplayScript, ConnectError> {
        let mut guard = self
            .scripts
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("replay lock error: {e}")))?;
        guard
            .get_mut(hostname)
            .and_then(|scripts| scripts.pop_front())
            .ok_or_else(|| {
                ConnectError::ReplayMismatchError(format!("no recorded session for '{hostname}'"))
            })
    }
}

impl SessionOpener for ReplayOpener {
    type Session = ReplaySession;

    async fn open(
        &self,
        hostname: &str,
        _credentials: &Credentials,
        _proxy: Option<&ProxyCredentials>,
    ) -> Result<ReplaySession, ConnectError> {
        match self.next_script(hostname)? {
            ReplayScript::Failed(reason) => Err(ConnectError::ReplayedFailure(reason)),
            ReplayScript::Session { prompt, steps } => Ok(ReplaySession {
                device: hostname.to_string(),
                prompt,
                steps,
                closed: false,
            }),
        }
    }
}

/// Session replaying recorded command outputs.
#[derive(Debug)]
pub struct ReplaySession {
    device: String,
    prompt: String,
    steps: VecDeque<ReplayStep>,
    closed: bool,
}

impl ReplaySession {
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl DeviceSession for ReplaySession {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn send_command(&mut self, command: &str) -> Result<String, ConnectError> {
        if self.closed {
            return Err(ConnectError::ConnectClosedError);
        }
        while let Some(step) = self.steps.pop_front() {
            match step {
                ReplayStep::Output {
                    command: recorded,
                    content,
                } if recorded == command => return Ok(content),
                ReplayStep::Failed {
                    command: recorded,
                    reason,
                } if recorded == command => return Err(ConnectError::ReplayedFailure(reason)),
                _ => continue,
            }
        }
        Err(ConnectError::ReplayMismatchError(format!(
            "no replayable output for '{command}' on '{}'",
            self.device
        )))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{"ts_ms":1,"event":{"kind":"connection_established","device":"r1","prompt":"r1#"}}
{"ts_ms":2,"event":{"kind":"connection_failed","device":"r2","reason":"connect timeout"}}
{"ts_ms":3,"event":{"kind":"command_output","device":"r1","command":"show clock","content":"12:00:00"}}
{"ts_ms":4,"event":{"kind":"command_failed","device":"r1","command":"show version","reason":"exec command timeout"}}
{"ts_ms":5,"event":{"kind":"connection_closed","device":"r1"}}
"#;

    fn creds() -> Credentials {
        Credentials::new("admin", "admin")
    }

    #[test]
    fn exported_log_loads_back() {
        let recorder = SessionRecorder::new();
        let shared = recorder.clone();
        shared
            .record_event(SessionEvent::ConnectionClosed {
                device: "sw7".to_string(),
            })
            .expect("record close");

        let loaded = SessionRecorder::from_jsonl(&recorder.to_jsonl().expect("export"))
            .expect("load");
        let entries = loaded.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.device(), "sw7");
        assert!(entries[0].ts_ms > 0);
    }

    #[test]
    fn blank_lines_are_skipped_and_bad_lines_are_reported() {
        assert!(
            SessionRecorder::from_jsonl("\n  \n")
                .expect("blank input")
                .entries()
                .expect("entries")
                .is_empty()
        );
        let err = match SessionRecorder::from_jsonl("\n{not json}") {
            Ok(_) => panic!("malformed line should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn recorder_filters_by_device() {
        let recorder = SessionRecorder::from_jsonl(FIXTURE).expect("fixture");
        assert_eq!(recorder.for_device("r1").expect("r1").len(), 4);
        assert_eq!(recorder.for_device("r2").expect("r2").len(), 1);
        recorder.clear().expect("clear");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[tokio::test]
    async fn replay_serves_outputs_and_failures() {
        let opener = ReplayOpener::from_jsonl(FIXTURE).expect("fixture");
        let mut session = opener.open("r1", &creds(), None).await.expect("open r1");

        assert_eq!(session.prompt(), "r1#");
        assert_eq!(
            session.send_command("show clock").await.expect("clock"),
            "12:00:00"
        );
        let err = match session.send_command("show version").await {
            Ok(_) => panic!("recorded failure should replay"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ReplayedFailure(_)));
        session.close().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn replay_reproduces_connection_failure() {
        let opener = ReplayOpener::from_jsonl(FIXTURE).expect("fixture");
        let err = match opener.open("r2", &creds(), None).await {
            Ok(_) => panic!("recorded connection failure should replay"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ReplayedFailure(_)));
    }

    #[tokio::test]
    async fn replay_reports_unknown_device_and_command() {
        let opener = ReplayOpener::from_jsonl(FIXTURE).expect("fixture");
        let err = match opener.open("r3", &creds(), None).await {
            Ok(_) => panic!("unknown device should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ReplayMismatchError(_)));

        let mut session = opener.open("r1", &creds(), None).await.expect("open r1");
        let err = match session.send_command("show inventory").await {
            Ok(_) => panic!("unknown command should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
    }

    #[tokio::test]
    async fn each_open_consumes_one_recorded_session() {
        let opener = ReplayOpener::from_jsonl(FIXTURE).expect("fixture");
        opener.open("r1", &creds(), None).await.expect("first open");
        assert!(opener.open("r1", &creds(), None).await.is_err());
    }

    #[tokio::test]
    async fn numbered_sessions_keep_interleaved_commands_apart() {
        let jsonl = r#"{"ts_ms":1,"session":0,"event":{"kind":"connection_established","device":"r1","prompt":"r1#"}}
{"ts_ms":2,"session":1,"event":{"kind":"connection_established","device":"r1","prompt":"r1#"}}
{"ts_ms":3,"session":1,"event":{"kind":"command_output","device":"r1","command":"show clock","content":"second"}}
{"ts_ms":4,"session":0,"event":{"kind":"command_output","device":"r1","command":"show clock","content":"first"}}
"#;
        let opener = ReplayOpener::from_jsonl(jsonl).expect("recording");

        let mut first = opener.open("r1", &creds(), None).await.expect("first");
        let mut second = opener.open("r1", &creds(), None).await.expect("second");
        assert_eq!(first.send_command("show clock").await.expect("first"), "first");
        assert_eq!(
            second.send_command("show clock").await.expect("second"),
            "second"
        );
    }

    #[test]
    fn loaded_recorder_continues_session_numbers() {
        let recorder = SessionRecorder::new();
        assert_eq!(recorder.next_session(), 0);
        recorder
            .record_session_event(
                4,
                SessionEvent::ConnectionClosed {
                    device: "r1".to_string(),
                },
            )
            .expect("record");

        let jsonl = recorder.to_jsonl().expect("export");
        assert!(jsonl.contains(r#""session":4"#));
        let loaded = SessionRecorder::from_jsonl(&jsonl).expect("load");
        assert_eq!(loaded.next_session(), 5);
    }

    #[tokio::test]
    async fn recording_opener_captures_replayed_session() {
        let replay = ReplayOpener::from_jsonl(FIXTURE).expect("fixture");
        let opener = RecordingOpener::new(replay, SessionRecorder::new());

        let mut session = opener.open("r1", &creds(), None).await.expect("open r1");
        session.send_command("show clock").await.expect("clock");
        session.close().await;
        session.close().await;
        let _ = opener.open("r2", &creds(), None).await;

        let events = opener
            .recorder()
            .entries()
            .expect("entries")
            .into_iter()
            .map(|entry| entry.event)
            .collect::<Vec<_>>();
        assert_eq!(
            events,
            vec![
                SessionEvent::ConnectionEstablished {
                    device: "r1".to_string(),
                    prompt: "r1#".to_string(),
                },
                SessionEvent::CommandOutput {
                    device: "r1".to_string(),
                    command: "show clock".to_string(),
                    content: "12:00:00".to_string(),
                },
                SessionEvent::ConnectionClosed {
                    device: "r1".to_string(),
                },
                SessionEvent::ConnectionFailed {
                    device: "r2".to_string(),
                    reason: "replayed failure: connect timeout".to_string(),
                },
            ]
        );
    }
}
