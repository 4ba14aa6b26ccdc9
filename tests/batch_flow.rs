use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, TimeZone};
use netsnap::batch::{BatchCoordinator, FailureKind, run_snapshot};
use netsnap::config::{SessionConfig, SnapshotJob};
use netsnap::error::{ConnectError, SnapshotError};
use netsnap::progress::{ProgressSink, ProgressTracker};
use netsnap::report::{OutputType, ReportAssembler, TableFormat};
use netsnap::session::{Credentials, DeviceSession, ProxyCredentials, SessionOpener};

#[derive(Clone, Default)]
struct DeviceScript {
    prompt: Option<String>,
    refuse: bool,
    fail_on: Option<String>,
    panic_on: Option<String>,
    outputs: HashMap<String, String>,
    delay_ms: u64,
}

#[derive(Default)]
struct Counters {
    open: AtomicUsize,
    peak: AtomicUsize,
    closes: Mutex<HashMap<String, usize>>,
}

impl Counters {
    fn closes(&self, device: &str) -> usize {
        self.closes
            .lock()
            .expect("lock")
            .get(device)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct MockOpener {
    scripts: HashMap<String, DeviceScript>,
    counters: Arc<Counters>,
}

impl MockOpener {
    fn script(mut self, device: &str, script: DeviceScript) -> Self {
        self.scripts.insert(device.to_string(), script);
        self
    }
}

struct MockSession {
    device: String,
    prompt: String,
    script: DeviceScript,
    counters: Arc<Counters>,
    closed: bool,
}

impl DeviceSession for MockSession {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn send_command(&mut self, command: &str) -> Result<String, ConnectError> {
        if self.script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.delay_ms)).await;
        }
        if self.script.panic_on.as_deref() == Some(command) {
            panic!("scripted panic on {}", self.device);
        }
        if self.script.fail_on.as_deref() == Some(command) {
            return Err(ConnectError::ExecTimeout(String::new()));
        }
        Ok(self
            .script
            .outputs
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("{command} on {}\n", self.device)))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
        *self
            .counters
            .closes
            .lock()
            .expect("lock")
            .entry(self.device.clone())
            .or_insert(0) += 1;
    }
}

impl SessionOpener for MockOpener {
    type Session = MockSession;

    async fn open(
        &self,
        hostname: &str,
        _credentials: &Credentials,
        _proxy: Option<&ProxyCredentials>,
    ) -> Result<MockSession, ConnectError> {
        let script = self.scripts.get(hostname).cloned().unwrap_or_default();
        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }
        if script.refuse {
            return Err(ConnectError::AuthenticationFailed(hostname.to_string()));
        }
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(open, Ordering::SeqCst);
        Ok(MockSession {
            device: hostname.to_string(),
            prompt: script
                .prompt
                .clone()
                .unwrap_or_else(|| format!("{hostname}#")),
            script,
            counters: Arc::clone(&self.counters),
            closed: false,
        })
    }
}

fn session_config() -> SessionConfig {
    SessionConfig::from_json(r#"{"NETWORK_USERNAME": "netops", "NETWORK_PASSWORD": "x"}"#)
        .expect("session config")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn refusing() -> DeviceScript {
    DeviceScript {
        refuse: true,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outcomes_follow_device_order_and_isolate_failures() {
    let opener = MockOpener::default()
        .script(
            "r1",
            DeviceScript {
                delay_ms: 30,
                ..Default::default()
            },
        )
        .script("bad", refusing())
        .script(
            "r3",
            DeviceScript {
                fail_on: Some("show b".to_string()),
                ..Default::default()
            },
        );
    let counters = Arc::clone(&opener.counters);
    let coordinator = BatchCoordinator::new(Arc::new(opener), session_config());

    let devices = strings(&["r1", "bad", "r3", "r4"]);
    let commands = strings(&["show a", "show b", "show c"]);
    let batch = coordinator
        .run(&devices, &commands, &ProgressSink::none())
        .await;

    let order: Vec<&str> = batch.iter().map(|o| o.result.device.as_str()).collect();
    assert_eq!(order, vec!["r1", "bad", "r3", "r4"]);

    let r1 = batch.get("r1").expect("r1");
    assert!(r1.is_success());
    assert_eq!(r1.result.prompt, "r1#");
    assert_eq!(r1.result.output("show c"), Some("show c on r1"));

    let bad = batch.get("bad").expect("bad");
    let failure = bad.failure.as_ref().expect("bad failed");
    assert_eq!(failure.kind, FailureKind::Connection);
    assert!(bad.result.prompt.is_empty());
    assert!(bad.result.command_outputs.is_empty());
    assert_eq!(counters.closes("bad"), 0);

    let r3 = batch.get("r3").expect("r3");
    let failure = r3.failure.as_ref().expect("r3 failed");
    assert_eq!(failure.kind, FailureKind::Command);
    assert_eq!(failure.command.as_deref(), Some("show b"));
    assert_eq!(r3.result.command_outputs.len(), 1);
    assert_eq!(counters.closes("r3"), 1);

    assert_eq!(batch.failed().count(), 2);
    assert_eq!(counters.closes("r1"), 1);
    assert_eq!(counters.closes("r4"), 1);
}

#[tokio::test]
async fn duplicate_devices_are_processed_independently() {
    let opener = MockOpener::default();
    let counters = Arc::clone(&opener.counters);
    let coordinator = BatchCoordinator::new(Arc::new(opener), session_config());

    let batch = coordinator
        .run(
            &strings(&["r1", "r1"]),
            &strings(&["show clock"]),
            &ProgressSink::none(),
        )
        .await;

    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|outcome| outcome.is_success()));
    assert_eq!(counters.closes("r1"), 2);
}

#[tokio::test]
async fn successful_batch_spends_startup_and_device_units() {
    let coordinator = BatchCoordinator::new(Arc::new(MockOpener::default()), session_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink = ProgressSink::from_fn(move |units| sink_seen.lock().expect("lock").push(units));

    coordinator
        .run(
            &strings(&["r1", "r2", "r3"]),
            &strings(&["show a", "show b"]),
            &sink,
        )
        .await;

    let seen = seen.lock().expect("lock");
    assert_eq!(seen[0], 9.0);
    let device_units: f64 = seen[1..].iter().sum();
    assert!((device_units - 90.0).abs() < 1e-6);
    // startup, then connect + auth + 2 commands for each of 3 devices
    assert_eq!(seen.len(), 1 + 3 * 4);
}

#[tokio::test]
async fn failed_devices_do_not_spend_their_remaining_share() {
    let opener = MockOpener::default().script("bad", refusing());
    let coordinator = BatchCoordinator::new(Arc::new(opener), session_config());
    let tracker = ProgressTracker::new();

    coordinator
        .run(
            &strings(&["ok", "bad"]),
            &strings(&["show a"]),
            &tracker.sink(),
        )
        .await;

    // 9 + 45 for "ok" + 4.5 connect start for "bad"
    assert!((tracker.raw_total() - 58.5).abs() < 1e-6);
}

#[tokio::test]
async fn empty_device_list_only_emits_startup() {
    let coordinator = BatchCoordinator::new(Arc::new(MockOpener::default()), session_config());
    let tracker = ProgressTracker::new();

    let batch = coordinator
        .run(&[], &strings(&["show a"]), &tracker.sink())
        .await;

    assert!(batch.is_empty());
    assert_eq!(tracker.raw_total(), 9.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_max_workers() {
    let mut opener = MockOpener::default();
    let devices: Vec<String> = (0..20).map(|i| format!("sw{i:02}")).collect();
    for device in &devices {
        opener = opener.script(
            device,
            DeviceScript {
                delay_ms: 20,
                ..Default::default()
            },
        );
    }
    let counters = Arc::clone(&opener.counters);
    let coordinator =
        BatchCoordinator::new(Arc::new(opener), session_config()).with_max_workers(8);

    let batch = coordinator
        .run(&devices, &strings(&["show a", "show b"]), &ProgressSink::none())
        .await;

    assert_eq!(batch.len(), 20);
    assert!(batch.iter().all(|outcome| outcome.is_success()));
    let peak = counters.peak.load(Ordering::SeqCst);
    assert!((1..=8).contains(&peak), "peak {peak} outside 1..=8");
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
}

#[test]
fn pool_size_is_bounded_by_devices_and_at_least_one() {
    let coordinator = BatchCoordinator::new(Arc::new(MockOpener::default()), session_config());
    assert_eq!(coordinator.pool_size(3), 3);
    assert_eq!(coordinator.pool_size(20), 8);

    let coordinator = coordinator.with_max_workers(0);
    assert_eq!(coordinator.pool_size(20), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_is_recorded_as_aborted() {
    let opener = MockOpener::default().script(
        "crash",
        DeviceScript {
            panic_on: Some("show a".to_string()),
            ..Default::default()
        },
    );
    let coordinator = BatchCoordinator::new(Arc::new(opener), session_config());

    let batch = coordinator
        .run(
            &strings(&["r1", "crash", "r3"]),
            &strings(&["show a"]),
            &ProgressSink::none(),
        )
        .await;

    assert_eq!(batch.len(), 3);
    let crash = batch.get("crash").expect("crash outcome");
    assert_eq!(
        crash.failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Aborted)
    );
    assert!(batch.get("r1").expect("r1").is_success());
    assert!(batch.get("r3").expect("r3").is_success());
}

#[tokio::test]
async fn tabular_report_has_blank_row_for_unreachable_device() {
    let mut outputs = HashMap::new();
    outputs.insert("show version".to_string(), "X\r\n".to_string());
    let opener = MockOpener::default()
        .script(
            "A",
            DeviceScript {
                prompt: Some("edge-a#".to_string()),
                outputs,
                ..Default::default()
            },
        )
        .script("B", refusing());
    let coordinator = BatchCoordinator::new(Arc::new(opener), session_config());
    let batch = coordinator
        .run(
            &strings(&["A", "B"]),
            &strings(&["show version"]),
            &ProgressSink::none(),
        )
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let timestamp = Local
        .with_ymd_and_hms(2024, 3, 5, 14, 7, 0)
        .single()
        .expect("timestamp");
    let artifacts = ReportAssembler::new(dir.path(), "Snapshot")
        .with_timestamp(timestamp)
        .assemble(&batch, OutputType::Tabular(TableFormat::Csv))
        .expect("assemble");

    assert_eq!(artifacts, vec![dir.path().join("Snapshot_March 05_14.07.csv")]);
    let content = std::fs::read_to_string(&artifacts[0]).expect("read csv");
    assert_eq!(content, "#,Device,show version\n1,edge-a,X\n2,,\n");
}

#[tokio::test]
async fn run_snapshot_writes_text_reports_and_completes_progress() {
    let mut outputs = HashMap::new();
    outputs.insert("show ip int brief".to_string(), "Output".to_string());
    let opener = MockOpener::default().script(
        "10.0.0.1",
        DeviceScript {
            prompt: Some("router1#".to_string()),
            outputs,
            ..Default::default()
        },
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("reports");
    let job = SnapshotJob::new(
        strings(&["10.0.0.1"]),
        strings(&["show ip int brief"]),
        OutputType::Text,
        &out,
        session_config(),
    );
    let tracker = ProgressTracker::new();

    let report = run_snapshot(opener, &job, &tracker.sink())
        .await
        .expect("run snapshot");

    assert_eq!(report.batch.len(), 1);
    assert_eq!(report.artifacts.len(), 1);
    let name = report.artifacts[0]
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .expect("file name");
    assert!(name.starts_with("router1_") && name.ends_with(".txt"));
    let body = std::fs::read_to_string(&report.artifacts[0]).expect("read report");
    assert_eq!(
        body,
        format!("router1#show ip int brief\nOutput\n{}\n", "-".repeat(79))
    );
    assert!((tracker.raw_total() - 101.0).abs() < 1e-6);
    assert_eq!(tracker.percent(), 100.0);
}

#[tokio::test]
async fn run_snapshot_skips_blank_devices_and_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut job = SnapshotJob::new(
        strings(&["r1"]),
        strings(&["show a"]),
        OutputType::Tabular(TableFormat::Csv),
        dir.path(),
        session_config(),
    );
    job.devices = strings(&["r1", "", "  "]);
    job.commands = strings(&["", "show a", " "]);
    let opener = MockOpener::default();
    let counters = Arc::clone(&opener.counters);
    let tracker = ProgressTracker::new();

    let report = run_snapshot(opener, &job, &tracker.sink())
        .await
        .expect("run snapshot");

    assert_eq!(report.batch.len(), 1);
    let r1 = report.batch.get("r1").expect("r1");
    assert!(r1.is_success());
    assert_eq!(r1.result.command_outputs.len(), 1);
    assert_eq!(r1.result.output("show a"), Some("show a on r1"));
    assert_eq!(counters.closes(""), 0);
    assert!((tracker.raw_total() - 101.0).abs() < 1e-6);

    let table = std::fs::read_to_string(&report.artifacts[0]).expect("read csv");
    assert_eq!(table, "#,Device,show a\n1,r1,show a on r1\n");
}

#[tokio::test]
async fn run_snapshot_fails_when_output_dir_is_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("taken");
    std::fs::write(&blocker, "not a directory").expect("write blocker");
    let job = SnapshotJob::new(
        strings(&["r1"]),
        strings(&["show a"]),
        OutputType::Text,
        &blocker,
        session_config(),
    );

    let err = match run_snapshot(MockOpener::default(), &job, &ProgressSink::none()).await {
        Ok(_) => panic!("report write should fail"),
        Err(err) => err,
    };
    assert!(matches!(err, SnapshotError::ReportWrite { .. }));
}

#[tokio::test]
async fn run_snapshot_rejects_invalid_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session_config();
    session.username.clear();
    let job = SnapshotJob::new(
        strings(&["r1"]),
        strings(&["show a"]),
        OutputType::Text,
        dir.path(),
        session,
    );

    let err = match run_snapshot(MockOpener::default(), &job, &ProgressSink::none()).await {
        Ok(_) => panic!("invalid session should fail"),
        Err(err) => err,
    };
    assert!(matches!(err, SnapshotError::InvalidConfig(_)));
}
