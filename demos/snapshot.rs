//! Runs a snapshot job described by a JSON file.
//!
//! ```text
//! cargo run --example snapshot -- job.json
//! cargo run --example snapshot -- job.json --record session.jsonl
//! cargo run --example snapshot -- job.json --replay session.jsonl
//! cargo run --example snapshot -- --schema
//! ```

use std::path::PathBuf;

use anyhow::{Context, bail};
use netsnap::batch::{SnapshotReport, run_snapshot};
use netsnap::config::{SnapshotJob, job_schema};
use netsnap::progress::ProgressSink;
use netsnap::session::{RecordingOpener, ReplayOpener, SessionRecorder, SshOpener};

enum Mode {
    Live,
    Record(PathBuf),
    Replay(PathBuf),
}

fn print_report(report: &SnapshotReport) {
    for outcome in report.batch.iter() {
        match &outcome.failure {
            None => println!(
                "ok      {} ({} command(s))",
                outcome.result.device,
                outcome.result.command_outputs.len()
            ),
            Some(failure) => println!(
                "failed  {} {:?}: {}",
                outcome.result.device, failure.kind, failure.reason
            ),
        }
    }
    for path in &report.artifacts {
        println!("wrote   {}", path.display());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let Some(first) = args.next() else {
        bail!("usage: snapshot <job.json> [--record <file> | --replay <file>] | --schema");
    };
    if first == "--schema" {
        println!("{}", job_schema()?);
        return Ok(());
    }

    let mode = match (args.next().as_deref(), args.next()) {
        (None, _) => Mode::Live,
        (Some("--record"), Some(path)) => Mode::Record(path.into()),
        (Some("--replay"), Some(path)) => Mode::Replay(path.into()),
        (Some(flag), _) => bail!("unknown or incomplete option '{flag}'"),
    };

    let raw = std::fs::read_to_string(&first).with_context(|| format!("read {first}"))?;
    let job = SnapshotJob::from_json(&raw)?;

    let (sink, mut rx) = ProgressSink::channel();
    let progress = tokio::spawn(async move {
        let mut total = 0.0_f64;
        while let Some(units) = rx.recv().await {
            total += units;
            eprint!("\rprogress {:>3.0}%", total.min(100.0));
        }
        eprintln!();
    });

    let report = match mode {
        Mode::Live => {
            let opener = SshOpener::from_session_config(&job.session)?;
            run_snapshot(opener, &job, &sink).await?
        }
        Mode::Record(path) => {
            let recorder = SessionRecorder::new();
            let opener = RecordingOpener::new(
                SshOpener::from_session_config(&job.session)?,
                recorder.clone(),
            );
            let report = run_snapshot(opener, &job, &sink).await?;
            std::fs::write(&path, recorder.to_jsonl()?)
                .with_context(|| format!("write {}", path.display()))?;
            report
        }
        Mode::Replay(path) => {
            let jsonl = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            run_snapshot(ReplayOpener::from_jsonl(&jsonl)?, &job, &sink).await?
        }
    };

    drop(sink);
    progress.await?;
    print_report(&report);
    Ok(())
}
