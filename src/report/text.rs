use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::debug;

use super::{file_safe, prompt_label};
use crate::batch::{BatchResult, DeviceOutcome};
use crate::error::SnapshotError;

const SEPARATOR_WIDTH: usize = 79;

/// Writes one text file per device and returns the paths in device order.
pub(super) fn write_reports(
    output_dir: &Path,
    batch: &BatchResult,
    now: &DateTime<Local>,
) -> Result<Vec<PathBuf>, SnapshotError> {
    let date = now.format("%Y-%m-%d").to_string();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut paths = Vec::with_capacity(batch.len());

    for outcome in batch.iter() {
        let stem = format!("{}_{}", file_label(outcome), date);
        let count = seen.entry(stem.clone()).or_insert(0);
        *count += 1;
        let file_name = if *count == 1 {
            format!("{stem}.txt")
        } else {
            format!("{stem}_{count}.txt")
        };

        let path = output_dir.join(file_name);
        std::fs::write(&path, render(outcome))
            .map_err(|e| SnapshotError::report_write(&path, e))?;
        debug!("Wrote {} for {}", path.display(), outcome.result.device);
        paths.push(path);
    }
    Ok(paths)
}

/// Text body of one device: every command with the prompt in front of it.
pub(super) fn render(outcome: &DeviceOutcome) -> String {
    let separator = "-".repeat(SEPARATOR_WIDTH);
    let mut body = String::new();
    for entry in &outcome.result.command_outputs {
        body.push_str(&format!(
            "{}{}\n{}\n{}\n",
            outcome.result.prompt, entry.command, entry.output, separator
        ));
    }
    body
}

/// File label from the prompt, falling back to the device identifier.
fn file_label(outcome: &DeviceOutcome) -> String {
    let label = match prompt_label(&outcome.result.prompt) {
        "" => outcome.result.device.as_str(),
        label => label,
    };
    file_safe(label)
}
