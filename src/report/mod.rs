//! Report assembly.
//!
//! A finished [`BatchResult`] is persisted either as one text file per device
//! ([`OutputType::Text`]) or as a single table with one row per device
//! ([`OutputType::Tabular`]).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::BatchResult;
use crate::error::SnapshotError;

mod table;
mod text;

pub use table::{SHEET_NAME, Table, TableRow};

/// Spreadsheet flavour of a tabular report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    #[default]
    Xlsx,
    Csv,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Xlsx => "xlsx",
            TableFormat::Csv => "csv",
        }
    }
}

/// How a batch is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// One text file per device.
    #[default]
    Text,
    /// One table, one row per device.
    Tabular(TableFormat),
}

/// Writes report artifacts into an output directory.
#[derive(Debug, Clone)]
pub struct ReportAssembler {
    output_dir: PathBuf,
    title: String,
    timestamp: Option<DateTime<Local>>,
}

impl ReportAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            title: title.into(),
            timestamp: None,
        }
    }

    /// Fixes the time used in file names instead of reading the clock.
    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persists `batch` and returns the written paths, in device order for text output.
    pub fn assemble(
        &self,
        batch: &BatchResult,
        output: OutputType,
    ) -> Result<Vec<PathBuf>, SnapshotError> {
        let now = self.timestamp.unwrap_or_else(Local::now);
        let artifacts = match output {
            OutputType::Text => text::write_reports(&self.output_dir, batch, &now)?,
            OutputType::Tabular(format) => {
                let table = Table::from_batch(batch);
                let file_name = format!(
                    "{}_{}.{}",
                    file_safe(&self.title),
                    now.format("%B %d_%H.%M"),
                    format.extension()
                );
                let path = self.output_dir.join(file_name);
                match format {
                    TableFormat::Xlsx => table.write_xlsx(&path)?,
                    TableFormat::Csv => table.write_csv(&path)?,
                }
                vec![path]
            }
        };
        info!("Wrote {} report artifact(s)", artifacts.len());
        Ok(artifacts)
    }
}

/// Prompt without its trailing terminal symbol (`#`, `>`, `$`, `%` or `]`).
pub fn prompt_label(prompt: &str) -> &str {
    let prompt = prompt.trim();
    match prompt.chars().last() {
        Some('#' | '>' | '$' | '%' | ']') => &prompt[..prompt.len() - 1],
        _ => prompt,
    }
}

/// Replaces path separators and characters invalid in file names with `_`.
pub(crate) fn file_safe(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
