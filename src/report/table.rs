use std::path::Path;

use log::warn;
use rust_xlsxwriter::{Format, Workbook};

use super::prompt_label;
use crate::batch::BatchResult;
use crate::error::SnapshotError;

/// Sheet holding the snapshot table.
pub const SHEET_NAME: &str = "Snapshot";

const INDEX_HEADER: &str = "#";
const DEVICE_HEADER: &str = "Device";
/// Longest string an xlsx cell accepts.
const XLSX_CELL_LIMIT: usize = 32_767;

/// One device row. `cells` follows [`Table::commands`]; `None` for commands the device never reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// 1-based position in the device list.
    pub index: usize,
    pub device: String,
    pub cells: Vec<Option<String>>,
}

impl TableRow {
    pub fn cell(&self, column: usize) -> Option<&str> {
        self.cells.get(column).and_then(|cell| cell.as_deref())
    }
}

/// Batch results laid out as rows of devices and columns of commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    /// Command columns in first-seen order across the batch.
    pub commands: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl Table {
    pub fn from_batch(batch: &BatchResult) -> Self {
        let mut commands: Vec<String> = Vec::new();
        for outcome in batch.iter() {
            for entry in &outcome.result.command_outputs {
                if !commands.contains(&entry.command) {
                    commands.push(entry.command.clone());
                }
            }
        }

        let rows = batch
            .iter()
            .enumerate()
            .map(|(i, outcome)| TableRow {
                index: i + 1,
                device: prompt_label(&outcome.result.prompt).to_string(),
                cells: commands
                    .iter()
                    .map(|command| outcome.result.output(command).map(str::to_string))
                    .collect(),
            })
            .collect();

        Self { commands, rows }
    }

    /// Header row: index, device, then one column per command.
    pub fn headers(&self) -> Vec<&str> {
        let mut headers = vec![INDEX_HEADER, DEVICE_HEADER];
        headers.extend(self.commands.iter().map(String::as_str));
        headers
    }

    /// Looks up the column of `command`.
    pub fn column(&self, command: &str) -> Option<usize> {
        self.commands.iter().position(|c| c == command)
    }

    pub fn write_xlsx(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(SHEET_NAME)
            .map_err(|e| SnapshotError::report_write(path, e))?;

        for (col, header) in self.headers().into_iter().enumerate() {
            worksheet
                .write_string_with_format(0, col as u16, header, &header_format)
                .map_err(|e| SnapshotError::report_write(path, e))?;
        }

        for (r, row) in self.rows.iter().enumerate() {
            let line = (r + 1) as u32;
            worksheet
                .write_number(line, 0, row.index as f64)
                .map_err(|e| SnapshotError::report_write(path, e))?;
            worksheet
                .write_string(line, 1, &row.device)
                .map_err(|e| SnapshotError::report_write(path, e))?;
            for (c, cell) in row.cells.iter().enumerate() {
                let Some(value) = cell else { continue };
                worksheet
                    .write_string(line, (c + 2) as u16, xlsx_cell(value, &row.device))
                    .map_err(|e| SnapshotError::report_write(path, e))?;
            }
        }

        workbook
            .save(path)
            .map_err(|e| SnapshotError::report_write(path, e))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| SnapshotError::report_write(path, e))?;
        writer
            .write_record(self.headers())
            .map_err(|e| SnapshotError::report_write(path, e))?;

        for row in &self.rows {
            let mut record = vec![row.index.to_string(), row.device.clone()];
            record.extend(row.cells.iter().map(|cell| cell.clone().unwrap_or_default()));
            writer
                .write_record(&record)
                .map_err(|e| SnapshotError::report_write(path, e))?;
        }

        writer
            .flush()
            .map_err(|e| SnapshotError::report_write(path, e))
    }
}

fn xlsx_cell<'a>(value: &'a str, device: &str) -> &'a str {
    if value.chars().count() <= XLSX_CELL_LIMIT {
        return value;
    }
    warn!(
        "Output for {} exceeds {} characters and was truncated in the spreadsheet",
        device, XLSX_CELL_LIMIT
    );
    match value.char_indices().nth(XLSX_CELL_LIMIT) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}
