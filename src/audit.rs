//! Post-run verification of the output directory
//!
//! Re-reads every monthly file with a real CSV parser and checks that the
//! first line is the configured header and that each row has the header's
//! width. The row counts, together with the error log, allow the accounting
//! identity of a run to be checked from the files alone.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transform::RowTransformer;
use crate::types::PartitionKey;
use std::path::{Path, PathBuf};

/// Findings for one monthly file
#[derive(Clone, Debug, PartialEq)]
pub struct FileAudit {
    /// Month of the file
    pub partition: PartitionKey,
    /// Location of the file
    pub path: PathBuf,
    /// First line is exactly the header (vacuously true for an empty file)
    pub header_ok: bool,
    /// Data rows after the header
    pub rows: u64,
    /// Rows whose cell count differs from the header
    pub width_mismatches: u64,
}

/// Findings for a whole output directory
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditReport {
    /// Monthly files, oldest month first
    pub files: Vec<FileAudit>,
    /// Records in the error log (0 when it does not exist)
    pub error_rows: u64,
}

impl AuditReport {
    /// Data rows across all monthly files
    pub fn total_rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows).sum()
    }

    /// Every file starts with the header and has uniform width
    pub fn is_clean(&self) -> bool {
        self.files
            .iter()
            .all(|f| f.header_ok && f.width_mismatches == 0)
    }

    /// Findings for one month
    pub fn file(&self, partition: PartitionKey) -> Option<&FileAudit> {
        self.files.iter().find(|f| f.partition == partition)
    }
}

/// Audit the monthly files and error log under `config.output`
pub fn audit_output(config: &Config) -> Result<AuditReport> {
    let output = &config.output;
    let header_line = RowTransformer::new(&config.schema, output.delimiter)?
        .header_line()
        .trim_end_matches('\n')
        .to_string();
    let header_cells = config.schema.header_cells();
    let delimiter = u8::try_from(output.delimiter).map_err(|_| {
        Error::config(
            "output.delimiter",
            "delimiter must be a single ASCII character",
        )
    })?;

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&output.output_dir)? {
        let path = entry?.path();
        let Some(partition) = partition_of(&path, &output.file_prefix) else {
            continue;
        };
        files.push(audit_file(
            partition,
            path,
            &header_line,
            &header_cells,
            delimiter,
        )?);
    }
    files.sort_by_key(|f| f.partition);

    let error_rows = count_error_rows(&output.error_log_path())?;
    let report = AuditReport { files, error_rows };

    tracing::info!(
        files = report.files.len(),
        rows = report.total_rows(),
        error_rows = report.error_rows,
        clean = report.is_clean(),
        "output audited"
    );
    Ok(report)
}

fn partition_of(path: &Path, prefix: &str) -> Option<PartitionKey> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(prefix)?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

fn audit_file(
    partition: PartitionKey,
    path: PathBuf,
    header_line: &str,
    header_cells: &[String],
    delimiter: u8,
) -> Result<FileAudit> {
    let text = std::fs::read_to_string(&path)?;
    let first_line = text.lines().next();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let parsed_header_ok = match records.next() {
        Some(record) => record?.iter().eq(header_cells.iter().map(String::as_str)),
        None => true,
    };

    let mut rows = 0;
    let mut width_mismatches = 0;
    for record in records {
        let record = record?;
        rows += 1;
        if record.len() != header_cells.len() {
            width_mismatches += 1;
        }
    }

    let header_ok = first_line.is_none_or(|line| line == header_line) && parsed_header_ok;
    if !header_ok {
        tracing::warn!(
            partition = %partition,
            path = %path.display(),
            "file does not start with the header"
        );
    }

    Ok(FileAudit {
        partition,
        path,
        header_ok,
        rows,
        width_mismatches,
    })
}

fn count_error_rows(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let mut rows = 0;
    for record in reader.records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}
