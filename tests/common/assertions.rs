//! Assertions over the files a run leaves behind

use liquidity_dl::transform::RowTransformer;
use liquidity_dl::{Config, PartitionKey};
use std::path::PathBuf;

/// Path of a monthly file
pub fn monthly_path(config: &Config, key: PartitionKey) -> PathBuf {
    config.output.partition_path(&key.to_string())
}

/// Contents of a monthly file
pub fn read_monthly(config: &Config, key: PartitionKey) -> String {
    let path = monthly_path(config, key);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

/// The header line the run must have written, including its newline
pub fn expected_header(config: &Config) -> String {
    RowTransformer::new(&config.schema, config.output.delimiter)
        .expect("schema compiles")
        .header_line()
        .to_string()
}

/// Assert the file starts with the header and contains it exactly once
pub fn assert_single_header(config: &Config, text: &str) {
    let header = expected_header(config);
    assert!(
        text.starts_with(&header),
        "file does not start with the header: {:?}",
        text.lines().next()
    );
    assert_eq!(text.matches(&header).count(), 1, "header written more than once");
}

/// Parse a monthly file with a real CSV reader, header first
pub fn parse_rows(config: &Config, text: &str) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.output.delimiter as u8)
        .has_headers(false)
        .from_reader(text.as_bytes());
    reader
        .records()
        .map(|r| r.expect("valid CSV").iter().map(str::to_string).collect())
        .collect()
}

/// Index of a header column
pub fn column(config: &Config, name: &str) -> usize {
    config
        .schema
        .header_cells()
        .iter()
        .position(|h| h == name)
        .unwrap_or_else(|| panic!("no column {name}"))
}
