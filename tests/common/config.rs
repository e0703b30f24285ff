//! Test configuration helpers

use chrono::NaiveDate;
use liquidity_dl::Config;
use std::time::Duration;
use tempfile::TempDir;

/// A configuration pointed at a mock source, writing into its own temp dir
///
/// Keep the struct alive for the duration of the test; dropping it removes
/// the output directory.
pub struct TestRun {
    pub temp: TempDir,
    pub config: Config,
}

/// Small, fast configuration: no retries, short writer poll, two of each worker
pub fn test_run(base_url: &str, identifiers: &[&str], start: NaiveDate, end: NaiveDate) -> TestRun {
    let temp = tempfile::tempdir().expect("create temp dir");

    let mut config = Config::default();
    config.source.base_url = base_url.to_string();
    config.output.output_dir = temp.path().join("out");
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.jitter = false;
    config.pipeline.producers = 2;
    config.pipeline.consumers = 2;
    config.pipeline.drain_batch = 4;
    config.pipeline.writer_poll_interval_ms = 10;
    config.pipeline.shutdown_timeout = Duration::from_secs(30);
    config.workload.identifiers = identifiers.iter().map(|s| s.to_string()).collect();
    config.workload.start_date = start;
    config.workload.end_date = end;

    TestRun { temp, config }
}

/// Shorthand for `NaiveDate::from_ymd_opt(..).unwrap()`
pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
