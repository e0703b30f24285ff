//! Configuration types for liquidity-dl

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Remote source settings (endpoint, request shape, admission control)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base address of the remote source, e.g. "https://api.example.com"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Endpoint template; `{identifier}` and `{date}` are substituted per work item
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// chrono format used for `{date}` (default: "%Y-%m-%d")
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Subscription key sent with every request (None = no key header)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Header carrying the subscription key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Per-request timeout (default: 180 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum pages followed for one work item (default: 1000)
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Concurrent outbound fetches allowed across all producers (default: 16)
    #[serde(default = "default_admission_permits")]
    pub admission_permits: usize,

    /// Delay held after each call before releasing its admission slot (default: 0)
    #[serde(default)]
    pub pacing_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            date_format: default_date_format(),
            api_key: None,
            api_key_header: default_api_key_header(),
            request_timeout: default_request_timeout(),
            max_pages: default_max_pages(),
            admission_permits: default_admission_permits(),
            pacing_delay_ms: 0,
        }
    }
}

/// How access tokens are obtained
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMode {
    /// No Authorization header is sent (local mock servers, dry runs)
    #[default]
    Disabled,

    /// Locally minted tokens with a fixed lifetime
    Static {
        /// Token prefix; a random suffix is appended per acquisition
        #[serde(default = "default_static_token")]
        token: String,
        /// Lifetime of each minted token
        #[serde(default = "default_static_lifetime", with = "duration_serde")]
        lifetime: Duration,
    },

    /// OAuth2 client-credentials grant against a token endpoint
    ClientCredentials {
        /// Token endpoint URL
        token_url: String,
        /// Client (application) id
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Requested scope, e.g. "api://liquidity/.default"
        scope: String,
    },
}

/// Authentication settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token source
    #[serde(default)]
    pub mode: AuthMode,

    /// Refresh a cached token this long before it expires (default: 300 seconds)
    #[serde(default = "default_refresh_margin", with = "duration_serde")]
    pub refresh_margin: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            refresh_margin: default_refresh_margin(),
        }
    }
}

/// Worker pool and queue sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Work queue capacity (default: 10000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of producer tasks (default: 32)
    #[serde(default = "default_producers")]
    pub producers: usize,

    /// Number of consumer threads (default: half the available cores, at least 1)
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    /// Extra queued items a consumer drains after each blocking take (default: 99)
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,

    /// Poll interval of partition drain loops (default: 500 ms)
    #[serde(default = "default_writer_poll_interval_ms")]
    pub writer_poll_interval_ms: u64,

    /// Bounded wait for consumers to terminate at shutdown (default: 300 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            producers: default_producers(),
            consumers: default_consumers(),
            drain_batch: default_drain_batch(),
            writer_poll_interval_ms: default_writer_poll_interval_ms(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Also retry unclassified 5xx/429 statuses (default: false, record and continue)
    #[serde(default)]
    pub retry_on_status: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            retry_on_status: false,
        }
    }
}

/// Output file settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the monthly files and the error log (default: "./out")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Monthly file name prefix; files are named `<prefix><yyyy-mm>.csv`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Cell delimiter (default: ';')
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Error log file name inside `output_dir` (default: "errors.csv")
    #[serde(default = "default_error_log_file")]
    pub error_log_file: String,

    /// Append to existing monthly files instead of truncating them (default: false)
    #[serde(default)]
    pub append: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            delimiter: default_delimiter(),
            error_log_file: default_error_log_file(),
            append: false,
        }
    }
}

impl OutputConfig {
    /// Path of the monthly file for a partition key
    pub fn partition_path(&self, key: &str) -> PathBuf {
        self.output_dir.join(format!("{}{}.csv", self.file_prefix, key))
    }

    /// Path of the error log
    pub fn error_log_path(&self) -> PathBuf {
        self.output_dir.join(&self.error_log_file)
    }
}

/// One fixed output column
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    /// Header name (defaults to the path itself)
    #[serde(default)]
    pub name: Option<String>,

    /// Dotted path into each record, e.g. `aggregatedHoldingData.simpleMovingAverage['30'].volume`
    pub path: String,
}

impl ColumnSpec {
    /// Column whose header is its path
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            name: None,
            path: path.into(),
        }
    }

    /// Header name of this column
    pub fn header(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }
}

/// Mapping from JSON records to output columns
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Header of the requested-identifier column (default: "RequestedISIN")
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,

    /// Header of the requested-date column (default: "RequestedDate")
    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// Fixed columns extracted once per record
    #[serde(default = "default_fixed_columns")]
    pub fixed: Vec<ColumnSpec>,

    /// Candidate paths of the expandable array; the first non-empty one wins
    #[serde(default = "default_expand_candidates")]
    pub expand_candidates: Vec<String>,

    /// Fields extracted from each element of the expandable array
    #[serde(default = "default_expand_fields")]
    pub expand_fields: Vec<String>,

    /// Header prefix of expandable columns (default: "transaction")
    #[serde(default = "default_expand_prefix")]
    pub expand_prefix: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            identifier_column: default_identifier_column(),
            date_column: default_date_column(),
            fixed: default_fixed_columns(),
            expand_candidates: default_expand_candidates(),
            expand_fields: default_expand_fields(),
            expand_prefix: default_expand_prefix(),
        }
    }
}

impl SchemaConfig {
    /// Header cells in output order
    pub fn header_cells(&self) -> Vec<String> {
        let mut cells = Vec::with_capacity(2 + self.fixed.len() + self.expand_fields.len());
        cells.push(self.identifier_column.clone());
        cells.push(self.date_column.clone());
        cells.extend(self.fixed.iter().map(|c| c.header().to_string()));
        cells.extend(
            self.expand_fields
                .iter()
                .map(|f| format!("{}.{}", self.expand_prefix, f)),
        );
        cells
    }
}

/// The universe of work items
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Security identifiers to fetch
    #[serde(default)]
    pub identifiers: Vec<String>,

    /// First business day (inclusive)
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Last business day (inclusive)
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,

    /// Dates excluded in addition to weekends
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            identifiers: Vec::new(),
            start_date: default_start_date(),
            end_date: default_end_date(),
            holidays: Vec::new(),
        }
    }
}

/// Main configuration for a [`crate::Pipeline`] run
///
/// Fields are organized into logical sub-configs:
/// - [`source`](SourceConfig): endpoint, request shape, admission control
/// - [`auth`](AuthConfig): token source and refresh margin
/// - [`pipeline`](PipelineConfig): queue capacity and pool sizes
/// - [`retry`](RetryConfig): transient failure handling
/// - [`output`](OutputConfig): monthly files and error log
/// - [`schema`](SchemaConfig): JSON path to column mapping
/// - [`workload`](WorkloadConfig): identifiers and date range
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Worker pool and queue sizing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,

    /// Output files
    #[serde(default)]
    pub output: OutputConfig,

    /// Column mapping
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Work item universe
    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("invalid configuration in {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.source.base_url.trim().is_empty() {
            return Err(Error::config("source.base_url", "must not be empty"));
        }
        if url::Url::parse(&self.source.base_url).is_err() {
            return Err(Error::config("source.base_url", "must be an absolute URL"));
        }
        if chrono::format::StrftimeItems::new(&self.source.date_format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return Err(Error::config("source.date_format", "is not a valid strftime format"));
        }
        if self.source.admission_permits == 0 {
            return Err(Error::config("source.admission_permits", "must be > 0"));
        }
        if self.source.max_pages == 0 {
            return Err(Error::config("source.max_pages", "must be > 0"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::config("pipeline.queue_capacity", "must be > 0"));
        }
        if self.pipeline.producers == 0 {
            return Err(Error::config("pipeline.producers", "must be > 0"));
        }
        if self.pipeline.consumers == 0 {
            return Err(Error::config("pipeline.consumers", "must be > 0"));
        }
        if self.pipeline.writer_poll_interval_ms == 0 {
            return Err(Error::config("pipeline.writer_poll_interval_ms", "must be > 0"));
        }
        if self.pipeline.shutdown_timeout.is_zero() {
            return Err(Error::config("pipeline.shutdown_timeout", "must be > 0"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.workload.identifiers.is_empty() {
            return Err(Error::config("workload.identifiers", "must not be empty"));
        }
        if self.workload.start_date > self.workload.end_date {
            return Err(Error::config(
                "workload.start_date",
                "must not be after workload.end_date",
            ));
        }
        if !self.output.delimiter.is_ascii() || matches!(self.output.delimiter, '"' | '\r' | '\n')
        {
            return Err(Error::config(
                "output.delimiter",
                "must be an ASCII character other than a quote or line break",
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_endpoint() -> String {
    "/liquidity/v1/securities/{identifier}?referenceDate={date}".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_api_key_header() -> String {
    "Ocp-Apim-Subscription-Key".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_max_pages() -> usize {
    1000
}

fn default_admission_permits() -> usize {
    16
}

fn default_static_token() -> String {
    "dry-run".to_string()
}

fn default_static_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_refresh_margin() -> Duration {
    Duration::from_secs(300)
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_producers() -> usize {
    32
}

fn default_consumers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores / 2).max(1)
}

fn default_drain_batch() -> usize {
    99
}

fn default_writer_poll_interval_ms() -> u64 {
    500
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_file_prefix() -> String {
    "securities_".to_string()
}

fn default_delimiter() -> char {
    ';'
}

fn default_error_log_file() -> String {
    "errors.csv".to_string()
}

fn default_identifier_column() -> String {
    "RequestedISIN".to_string()
}

fn default_date_column() -> String {
    "RequestedDate".to_string()
}

fn default_expand_candidates() -> Vec<String> {
    vec!["transactions".to_string()]
}

fn default_expand_prefix() -> String {
    "transaction".to_string()
}

fn default_expand_fields() -> Vec<String> {
    [
        "transactionId",
        "transactionDate",
        "settlementDate",
        "transactionType",
        "transactionStatus",
        "quantity",
        "quantityUnit",
        "cashAmount",
        "cashSettlementCurrency",
        "grossSettlementPrice",
        "receivingPartyType",
        "deliveringPartyType",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_fixed_columns() -> Vec<ColumnSpec> {
    const SMA: &str = "simpleMovingAverage['30']";
    let mut paths: Vec<String> = [
        "referenceDate",
        "compositeLiquidityScore",
        "concentrationWeightedLiquidityScore",
        "holdingScore",
        "turnoverScore",
        "isin",
        "amountType",
        "ecbTiering",
        "ecbHaircut",
        "optionFlag",
        "zeroCouponFlag",
        "couponPaymentDate",
        "couponRecordDate",
        "interestPeriodStartDate",
        "interestPeriodEndDate",
        "couponPaymentFrequency",
        "rateType",
        "couponInterestRate",
        "couponGrossAmount",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for leaf in [
        "freeFloatHolding",
        "freeFloatHoldingEur",
        "freeFloatMarketValueEur",
        "concentration",
        "averageHoldingSizeEur",
        "averageHoldingSizeMarketValueEur",
        "medianHoldingSizeEur",
        "medianHoldingSizeMarketValueEur",
    ] {
        paths.push(format!("aggregatedHoldingData.{leaf}"));
    }
    for leaf in [
        "concentration",
        "concentrationDelta",
        "freeFloatHolding",
        "freeFloatHoldingDelta",
        "averageHoldingSize",
        "averageHoldingSizeDelta",
        "medianHoldingSize",
        "medianHoldingSizeDelta",
    ] {
        paths.push(format!("aggregatedHoldingData.{SMA}.{leaf}"));
    }
    for leaf in [
        "totalVolCurrentBD.volumeEur",
        "totalVolNext1BD.volumeEur",
        "totalVolNext2BD.volumeEur",
        "transactionCount",
        "averageTicketSizeEur",
        "averageGrossSettlementPriceEur",
        "medianTicketSizeEur",
        "medianGrossSettlementPriceEur",
        "settlementVWAPEur",
    ] {
        paths.push(format!("aggregatedTransactionData.{leaf}"));
    }
    for leaf in [
        "concentration",
        "concentrationDelta",
        "volume",
        "volumeDelta",
        "averageTicketSize",
        "averageTicketSizeDelta",
        "medianTicketSize",
        "medianTicketSizeDelta",
        "averageGrossSettlementPrice",
        "averageGrossSettlementPriceDelta",
        "medianGrossSettlementPrice",
        "medianGrossSettlementPriceDelta",
        "settlementVWAP",
        "settlementVWAPDelta",
    ] {
        paths.push(format!("aggregatedTransactionData.{SMA}.{leaf}"));
    }

    paths.into_iter().map(ColumnSpec::path).collect()
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 31).unwrap_or_default()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
