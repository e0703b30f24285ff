//! Core types for liquidity-dl

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One (identifier, business day) unit of work
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Security identifier (ISIN)
    pub identifier: String,
    /// Business day the data is requested for
    pub business_day: NaiveDate,
}

impl WorkItem {
    /// Create a new WorkItem
    pub fn new(identifier: impl Into<String>, business_day: NaiveDate) -> Self {
        Self {
            identifier: identifier.into(),
            business_day,
        }
    }

    /// Month partition this item's rows are written to
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::from(self.business_day)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.business_day)
    }
}

/// Entry of the work queue
///
/// Sentinels travel through the queue like any other entry, so a consumer
/// only sees its sentinel after every payload enqueued before it.
#[derive(Clone, Debug, PartialEq)]
pub enum QueueItem {
    /// A fetched raw document for one work item
    Payload {
        /// Raw JSON text (one page, or the assembled array of all pages)
        payload: String,
        /// The work item it was fetched for
        item: WorkItem,
    },
    /// Tells exactly one consumer to stop
    Sentinel,
}

impl QueueItem {
    /// True for the shutdown marker
    pub fn is_sentinel(&self) -> bool {
        matches!(self, QueueItem::Sentinel)
    }
}

/// Month grouping key of the output files, rendered `yyyy-mm`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    year: i32,
    month: u32,
}

impl PartitionKey {
    /// Create a key for a calendar month (1-based)
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Calendar year
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Calendar month (1-12)
    pub fn month(&self) -> u32 {
        self.month
    }
}

impl From<NaiveDate> for PartitionKey {
    fn from(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for PartitionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid partition key: {s}"))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid partition year: {s}"))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid partition month: {s}"))?;
        if !(1..=12).contains(&month) {
            return Err(format!("invalid partition month: {s}"));
        }
        Ok(Self::new(year, month))
    }
}

/// Expected "no data" outcome of a fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Response body was empty or whitespace
    EmptyBody,
    /// 204 No Content
    NoContent,
    /// Subscription does not cover the identifier
    NotEntitled,
    /// 404, or 400 reporting an unknown identifier
    NotFound,
}

impl SkipReason {
    /// All reasons, in reporting order
    pub const ALL: [SkipReason; 4] = [
        SkipReason::EmptyBody,
        SkipReason::NoContent,
        SkipReason::NotEntitled,
        SkipReason::NotFound,
    ];

    /// Stable label used in logs and the run summary
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EmptyBody => "empty_body",
            SkipReason::NoContent => "no_content",
            SkipReason::NotEntitled => "not_entitled",
            SkipReason::NotFound => "not_found",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result of a fetch for one work item
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// Data to enqueue
    Payload(String),
    /// Classified skip; nothing is enqueued and nothing is recorded
    Skipped(SkipReason),
}
