//! Business-day calendar and work item generation
//!
//! The universe of a run is the cross product of the configured identifiers
//! with every business day in the configured range. Weekends and configured
//! holidays are not business days.

use crate::config::WorkloadConfig;
use crate::types::WorkItem;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

/// Business-day calendar over an inclusive date range
#[derive(Clone, Debug)]
pub struct BusinessCalendar {
    start: NaiveDate,
    end: NaiveDate,
    holidays: HashSet<NaiveDate>,
}

impl BusinessCalendar {
    /// Create a calendar for `[start, end]` excluding `holidays`
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        holidays: impl IntoIterator<Item = NaiveDate>,
    ) -> Self {
        Self {
            start,
            end,
            holidays: holidays.into_iter().collect(),
        }
    }

    /// True when `date` is a weekday that is not a holiday
    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Business days of the range in ascending order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start
            .iter_days()
            .take_while(move |d| *d <= self.end)
            .filter(move |d| self.is_business_day(*d))
    }
}

/// Build every work item of a run, identifier-major
///
/// Blank identifiers are dropped and duplicates collapse to their first
/// occurrence, so each (identifier, day) pair is produced exactly once.
pub fn generate(config: &WorkloadConfig) -> Vec<WorkItem> {
    let calendar = BusinessCalendar::new(
        config.start_date,
        config.end_date,
        config.holidays.iter().copied(),
    );
    let days: Vec<NaiveDate> = calendar.days().collect();

    let mut seen = HashSet::new();
    let identifiers: Vec<&str> = config
        .identifiers
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .collect();

    let mut items = Vec::with_capacity(identifiers.len() * days.len());
    for identifier in identifiers {
        for day in &days {
            items.push(WorkItem::new(identifier, *day));
        }
    }

    tracing::debug!(
        identifiers = seen.len(),
        business_days = days.len(),
        work_items = items.len(),
        "generated workload"
    );
    items
}
