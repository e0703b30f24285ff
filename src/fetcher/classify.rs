//! Response classification

use crate::error::FetchError;
use crate::types::SkipReason;
use crate::utils::{is_blank, truncate_body};

/// What a single response means for the work item
#[derive(Debug)]
pub enum PageStatus {
    /// A page of data
    Data(String),
    /// An expected "no data" answer
    Skip(SkipReason),
    /// A failure to retry or record
    Failed(FetchError),
}

/// Classify a response by status code and body
pub fn classify(status: u16, body: String) -> PageStatus {
    let lower = body.to_ascii_lowercase();
    match status {
        204 => PageStatus::Skip(SkipReason::NoContent),
        401 | 403 if mentions_entitlement(&lower) => PageStatus::Skip(SkipReason::NotEntitled),
        404 => PageStatus::Skip(SkipReason::NotFound),
        400 if lower.contains("not found") => PageStatus::Skip(SkipReason::NotFound),
        200..=299 | 400..=499 if is_blank(&body) && status != 429 => {
            PageStatus::Skip(SkipReason::EmptyBody)
        }
        200..=299 if is_empty_array(&body) => PageStatus::Skip(SkipReason::EmptyBody),
        200..=299 => PageStatus::Data(body),
        code => PageStatus::Failed(FetchError::Status {
            code,
            body: truncate_body(&body),
        }),
    }
}

fn mentions_entitlement(lower_body: &str) -> bool {
    lower_body.contains("subscription") || lower_body.contains("entitle")
}

fn is_empty_array(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.starts_with('[')
        && trimmed.ends_with(']')
        && trimmed[1..trimmed.len() - 1].trim().is_empty()
}
