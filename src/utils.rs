//! Utility functions for timing, payload inspection and output paths

use crate::error::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Maximum number of response-body characters kept in error messages
const MAX_BODY_SNIPPET: usize = 512;

/// Format an elapsed duration as `mm:ss.SSS`
///
/// Minutes are not wrapped at an hour, so long runs read e.g. `125:03.250`.
///
/// # Examples
///
/// ```
/// use liquidity_dl::utils::format_elapsed;
/// use std::time::Duration;
///
/// assert_eq!(format_elapsed(Duration::from_millis(83_045)), "01:23.045");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
}

/// True when a response body carries no data (empty or whitespace only)
pub fn is_blank(body: &str) -> bool {
    body.trim().is_empty()
}

/// Shorten a response body for logs and error values
///
/// Cuts on a character boundary and marks the cut with an ellipsis.
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_SNIPPET) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Create the output directory (and parents) if it does not exist yet
///
/// Failure is fatal for a run and surfaces as [`Error::OutputDir`].
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| Error::OutputDir {
        path: path.to_path_buf(),
        source,
    })
}
