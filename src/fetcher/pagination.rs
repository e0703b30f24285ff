//! Next-page discovery and multi-page assembly

use crate::error::{FetchError, TransformError};
use serde_json::Value;

/// First `href` string found depth-first under the page's top-level `links`
pub fn next_link(page: &Value) -> Option<&str> {
    page.get("links").and_then(find_href)
}

fn find_href(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(href)) = map.get("href")
                && !href.trim().is_empty()
            {
                return Some(href.trim());
            }
            map.values().find_map(find_href)
        }
        Value::Array(items) => items.iter().find_map(find_href),
        _ => None,
    }
}

/// Absolute URL of a next-page link
///
/// Absolute links are used as-is; anything else is appended to `base_url`.
pub fn resolve_link(base_url: &str, href: &str) -> Result<String, FetchError> {
    let candidate = if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    };
    url::Url::parse(&candidate)
        .map(|u| u.to_string())
        .map_err(|e| FetchError::InvalidUrl(format!("{candidate}: {e}")))
}

/// Collects the pages of one work item into a single payload
#[derive(Debug, Default)]
pub struct PageAssembler {
    pages: Vec<(String, Option<Value>)>,
}

impl PageAssembler {
    /// Empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page; `parsed` is `None` when the body is not valid JSON
    pub fn push(&mut self, body: String, parsed: Option<Value>) {
        self.pages.push((body, parsed));
    }

    /// Pages collected so far
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True before the first page
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// One payload: the raw body of a single page, or a JSON array holding
    /// every record of every page
    pub fn finish(mut self) -> Result<String, TransformError> {
        if self.pages.len() == 1 {
            if let Some((body, _)) = self.pages.pop() {
                return Ok(body);
            }
        }

        let mut records = Vec::new();
        for (body, parsed) in self.pages {
            match parsed {
                Some(Value::Array(items)) => records.extend(items),
                Some(other) => records.push(other),
                None => {
                    // Re-parse to surface the original JSON error
                    serde_json::from_str::<Value>(&body)?;
                }
            }
        }
        Ok(serde_json::to_string(&Value::Array(records))?)
    }
}
