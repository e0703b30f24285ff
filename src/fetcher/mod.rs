//! Paginated retrieval of one work item
//!
//! A [`Fetcher`] belongs to exactly one producer. For every page it takes an
//! admission slot and a token from its own [`CredentialCache`], retries
//! transient failures, classifies the response and follows the next-page
//! link until none is left. All pages of a work item are assembled into a
//! single payload, so a work item yields at most one queue entry.

mod classify;
mod pagination;

pub use classify::{PageStatus, classify};
pub use pagination::{PageAssembler, next_link, resolve_link};

use crate::admission::AdmissionLimiter;
use crate::auth::CredentialCache;
use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::retry::fetch_with_retry;
use crate::stats::RunStats;
use crate::types::{FetchOutcome, WorkItem};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Build the shared HTTP client
pub fn build_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(config.source.request_timeout)
        .user_agent(concat!("liquidity-dl/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Producer-side retrieval of work items
pub struct Fetcher {
    client: reqwest::Client,
    config: Arc<Config>,
    admission: AdmissionLimiter,
    // Worker-local; the mutex is never contended
    credentials: Option<Mutex<CredentialCache>>,
    stats: Arc<RunStats>,
}

impl Fetcher {
    /// Create a fetcher; `credentials` is `None` when authentication is disabled
    pub fn new(
        client: reqwest::Client,
        config: Arc<Config>,
        admission: AdmissionLimiter,
        credentials: Option<CredentialCache>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            client,
            config,
            admission,
            credentials: credentials.map(Mutex::new),
            stats,
        }
    }

    /// First-page URL of a work item
    pub fn request_url(&self, item: &WorkItem) -> Result<String> {
        let source = &self.config.source;
        let mut date = String::new();
        write!(date, "{}", item.business_day.format(&source.date_format)).map_err(|_| {
            FetchError::InvalidUrl(format!("invalid date format '{}'", source.date_format))
        })?;
        let endpoint = source
            .endpoint
            .replace("{identifier}", &urlencoding::encode(&item.identifier))
            .replace("{date}", &urlencoding::encode(&date));
        let candidate = format!(
            "{}/{}",
            source.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        url::Url::parse(&candidate)
            .map(|u| u.to_string())
            .map_err(|e| FetchError::InvalidUrl(format!("{candidate}: {e}")).into())
    }

    /// Retrieve every page of `item`
    ///
    /// `Ok(Skipped)` for classified "no data" answers on the first page,
    /// `Ok(Payload)` with the assembled document otherwise. Errors are
    /// failures to record.
    pub async fn fetch(&self, item: &WorkItem) -> Result<FetchOutcome> {
        let max_pages = self.config.source.max_pages;
        let mut url = self.request_url(item)?;
        let mut visited = HashSet::from([url.clone()]);
        let mut pages = PageAssembler::new();

        loop {
            let page_url = url.clone();
            let status = fetch_with_retry(&self.config.retry, || self.get_page(&page_url)).await?;

            let body = match status {
                PageStatus::Data(body) => body,
                PageStatus::Skip(reason) if pages.is_empty() => {
                    return Ok(FetchOutcome::Skipped(reason));
                }
                PageStatus::Skip(reason) => {
                    tracing::debug!(
                        identifier = %item.identifier,
                        business_day = %item.business_day,
                        code = %reason,
                        page = pages.len() + 1,
                        "later page has no data, ending pagination"
                    );
                    break;
                }
                // get_page turns failures into errors
                PageStatus::Failed(e) => return Err(e.into()),
            };
            self.stats.record_page();
            tracing::trace!(
                identifier = %item.identifier,
                url = %page_url,
                bytes = body.len(),
                "page received"
            );

            let parsed = serde_json::from_str::<Value>(&body).ok();
            let next = match parsed.as_ref().and_then(next_link) {
                Some(href) => Some(resolve_link(&self.config.source.base_url, href)?),
                None => None,
            };
            pages.push(body, parsed);

            match next {
                None => break,
                Some(next) if !visited.insert(next.clone()) => {
                    tracing::warn!(
                        identifier = %item.identifier,
                        business_day = %item.business_day,
                        url = %next,
                        "next-page link repeats an earlier page, ending pagination"
                    );
                    break;
                }
                Some(_) if pages.len() >= max_pages => {
                    return Err(FetchError::TooManyPages { limit: max_pages }.into());
                }
                Some(next) => url = next,
            }
        }

        Ok(FetchOutcome::Payload(pages.finish()?))
    }

    /// One GET inside an admission slot; failure statuses become errors so
    /// the retry policy can see them
    async fn get_page(&self, url: &str) -> Result<PageStatus> {
        self.admission
            .run(|| async {
                let mut request = self.client.get(url).header(ACCEPT, "application/json");
                if let Some(cache) = &self.credentials {
                    let token = cache.lock().await.get().await?;
                    request = request.bearer_auth(token);
                }
                if let Some(key) = &self.config.source.api_key {
                    request = request.header(self.config.source.api_key_header.as_str(), key);
                }

                let response = request.send().await?;
                let status = response.status().as_u16();
                let body = response.text().await?;

                match classify(status, body) {
                    PageStatus::Failed(e) => Err(Error::Fetch(e)),
                    other => Ok(other),
                }
            })
            .await
    }
}
