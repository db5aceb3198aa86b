//! Source adapters: pluggable producers of fetched content records.

pub mod api;
pub mod scrape;

use async_trait::async_trait;
use shared::SourceRecord;
use std::time::Duration;

use crate::config::{PollingConfig, SourceConfig};
use crate::error::{IngestError, IngestResult, ParseGap};

pub use api::ApiAdapter;
pub use scrape::ScrapeAdapter;

/// Snapshot returned by one `fetch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchBatch {
    pub records: Vec<SourceRecord>,
    /// Blocks dropped while parsing (scraped sources only)
    pub parse_gaps: Vec<ParseGap>,
}

impl FetchBatch {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records,
            parse_gaps: Vec::new(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Retrieve the current content snapshot from the source.
    async fn fetch(&self) -> IngestResult<FetchBatch>;
}

pub(crate) fn build_http_client(timeout: Duration, cookies: bool) -> IngestResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .cookie_store(cookies)
        .user_agent(concat!("content-poller/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Build the adapter selected by the configuration.
pub fn from_config(config: &PollingConfig) -> IngestResult<Box<dyn SourceAdapter>> {
    let timeout = config.http_timeout();
    match &config.source {
        SourceConfig::Api(api) => Ok(Box::new(ApiAdapter::new(api.clone(), timeout)?)),
        SourceConfig::Scrape(scrape) => Ok(Box::new(ScrapeAdapter::new(scrape.clone(), timeout)?)),
    }
}
