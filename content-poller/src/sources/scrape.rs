//! Scraped HTML source: a cookie session established by a form login, then a
//! content page parsed into blocks.
//!
//! Whether the login worked is decided by looking for a marker string in the
//! login response. That is a heuristic; when the marker is absent (or none is
//! configured) the login counts as failed.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use shared::{SourceKind, SourceRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{build_http_client, FetchBatch, SourceAdapter};
use crate::config::{ScrapeSelectors, ScrapeSourceConfig};
use crate::error::{IngestError, IngestResult, ParseGap};

/// Compiled form of [`ScrapeSelectors`].
pub struct BlockSelectors {
    block: Selector,
    title: Selector,
    description: Selector,
    modified: Selector,
}

impl BlockSelectors {
    pub fn compile(selectors: &ScrapeSelectors) -> IngestResult<Self> {
        fn parse(css: &str) -> IngestResult<Selector> {
            Selector::parse(css)
                .map_err(|e| IngestError::Config(format!("invalid selector '{}': {:?}", css, e)))
        }

        Ok(Self {
            block: parse(&selectors.block)?,
            title: parse(&selectors.title)?,
            description: parse(&selectors.description)?,
            modified: parse(&selectors.modified)?,
        })
    }
}

/// Collapse an element's text nodes into a single trimmed line.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accepts RFC 3339, or a naive date/datetime taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse a content page into records, dropping blocks that lack a title or a
/// usable modification time.
pub fn parse_content_page(html: &str, selectors: &BlockSelectors, context: &str) -> FetchBatch {
    let document = Html::parse_document(html);
    let mut batch = FetchBatch::default();

    for (block_index, block) in document.select(&selectors.block).enumerate() {
        let title = block
            .select(&selectors.title)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
        let Some(title) = title else {
            batch.parse_gaps.push(ParseGap {
                block_index,
                missing: "title",
            });
            continue;
        };

        let modified = block
            .select(&selectors.modified)
            .next()
            .and_then(|el| el.value().attr("datetime"))
            .and_then(parse_timestamp);
        let Some(modified) = modified else {
            batch.parse_gaps.push(ParseGap {
                block_index,
                missing: "modified time",
            });
            continue;
        };

        let description = block
            .select(&selectors.description)
            .next()
            .map(element_text)
            .filter(|d| !d.is_empty());

        batch.records.push(SourceRecord {
            kind: SourceKind::Scrape,
            native_id: None,
            title,
            description,
            modified: Some(modified),
            created: None,
            source_context: Some(context.to_string()),
        });
    }

    batch
}

pub fn login_succeeded(body: &str, marker: &str) -> bool {
    !marker.is_empty() && body.contains(marker)
}

/// A content page with no blocks at all and no signed-in marker is taken to
/// be the login form served in place of an expired session.
fn looks_signed_out(html: &str, batch: &FetchBatch, marker: &str) -> bool {
    batch.records.is_empty() && batch.parse_gaps.is_empty() && !login_succeeded(html, marker)
}

pub struct ScrapeAdapter {
    client: Client,
    config: ScrapeSourceConfig,
    selectors: BlockSelectors,
    logged_in: AtomicBool,
}

impl ScrapeAdapter {
    pub fn new(config: ScrapeSourceConfig, timeout: Duration) -> IngestResult<Self> {
        Ok(Self {
            client: build_http_client(timeout, true)?,
            selectors: BlockSelectors::compile(&config.selectors)?,
            config,
            logged_in: AtomicBool::new(false),
        })
    }

    async fn login(&self) -> IngestResult<()> {
        let response = self
            .client
            .post(&self.config.login_url)
            .form(&[
                ("user_id", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
                ("login", "Login"),
            ])
            .send()
            .await
            .map_err(|e| IngestError::auth(format!("login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::auth(format!("login endpoint returned {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::auth(format!("failed to read login response: {}", e)))?;

        if !login_succeeded(&body, &self.config.success_marker) {
            return Err(IngestError::auth(
                "login response did not contain the success marker",
            ));
        }

        tracing::info!(login_url = %self.config.login_url, "Logged in to content site");
        Ok(())
    }

    async fn ensure_session(&self) -> IngestResult<()> {
        if self.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }
        self.login().await?;
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    async fn fetch_page(&self) -> IngestResult<String> {
        let response = self
            .client
            .get(&self.config.content_url)
            .send()
            .await
            .map_err(|e| IngestError::fetch(format!("content page request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // session expired; log in again next cycle
            self.logged_in.store(false, Ordering::Release);
            return Err(IngestError::fetch(format!(
                "content page returned {}, session dropped",
                status
            )));
        }
        if !status.is_success() {
            return Err(IngestError::fetch(format!(
                "content page returned {}",
                status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| IngestError::fetch(format!("failed to read content page: {}", e)))
    }
}

#[async_trait]
impl SourceAdapter for ScrapeAdapter {
    fn name(&self) -> &'static str {
        "scrape"
    }

    async fn fetch(&self) -> IngestResult<FetchBatch> {
        self.ensure_session().await?;
        let html = self.fetch_page().await?;
        let batch = parse_content_page(&html, &self.selectors, &self.config.content_url);

        if looks_signed_out(&html, &batch, &self.config.success_marker) {
            self.logged_in.store(false, Ordering::Release);
            return Err(IngestError::fetch(
                "content page has no content blocks and no signed-in marker, session dropped",
            ));
        }

        tracing::debug!(
            records = batch.records.len(),
            gaps = batch.parse_gaps.len(),
            "Parsed content page"
        );
        Ok(batch)
    }
}
