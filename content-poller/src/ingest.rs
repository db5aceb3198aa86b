//! One poll → diff → insert cycle.

use shared::{derive_identity, ContentItem};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::sources::SourceAdapter;
use crate::store::ContentStore;

/// Outcome counts for one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub fetched: usize,
    pub inserted: usize,
    /// Found by the `exists` check
    pub already_present: usize,
    /// Rejected by the store's uniqueness constraint
    pub duplicates: usize,
    /// Records without a usable identity or failing validation
    pub invalid: usize,
    pub parse_gaps: usize,
    /// Store errors other than duplicates
    pub failed: usize,
    pub duration: Duration,
}

impl CycleReport {
    fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            fetched: 0,
            inserted: 0,
            already_present: 0,
            duplicates: 0,
            invalid: 0,
            parse_gaps: 0,
            failed: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(&self) -> usize {
        self.already_present + self.duplicates + self.invalid
    }
}

enum ItemOutcome {
    Inserted,
    AlreadyPresent,
    DuplicateRace,
    Failed(IngestError),
}

pub struct IngestionCycle {
    source: Box<dyn SourceAdapter>,
    store: Arc<dyn ContentStore>,
}

impl IngestionCycle {
    pub fn new(source: Box<dyn SourceAdapter>, store: Arc<dyn ContentStore>) -> Self {
        Self { source, store }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Run a single cycle.
    ///
    /// Returns `Err` only when the fetch itself fails, in which case nothing
    /// has been written. Per-item problems are counted in the report.
    pub async fn run_cycle(&self) -> IngestResult<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", %cycle_id);
        self.run_cycle_in_span(cycle_id).instrument(span).await
    }

    async fn run_cycle_in_span(&self, cycle_id: Uuid) -> IngestResult<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::new(cycle_id);

        tracing::info!(source = self.source.name(), "Checking for course content updates");

        let batch = match self.source.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(
                    source = self.source.name(),
                    error = %e,
                    "Fetch failed, cycle aborted with no writes"
                );
                return Err(e);
            }
        };

        report.fetched = batch.records.len();
        report.parse_gaps = batch.parse_gaps.len();
        for gap in &batch.parse_gaps {
            tracing::warn!(%gap, "Dropped content block");
        }

        for record in batch.records {
            let identity = match derive_identity(&record) {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping record without identity");
                    report.invalid += 1;
                    continue;
                }
            };

            let item = match ContentItem::from_record(record, identity) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid record");
                    report.invalid += 1;
                    continue;
                }
            };

            match self.ingest_item(&item, report.cycle_id).await {
                ItemOutcome::Inserted => {
                    tracing::info!(identity = %item.identity, title = %item.title, "Added new content");
                    report.inserted += 1;
                }
                ItemOutcome::AlreadyPresent => {
                    tracing::debug!(identity = %item.identity, title = %item.title, "Content already exists");
                    report.already_present += 1;
                }
                ItemOutcome::DuplicateRace => {
                    tracing::warn!(
                        identity = %item.identity,
                        title = %item.title,
                        "Duplicate content rejected by store"
                    );
                    report.duplicates += 1;
                }
                ItemOutcome::Failed(e) => {
                    tracing::error!(identity = %item.identity, error = %e, "Failed to store content");
                    report.failed += 1;
                }
            }
        }

        report.duration = started.elapsed();
        tracing::info!(
            fetched = report.fetched,
            inserted = report.inserted,
            skipped = report.skipped(),
            parse_gaps = report.parse_gaps,
            failed = report.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Ingestion cycle complete"
        );

        Ok(report)
    }

    async fn ingest_item(&self, item: &ContentItem, cycle_id: Uuid) -> ItemOutcome {
        match self.store.exists(&item.identity).await {
            Ok(true) => return ItemOutcome::AlreadyPresent,
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed(e),
        }

        match self.store.insert(item, cycle_id).await {
            Ok(()) => ItemOutcome::Inserted,
            Err(IngestError::Duplicate(_)) => ItemOutcome::DuplicateRace,
            Err(e) => ItemOutcome::Failed(e),
        }
    }
}
