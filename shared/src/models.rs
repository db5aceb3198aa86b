use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::identity::Identity;

/// Kind of external source a content item was ingested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    Scrape,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Api => "api",
            SourceKind::Scrape => "scrape",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content as returned by a source adapter, before an identity is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub kind: SourceKind,
    /// Stable identifier supplied by the source system, when it has one.
    pub native_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    /// Course, site or collection the record belongs to.
    pub source_context: Option<String>,
}

impl SourceRecord {
    pub fn api(native_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Api,
            native_id: Some(native_id.into()),
            title: title.into(),
            description: None,
            modified: None,
            created: None,
            source_context: None,
        }
    }

    pub fn scraped(title: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            kind: SourceKind::Scrape,
            native_id: None,
            title: title.into(),
            description: None,
            modified: Some(modified),
            created: None,
            source_context: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.source_context = Some(context.into());
        self
    }
}

/// A content item ready to be persisted in the dedup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ContentItem {
    pub identity: Identity,

    #[validate(length(min = 1, max = 500))]
    pub title: String,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub source_context: Option<String>,
    pub kind: SourceKind,
}

/// A record that cannot become a content item.
#[derive(Debug, Error)]
pub enum InvalidItem {
    #[error("content item failed validation: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("api content item '{0}' has no source context")]
    MissingContext(String),
}

impl ContentItem {
    /// Build a validated item from a fetched record and its derived identity.
    pub fn from_record(record: SourceRecord, identity: Identity) -> Result<Self, InvalidItem> {
        let item = ContentItem {
            identity,
            title: record.title.trim().to_string(),
            description: record
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            modified: record.modified,
            created: record.created,
            source_context: record.source_context,
            kind: record.kind,
        };

        item.validate()?;

        if item.kind == SourceKind::Api && item.source_context.is_none() {
            return Err(InvalidItem::MissingContext(item.identity.to_string()));
        }

        Ok(item)
    }
}
