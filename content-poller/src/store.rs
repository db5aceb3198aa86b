//! Deduplication store: the persistent, uniqueness-enforcing collection of
//! ingested content.
//!
//! `exists` is the normal dedup path. `insert` relies on the backend's own
//! uniqueness constraint and reports a violation as
//! [`IngestError::Duplicate`], so items that slip past `exists` (repeats
//! inside one batch, a second poller on the same database) are still caught.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{ContentItem, Identity};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::error::{IngestError, IngestResult};
use crate::schema::course_content;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read-only membership check.
    async fn exists(&self, identity: &Identity) -> IngestResult<bool>;

    /// Append a new item. Fails with `Duplicate` when the identity is taken.
    async fn insert(&self, item: &ContentItem, cycle_id: Uuid) -> IngestResult<()>;

    /// Number of stored items.
    async fn count(&self) -> IngestResult<i64>;

    /// Release backend resources at shutdown.
    async fn close(&self) {}
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Debug, Insertable)]
#[diesel(table_name = course_content)]
struct NewContentRow<'a> {
    content_id: &'a str,
    title: &'a str,
    description: Option<&'a str>,
    modified: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    course_id: Option<&'a str>,
    source_kind: &'a str,
    cycle_id: Uuid,
    ingested_at: DateTime<Utc>,
}

impl<'a> NewContentRow<'a> {
    fn new(item: &'a ContentItem, cycle_id: Uuid) -> Self {
        Self {
            content_id: item.identity.as_str(),
            title: &item.title,
            description: item.description.as_deref(),
            modified: item.modified,
            created: item.created,
            course_id: item.source_context.as_deref(),
            source_kind: item.kind.as_str(),
            cycle_id,
            ingested_at: Utc::now(),
        }
    }
}

/// Store backed by the `course_content` table.
#[derive(Clone)]
pub struct PgContentStore {
    pool: DbPool,
}

impl PgContentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open a pool and make sure the table and its unique constraint exist.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = db::establish_connection_pool(database_url)?;
        db::ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

async fn content_exists(conn: &mut AsyncPgConnection, identity: &str) -> QueryResult<bool> {
    use crate::schema::course_content::dsl::*;

    let matches: i64 = course_content
        .filter(content_id.eq(identity))
        .count()
        .get_result(conn)
        .await?;

    Ok(matches > 0)
}

async fn insert_content(conn: &mut AsyncPgConnection, row: &NewContentRow<'_>) -> QueryResult<usize> {
    diesel::insert_into(course_content::table)
        .values(row)
        .execute(conn)
        .await
}

async fn count_content(conn: &mut AsyncPgConnection) -> QueryResult<i64> {
    course_content::table.count().get_result(conn).await
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn exists(&self, identity: &Identity) -> IngestResult<bool> {
        let mut conn = self.pool.get().await?;
        Ok(content_exists(&mut conn, identity.as_str()).await?)
    }

    async fn insert(&self, item: &ContentItem, cycle_id: Uuid) -> IngestResult<()> {
        let mut conn = self.pool.get().await?;
        let row = NewContentRow::new(item, cycle_id);

        match insert_content(&mut conn, &row).await {
            Ok(_) => Ok(()),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(IngestError::Duplicate(item.identity.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self) -> IngestResult<i64> {
        let mut conn = self.pool.get().await?;
        Ok(count_content(&mut conn).await?)
    }

    async fn close(&self) {
        self.pool.close();
        tracing::info!("Database connection pool closed");
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// A stored item together with its ingestion metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub item: ContentItem,
    pub cycle_id: Uuid,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    identities: HashSet<Identity>,
    items: Vec<StoredContent>,
}

/// Process-local store with the same uniqueness rules as the database.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    state: Mutex<MemoryState>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> IngestResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))
    }

    /// Snapshot of stored items in insertion order.
    pub fn items(&self) -> Vec<StoredContent> {
        self.lock().map(|s| s.items.clone()).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn identities(&self) -> Vec<Identity> {
        self.items().into_iter().map(|s| s.item.identity).collect()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn exists(&self, identity: &Identity) -> IngestResult<bool> {
        Ok(self.lock()?.identities.contains(identity))
    }

    async fn insert(&self, item: &ContentItem, cycle_id: Uuid) -> IngestResult<()> {
        let mut state = self.lock()?;
        if !state.identities.insert(item.identity.clone()) {
            return Err(IngestError::Duplicate(item.identity.to_string()));
        }
        state.items.push(StoredContent {
            item: item.clone(),
            cycle_id,
            ingested_at: Utc::now(),
        });
        Ok(())
    }

    async fn count(&self) -> IngestResult<i64> {
        Ok(self.lock()?.items.len() as i64)
    }
}
