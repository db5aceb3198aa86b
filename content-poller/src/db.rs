use anyhow::{Context, Result};
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection, RunQueryDsl,
};

pub type DbPool = Pool<AsyncPgConnection>;

const CREATE_COURSE_CONTENT: &str =
    include_str!("../migrations/2024-11-20-000000_create_course_content/up.sql");

pub fn establish_connection_pool(database_url: &str) -> Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(config)
        .max_size(4)
        .build()
        .context("Failed to create database pool")?;

    Ok(pool)
}

/// Create the content table and its unique constraint if they are missing.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().await.context("Failed to get DB connection")?;
    create_course_content(&mut conn)
        .await
        .context("Failed to create course_content table")?;

    tracing::info!("course_content table ready (unique on content_id)");
    Ok(())
}

async fn create_course_content(conn: &mut AsyncPgConnection) -> diesel::QueryResult<usize> {
    diesel::sql_query(CREATE_COURSE_CONTENT).execute(conn).await
}
