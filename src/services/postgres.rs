use crate::models::{CandidateFilter, CandidateRecord, RecordId};
use crate::services::traits::{RecordStore, StoreError};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

/// PostgreSQL-backed registry store
///
/// Holds the connection pool for the lifetime of the process: opened once in
/// `main` and closed with [`PostgresStore::close`] on shutdown. Loading the
/// registry itself happens elsewhere; this client only reads the
/// `estabelecimentos` table.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store from a connection string
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a new store from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
    ) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            Duration::from_secs(acquire_timeout_secs.unwrap_or(5)),
        )
        .await
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    /// Select `(id, cep)` pairs with the given prefix, skipping placeholder codes
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        let query = r#"
            SELECT id::text AS id, cep
            FROM estabelecimentos
            WHERE cep LIKE $1 || '%'
              AND NOT (cep = ANY($2))
        "#;

        let rows = sqlx::query(query)
            .bind(escape_like(&filter.prefix))
            .bind(&filter.placeholders)
            .fetch_all(&self.pool)
            .await?;

        let candidates: Vec<CandidateRecord> = rows
            .iter()
            .map(|row| CandidateRecord {
                id: RecordId(row.get("id")),
                postal_code: row.get("cep"),
            })
            .collect();

        tracing::debug!(
            "Store returned {} candidates for prefix {:?}",
            candidates.len(),
            filter.prefix
        );

        Ok(candidates)
    }

    /// Health check for the database connection
    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

/// Escape LIKE wildcards so the prefix is matched literally
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
