/// Verification index.
///
/// Maps a content fingerprint to the record of its anchor. Lookups never
/// touch the content store or the ledger. Writes are create-only and atomic
/// per fingerprint, so a concurrent reader sees either no record or the
/// whole record.
///
/// Backends:
/// - SQLite through sqlx (`Database`)
/// - In-memory map (`MemoryIndex`) for tests and throwaway runs
pub mod memory;
pub mod models;
pub mod repository;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::crypto::Fingerprint;
use crate::error::{AnchorError, Result};

pub use memory::MemoryIndex;
pub use models::AnchorRecord;

/// Persistent fingerprint → record mapping.
#[async_trait]
pub trait VerificationIndex: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AnchorRecord>>;

    /// Store a record if none exists for its fingerprint. Returns `false`
    /// (and leaves the existing record untouched) otherwise.
    async fn put(&self, record: &AnchorRecord) -> Result<bool>;

    /// Most recent records first.
    async fn recent(&self, limit: usize) -> Result<Vec<AnchorRecord>>;

    async fn count(&self) -> Result<u64>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the SQLite database at `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AnchorError::Config(format!("Invalid database url {url:?}: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30))
            .pragma("journal_mode", "WAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(url = %url, "Connected to verification index");
        Ok(Self { pool })
    }

    /// In-memory database. A single connection keeps every query on the
    /// same memory database.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AnchorError::Index(format!("Migration failed: {e}")))
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VerificationIndex for Database {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AnchorRecord>> {
        repository::get_anchor_record(&self.pool, fingerprint).await
    }

    async fn put(&self, record: &AnchorRecord) -> Result<bool> {
        repository::insert_anchor_record(&self.pool, record).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AnchorRecord>> {
        repository::list_recent_anchor_records(&self.pool, limit as i64).await
    }

    async fn count(&self) -> Result<u64> {
        Ok(repository::count_anchor_records(&self.pool).await? as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::anchor::TransactionId;
    use crate::crypto::digest;
    use crate::storage::ContentId;
    use chrono::{TimeZone, Utc};

    pub(crate) fn sample_record(content: &[u8], tx: &str) -> AnchorRecord {
        AnchorRecord {
            fingerprint: digest(content),
            content_id: ContentId::new(format!("bafy-{tx}")),
            transaction_id: TransactionId::new(tx),
            submitter: "0x00000000000000000000000000000000000000aa".into(),
            block_number: Some(7),
            submitted_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let db = Database::in_memory().await.unwrap();
        let record = sample_record(b"ABC", "0x01");

        assert!(db.put(&record).await.unwrap());
        assert_eq!(db.get(&record.fingerprint).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_put_is_create_only() {
        let db = Database::in_memory().await.unwrap();
        let first = sample_record(b"ABC", "0x01");
        let second = sample_record(b"ABC", "0x02");

        assert!(db.put(&first).await.unwrap());
        assert!(!db.put(&second).await.unwrap());

        let stored = db.get(&first.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.transaction_id, TransactionId::new("0x01"));
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.get(&digest(b"never")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let mut older = sample_record(b"one", "0x01");
        older.submitted_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = sample_record(b"two", "0x02");
        db.put(&older).await.unwrap();
        db.put(&newer).await.unwrap();

        let recent = db.recent(10).await.unwrap();
        assert_eq!(recent, vec![newer, older]);
        assert_eq!(db.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("index.db").display());
        let record = sample_record(b"persist me", "0x0a");

        {
            let db = Database::connect(&url, 2).await.unwrap();
            db.migrate().await.unwrap();
            db.put(&record).await.unwrap();
            db.pool().close().await;
        }

        let db = Database::connect(&url, 2).await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.get(&record.fingerprint).await.unwrap(), Some(record));
    }
}
