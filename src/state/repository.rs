/// Repository layer: typed queries against the verification index.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// so builds never need a live database.
use sqlx::SqlitePool;

use super::models::{AnchorRecord, AnchorRecordRow};
use crate::crypto::Fingerprint;
use crate::error::Result;

/// Insert a record unless one already exists for its fingerprint.
/// Returns `true` when this call created the row.
pub async fn insert_anchor_record(pool: &SqlitePool, record: &AnchorRecord) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO anchor_records
        (fingerprint, content_id, transaction_id, submitter, block_number, submitted_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (fingerprint) DO NOTHING
        "#,
    )
    .bind(record.fingerprint.to_hex())
    .bind(record.content_id.as_str())
    .bind(record.transaction_id.as_str())
    .bind(&record.submitter)
    .bind(record.block_number.map(|b| b as i64))
    .bind(record.submitted_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_anchor_record(
    pool: &SqlitePool,
    fingerprint: &Fingerprint,
) -> Result<Option<AnchorRecord>> {
    let row = sqlx::query_as::<_, AnchorRecordRow>(
        "SELECT * FROM anchor_records WHERE fingerprint = ?",
    )
    .bind(fingerprint.to_hex())
    .fetch_optional(pool)
    .await?;

    row.map(AnchorRecord::try_from).transpose()
}

pub async fn list_recent_anchor_records(pool: &SqlitePool, limit: i64) -> Result<Vec<AnchorRecord>> {
    sqlx::query_as::<_, AnchorRecordRow>(
        "SELECT * FROM anchor_records ORDER BY submitted_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(AnchorRecord::try_from)
    .collect()
}

pub async fn count_anchor_records(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM anchor_records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
