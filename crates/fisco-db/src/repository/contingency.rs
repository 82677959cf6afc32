//! # Contingency Repository
//!
//! Database operations for offline sale records.
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Contingency Record Lifecycle                           │
//! │                                                                         │
//! │  authority unreachable                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  insert() ──► sync_status: pending, attempts: 0                        │
//! │       │                                                                 │
//! │       │  reconciliation pass picks it up (oldest first)                │
//! │       ▼                                                                 │
//! │  begin_attempt() ──► attempts += 1  (BEFORE the online re-emission,    │
//! │       │              so a crash mid-sync can't grant free retries)     │
//! │       ▼                                                                 │
//! │  ┌─ online re-emission succeeds ──► mark_synced(document_id)           │
//! │  │                                                                     │
//! │  └─ fails ──► record_failure(error)                                    │
//! │                 │                                                       │
//! │                 ├── attempts < max  → stays pending, retried later     │
//! │                 └── attempts ≥ max  → sync_status: error               │
//! │                                        (operator review; NEVER deleted)│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use fisco_core::{ContingencyRecord, ContingencyStatistics, SyncStatus};

/// Aggregate row shape for [`ContingencyRepository::statistics`].
#[derive(sqlx::FromRow)]
struct StatisticsRow {
    total: i64,
    pending: Option<i64>,
    synced: Option<i64>,
    failed: Option<i64>,
    oldest_pending_at: Option<DateTime<Utc>>,
}

/// Repository for contingency records.
#[derive(Debug, Clone)]
pub struct ContingencyRepository {
    pool: SqlitePool,
}

impl ContingencyRepository {
    /// Creates a new ContingencyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ContingencyRepository { pool }
    }

    /// Inserts a contingency record.
    pub async fn insert(&self, record: &ContingencyRecord) -> DbResult<()> {
        debug!(
            id = %record.id,
            offline_number = record.offline_number,
            "Inserting contingency record"
        );

        sqlx::query(
            r#"
            INSERT INTO contingency_records (
                id, establishment_id, offline_number, offline_key, payload,
                sync_status, attempts, last_error, document_id,
                created_at, synced_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11
            )
            "#,
        )
        .bind(&record.id)
        .bind(&record.establishment_id)
        .bind(record.offline_number)
        .bind(&record.offline_key)
        .bind(&record.payload)
        .bind(record.sync_status)
        .bind(record.attempts)
        .bind(&record.last_error)
        .bind(&record.document_id)
        .bind(record.created_at)
        .bind(record.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a record by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ContingencyRecord>> {
        let record = sqlx::query_as::<_, ContingencyRecord>(
            r#"
            SELECT
                id, establishment_id, offline_number, offline_key, payload,
                sync_status, attempts, last_error, document_id,
                created_at, synced_at
            FROM contingency_records
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Lists pending records for an establishment, oldest first.
    ///
    /// Oldest-first matters: reconciled documents get fresh online
    /// numbers, and replaying in arrival order keeps the official
    /// sequence close to the real sale order.
    pub async fn list_pending(
        &self,
        establishment_id: &str,
        limit: i64,
    ) -> DbResult<Vec<ContingencyRecord>> {
        let records = sqlx::query_as::<_, ContingencyRecord>(
            r#"
            SELECT
                id, establishment_id, offline_number, offline_key, payload,
                sync_status, attempts, last_error, document_id,
                created_at, synced_at
            FROM contingency_records
            WHERE establishment_id = ?1 AND sync_status = 'pending'
            ORDER BY offline_number
            LIMIT ?2
            "#,
        )
        .bind(establishment_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Lists records in a given sync status, oldest first.
    pub async fn list_by_status(
        &self,
        establishment_id: &str,
        status: SyncStatus,
        limit: i64,
    ) -> DbResult<Vec<ContingencyRecord>> {
        let records = sqlx::query_as::<_, ContingencyRecord>(
            r#"
            SELECT
                id, establishment_id, offline_number, offline_key, payload,
                sync_status, attempts, last_error, document_id,
                created_at, synced_at
            FROM contingency_records
            WHERE establishment_id = ?1 AND sync_status = ?2
            ORDER BY offline_number
            LIMIT ?3
            "#,
        )
        .bind(establishment_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Consumes one reconciliation attempt, returning the new count.
    ///
    /// ## Why Before the Re-Emission
    /// The increment lands before any network traffic. If the process
    /// dies mid-sync the attempt stays spent, keeping the at-most-N
    /// bound honest across restarts.
    pub async fn begin_attempt(&self, id: &str) -> DbResult<i64> {
        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE contingency_records
            SET attempts = attempts + 1
            WHERE id = ?1 AND sync_status = 'pending'
            RETURNING attempts
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| DbError::not_found("Contingency record (pending)", id))
    }

    /// Marks a record as reconciled, linking the document it produced.
    pub async fn mark_synced(
        &self,
        id: &str,
        document_id: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE contingency_records SET
                sync_status = 'synced',
                document_id = ?2,
                synced_at = ?3,
                last_error = NULL
            WHERE id = ?1 AND sync_status = 'pending'
            "#,
        )
        .bind(id)
        .bind(document_id)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Contingency record (pending)", id));
        }

        Ok(())
    }

    /// Records a failed reconciliation attempt.
    ///
    /// Stores the error; once the attempt budget is spent the record
    /// flips to `error` and leaves the retry rotation. The row itself
    /// is never deleted.
    pub async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: i64,
    ) -> DbResult<SyncStatus> {
        let status: Option<SyncStatus> = sqlx::query_scalar(
            r#"
            UPDATE contingency_records SET
                last_error = ?2,
                sync_status = CASE WHEN attempts >= ?3 THEN 'error' ELSE 'pending' END
            WHERE id = ?1 AND sync_status = 'pending'
            RETURNING sync_status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        status.ok_or_else(|| DbError::not_found("Contingency record (pending)", id))
    }

    /// Aggregate contingency health for one establishment.
    pub async fn statistics(&self, establishment_id: &str) -> DbResult<ContingencyStatistics> {
        let row = sqlx::query_as::<_, StatisticsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN sync_status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN sync_status = 'synced' THEN 1 ELSE 0 END) AS synced,
                SUM(CASE WHEN sync_status = 'error' THEN 1 ELSE 0 END) AS failed,
                MIN(CASE WHEN sync_status = 'pending' THEN created_at END) AS oldest_pending_at
            FROM contingency_records
            WHERE establishment_id = ?1
            "#,
        )
        .bind(establishment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ContingencyStatistics {
            establishment_id: establishment_id.to_string(),
            pending: row.pending.unwrap_or(0),
            synced: row.synced.unwrap_or(0),
            failed: row.failed.unwrap_or(0),
            total: row.total,
            oldest_pending_at: row.oldest_pending_at,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::establishment::tests::sample_establishment;
    use fisco_core::access_key::{AccessKey, KeyFields};
    use fisco_core::EmissionType;

    const MAX_ATTEMPTS: i64 = 3;

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.establishments()
            .insert(&sample_establishment("est-1", "12345678000195"))
            .await
            .unwrap();
        db
    }

    fn sample_record(id: &str, offline_number: i64) -> ContingencyRecord {
        let key = AccessKey::build(&KeyFields {
            state_code: 35,
            year: 2026,
            month: 8,
            tax_id: "12345678000195".to_string(),
            series: 900,
            number: offline_number,
            emission_type: EmissionType::Contingency,
            random_code: 20_000_000 + offline_number,
        })
        .unwrap();

        ContingencyRecord {
            id: id.to_string(),
            establishment_id: "est-1".to_string(),
            offline_number,
            offline_key: key.into_string(),
            payload: r#"{"establishment_id":"est-1","items":[],"customer":null,"payment":null}"#
                .to_string(),
            sync_status: SyncStatus::Pending,
            attempts: 0,
            last_error: None,
            document_id: None,
            created_at: Utc::now(),
            synced_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_list_pending() {
        let db = test_db().await;
        let repo = db.contingency();

        repo.insert(&sample_record("rec-2", 2)).await.unwrap();
        repo.insert(&sample_record("rec-1", 1)).await.unwrap();

        let pending = repo.list_pending("est-1", 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        // Oldest (lowest offline number) first
        assert_eq!(pending[0].offline_number, 1);
        assert_eq!(pending[1].offline_number, 2);
    }

    #[tokio::test]
    async fn test_duplicate_offline_number_refused() {
        let db = test_db().await;
        let repo = db.contingency();

        repo.insert(&sample_record("rec-1", 1)).await.unwrap();

        let mut dup = sample_record("rec-2", 1);
        dup.offline_key = sample_record("rec-x", 99).offline_key;
        let err = repo.insert(&dup).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_attempt_then_sync() {
        let db = test_db().await;
        let repo = db.contingency();

        repo.insert(&sample_record("rec-1", 1)).await.unwrap();

        assert_eq!(repo.begin_attempt("rec-1").await.unwrap(), 1);
        repo.mark_synced("rec-1", "doc-42", Utc::now()).await.unwrap();

        let record = repo.get_by_id("rec-1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.document_id.as_deref(), Some("doc-42"));
        assert_eq!(record.attempts, 1);
        assert!(record.synced_at.is_some());

        // Synced records leave the rotation entirely
        assert!(repo.list_pending("est-1", 10).await.unwrap().is_empty());
        let err = repo.begin_attempt("rec-1").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_failure_budget_flips_to_error() {
        let db = test_db().await;
        let repo = db.contingency();

        repo.insert(&sample_record("rec-1", 1)).await.unwrap();

        // Attempts 1 and 2 fail but stay pending
        for expected in 1..MAX_ATTEMPTS {
            assert_eq!(repo.begin_attempt("rec-1").await.unwrap(), expected);
            let status = repo
                .record_failure("rec-1", "connection refused", MAX_ATTEMPTS)
                .await
                .unwrap();
            assert_eq!(status, SyncStatus::Pending);
        }

        // Attempt 3 exhausts the budget
        assert_eq!(repo.begin_attempt("rec-1").await.unwrap(), MAX_ATTEMPTS);
        let status = repo
            .record_failure("rec-1", "connection refused", MAX_ATTEMPTS)
            .await
            .unwrap();
        assert_eq!(status, SyncStatus::Error);

        let record = repo.get_by_id("rec-1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Error);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.last_error.as_deref(), Some("connection refused"));

        // Failed records persist for review, outside the pending rotation
        assert!(repo.list_pending("est-1", 10).await.unwrap().is_empty());
        let failed = repo
            .list_by_status("est-1", SyncStatus::Error, 10)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        let db = test_db().await;
        let repo = db.contingency();

        let stats = repo.statistics("est-1").await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.pending, 0);
        assert!(stats.oldest_pending_at.is_none());

        repo.insert(&sample_record("rec-1", 1)).await.unwrap();
        repo.insert(&sample_record("rec-2", 2)).await.unwrap();
        repo.insert(&sample_record("rec-3", 3)).await.unwrap();

        repo.begin_attempt("rec-2").await.unwrap();
        repo.mark_synced("rec-2", "doc-1", Utc::now()).await.unwrap();

        for _ in 0..MAX_ATTEMPTS {
            repo.begin_attempt("rec-3").await.unwrap();
            repo.record_failure("rec-3", "timeout", MAX_ATTEMPTS)
                .await
                .unwrap();
        }

        let stats = repo.statistics("est-1").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.failed, 1);
        let record = repo.get_by_id("rec-1").await.unwrap().unwrap();
        assert_eq!(stats.oldest_pending_at, Some(record.created_at));
    }
}
