//! # Counter Repository
//!
//! Atomic number allocation for fiscal documents.
//!
//! ## Why This Is Race-Free
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              Two Terminals Emitting at the Same Instant                 │
//! │                                                                         │
//! │  Terminal A                          Terminal B                         │
//! │      │                                   │                              │
//! │      │ UPDATE series_counters            │                              │
//! │      │ SET next_number = next_number + 1 │                              │
//! │      │ RETURNING next_number - 1         │                              │
//! │      │         │                         │                              │
//! │      │         ▼                         │ (waits: SQLite serializes    │
//! │      │   gets 42                         │  writers)                    │
//! │      │                                   │ UPDATE ... RETURNING ...     │
//! │      │                                   │         │                    │
//! │      │                                   │         ▼                    │
//! │      │                                   │   gets 43                    │
//! │                                                                         │
//! │  The read-increment-write happens inside ONE statement, so there is    │
//! │  no window where both terminals observe the same value. SELECT-then-   │
//! │  UPDATE would have exactly that window.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Counter Families
//! - `series_counters`: one row per (establishment, series). Online
//!   emission and reconciliation allocate from here.
//! - `offline_counters`: one row per establishment. Orders contingency
//!   sales while the authority is unreachable; independent from every
//!   series so an outage never disturbs online numbering.
//!
//! Counters only move forward. A number handed out is consumed even when
//! the document it was minted for ends up rejected - gaps are legal,
//! duplicates are not.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use fisco_core::MAX_DOCUMENT_NUMBER;

/// Repository for numbering counters.
#[derive(Debug, Clone)]
pub struct CounterRepository {
    pool: SqlitePool,
}

impl CounterRepository {
    /// Creates a new CounterRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CounterRepository { pool }
    }

    /// Allocates the next document number for an online series.
    ///
    /// ## What This Does
    /// 1. Seeds the counter row at 1 on first use (INSERT OR IGNORE)
    /// 2. Increments and returns in a single UPDATE ... RETURNING
    /// 3. Refuses numbers beyond the 9-digit key field
    ///
    /// ## Returns
    /// The allocated number, starting at 1 for a fresh series.
    pub async fn allocate_number(&self, establishment_id: &str, series: i64) -> DbResult<i64> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO series_counters (establishment_id, series, next_number, updated_at)
            VALUES (?1, ?2, 1, ?3)
            "#,
        )
        .bind(establishment_id)
        .bind(series)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let number: i64 = sqlx::query_scalar(
            r#"
            UPDATE series_counters
            SET next_number = next_number + 1, updated_at = ?3
            WHERE establishment_id = ?1 AND series = ?2
            RETURNING next_number - 1
            "#,
        )
        .bind(establishment_id)
        .bind(series)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        if number > MAX_DOCUMENT_NUMBER {
            return Err(DbError::SeriesExhausted {
                establishment_id: establishment_id.to_string(),
                series,
            });
        }

        debug!(establishment_id, series, number, "Allocated document number");
        Ok(number)
    }

    /// Returns the number the next allocation would hand out, without
    /// consuming it.
    ///
    /// ## Usage
    /// Diagnostics only. Never build a document from a peeked number.
    pub async fn peek_next_number(&self, establishment_id: &str, series: i64) -> DbResult<i64> {
        let next: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT next_number FROM series_counters
            WHERE establishment_id = ?1 AND series = ?2
            "#,
        )
        .bind(establishment_id)
        .bind(series)
        .fetch_optional(&self.pool)
        .await?;

        Ok(next.unwrap_or(1))
    }

    /// Allocates the next offline contingency number for an establishment.
    ///
    /// Same single-statement discipline as [`Self::allocate_number`], on
    /// the per-establishment offline counter.
    pub async fn allocate_offline_number(&self, establishment_id: &str) -> DbResult<i64> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO offline_counters (establishment_id, next_number, updated_at)
            VALUES (?1, 1, ?2)
            "#,
        )
        .bind(establishment_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let number: i64 = sqlx::query_scalar(
            r#"
            UPDATE offline_counters
            SET next_number = next_number + 1, updated_at = ?2
            WHERE establishment_id = ?1
            RETURNING next_number - 1
            "#,
        )
        .bind(establishment_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        if number > MAX_DOCUMENT_NUMBER {
            return Err(DbError::SeriesExhausted {
                establishment_id: establishment_id.to_string(),
                series: fisco_core::CONTINGENCY_SERIES,
            });
        }

        debug!(establishment_id, number, "Allocated offline number");
        Ok(number)
    }

    /// Returns the next offline number without consuming it.
    pub async fn peek_next_offline_number(&self, establishment_id: &str) -> DbResult<i64> {
        let next: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT next_number FROM offline_counters
            WHERE establishment_id = ?1
            "#,
        )
        .bind(establishment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(next.unwrap_or(1))
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
    use std::collections::HashSet;

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.establishments()
            .insert(&sample_establishment("est-1", "12345678000195"))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_sequence_starts_at_one() {
        let db = test_db().await;
        let repo = db.counters();

        assert_eq!(repo.peek_next_number("est-1", 1).await.unwrap(), 1);
        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 1);
        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 2);
        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 3);
        assert_eq!(repo.peek_next_number("est-1", 1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_series_are_independent() {
        let db = test_db().await;
        db.establishments()
            .insert(&sample_establishment("est-2", "33009911002506"))
            .await
            .unwrap();
        let repo = db.counters();

        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 1);
        assert_eq!(repo.allocate_number("est-1", 2).await.unwrap(), 1);
        assert_eq!(repo.allocate_number("est-2", 1).await.unwrap(), 1);
        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 2);
        assert_eq!(repo.allocate_number("est-1", 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_offline_counter_is_independent() {
        let db = test_db().await;
        let repo = db.counters();

        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 1);
        assert_eq!(repo.allocate_offline_number("est-1").await.unwrap(), 1);
        assert_eq!(repo.allocate_offline_number("est-1").await.unwrap(), 2);
        // Online sequence unaffected by offline traffic
        assert_eq!(repo.allocate_number("est-1", 1).await.unwrap(), 2);
        assert_eq!(repo.peek_next_offline_number("est-1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_never_collide() {
        let db = test_db().await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let repo = db.counters();
            handles.push(tokio::spawn(async move {
                let mut numbers = Vec::new();
                for _ in 0..5 {
                    numbers.push(repo.allocate_number("est-1", 1).await.unwrap());
                }
                numbers
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        let distinct: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(distinct.len(), 50, "duplicate number allocated");
        assert_eq!(*all.iter().min().unwrap(), 1);
        assert_eq!(*all.iter().max().unwrap(), 50);
    }

    #[tokio::test]
    async fn test_series_exhaustion() {
        let db = test_db().await;
        let repo = db.counters();

        // Seed the row, then push the counter to the edge
        repo.allocate_number("est-1", 1).await.unwrap();
        sqlx::query(
            "UPDATE series_counters SET next_number = ?1 WHERE establishment_id = 'est-1' AND series = 1",
        )
        .bind(MAX_DOCUMENT_NUMBER)
        .execute(db.pool())
        .await
        .unwrap();

        // The last representable number is still allocatable
        assert_eq!(
            repo.allocate_number("est-1", 1).await.unwrap(),
            MAX_DOCUMENT_NUMBER
        );

        let err = repo.allocate_number("est-1", 1).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::SeriesExhausted { series: 1, .. }
        ));
    }
}
