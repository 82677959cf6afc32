//! # Establishment Repository
//!
//! Database operations for per-store fiscal configuration.
//!
//! Rows here are written by merchant onboarding and read by every
//! emission. The emission pipeline treats them as read-only apart from
//! series rotation.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use fisco_core::EstablishmentConfig;

/// Repository for establishment configuration.
#[derive(Debug, Clone)]
pub struct EstablishmentRepository {
    pool: SqlitePool,
}

impl EstablishmentRepository {
    /// Creates a new EstablishmentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EstablishmentRepository { pool }
    }

    /// Inserts an establishment.
    pub async fn insert(&self, config: &EstablishmentConfig) -> DbResult<()> {
        debug!(id = %config.id, tax_id = %config.tax_id, "Inserting establishment");

        sqlx::query(
            r#"
            INSERT INTO establishments (
                id, tax_id, legal_name, trade_name, state_registration,
                state_code, municipality_code,
                address_street, address_number, address_district,
                address_city, address_state, address_zip,
                environment, active_series,
                certificate_path, certificate_password, tax_regime,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12, ?13,
                ?14, ?15,
                ?16, ?17, ?18,
                ?19, ?20
            )
            "#,
        )
        .bind(&config.id)
        .bind(&config.tax_id)
        .bind(&config.legal_name)
        .bind(&config.trade_name)
        .bind(&config.state_registration)
        .bind(config.state_code)
        .bind(config.municipality_code)
        .bind(&config.address_street)
        .bind(&config.address_number)
        .bind(&config.address_district)
        .bind(&config.address_city)
        .bind(&config.address_state)
        .bind(&config.address_zip)
        .bind(config.environment)
        .bind(config.active_series)
        .bind(&config.certificate_path)
        .bind(&config.certificate_password)
        .bind(config.tax_regime)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets an establishment by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<EstablishmentConfig>> {
        let config = sqlx::query_as::<_, EstablishmentConfig>(
            r#"
            SELECT
                id, tax_id, legal_name, trade_name, state_registration,
                state_code, municipality_code,
                address_street, address_number, address_district,
                address_city, address_state, address_zip,
                environment, active_series,
                certificate_path, certificate_password, tax_regime,
                created_at, updated_at
            FROM establishments
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    /// Gets an establishment by its CNPJ.
    pub async fn get_by_tax_id(&self, tax_id: &str) -> DbResult<Option<EstablishmentConfig>> {
        let config = sqlx::query_as::<_, EstablishmentConfig>(
            r#"
            SELECT
                id, tax_id, legal_name, trade_name, state_registration,
                state_code, municipality_code,
                address_street, address_number, address_district,
                address_city, address_state, address_zip,
                environment, active_series,
                certificate_path, certificate_password, tax_regime,
                created_at, updated_at
            FROM establishments
            WHERE tax_id = ?1
            "#,
        )
        .bind(tax_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    /// Lists all establishments.
    pub async fn list(&self) -> DbResult<Vec<EstablishmentConfig>> {
        let configs = sqlx::query_as::<_, EstablishmentConfig>(
            r#"
            SELECT
                id, tax_id, legal_name, trade_name, state_registration,
                state_code, municipality_code,
                address_street, address_number, address_district,
                address_city, address_state, address_zip,
                environment, active_series,
                certificate_path, certificate_password, tax_regime,
                created_at, updated_at
            FROM establishments
            ORDER BY legal_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }

    /// Rotates the establishment to a new online series.
    ///
    /// ## When To Call
    /// After a series is exhausted (999,999,999 documents emitted) or as
    /// an administrative reassignment. Callers validate the series range;
    /// this only records it.
    pub async fn set_active_series(&self, id: &str, series: i64) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE establishments SET
                active_series = ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(series)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Establishment", id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
