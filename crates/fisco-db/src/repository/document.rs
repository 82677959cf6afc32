//! # Document Repository
//!
//! Database operations for fiscal documents and their line items.
//!
//! ## Persistence Point
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   When a Document Row Appears                           │
//! │                                                                         │
//! │  build draft ──► allocate number ──► sign ──► submit ──► verdict       │
//! │                                                             │           │
//! │                     (all of this is in-memory)              ▼           │
//! │                                              insert_with_items()        │
//! │                                              status: authorized /       │
//! │                                                      rejected /         │
//! │                                                      error              │
//! │                                                                         │
//! │  After insert, only three row mutations exist:                         │
//! │    • mark_cancelled            authorized → cancelled                  │
//! │    • resolve_error_authorized  error      → authorized                 │
//! │    • resolve_error_rejected    error      → rejected                   │
//! │                                                                         │
//! │  Every mutation is guarded by the current status in the WHERE          │
//! │  clause, so a stale caller updates zero rows instead of clobbering.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use fisco_core::{
    CustomerInfo, DocumentFilter, DocumentItem, DocumentStatus, EmissionType, Environment,
    FiscalDocument, PaymentInfo,
};

/// Default row cap for list queries.
const DEFAULT_LIST_LIMIT: i64 = 100;

/// Shared SELECT column list; must stay in sync with [`DocumentRow`].
const DOCUMENT_COLUMNS: &str = r#"
    id, establishment_id, environment, series, number, emission_type,
    access_key, status, issued_at, customer_json, payment_json,
    total_products_cents, total_discount_cents, total_tax_cents, total_amount_cents,
    protocol_number, authorized_at, status_code, status_reason, receipt_number,
    cancelled_at, cancellation_protocol, cancellation_reason,
    signed_xml, contingency_record_id, created_at, updated_at
"#;

/// Raw row shape; customer/payment live as JSON snapshots.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    establishment_id: String,
    environment: Environment,
    series: i64,
    number: i64,
    emission_type: EmissionType,
    access_key: String,
    status: DocumentStatus,
    issued_at: DateTime<Utc>,
    customer_json: Option<String>,
    payment_json: String,
    total_products_cents: i64,
    total_discount_cents: i64,
    total_tax_cents: i64,
    total_amount_cents: i64,
    protocol_number: Option<String>,
    authorized_at: Option<DateTime<Utc>>,
    status_code: Option<String>,
    status_reason: Option<String>,
    receipt_number: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_protocol: Option<String>,
    cancellation_reason: Option<String>,
    signed_xml: Option<String>,
    contingency_record_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self) -> DbResult<FiscalDocument> {
        let customer: Option<CustomerInfo> = match self.customer_json {
            Some(json) => {
                Some(serde_json::from_str(&json).map_err(|e| DbError::corrupt("customer", e))?)
            }
            None => None,
        };
        let payment: PaymentInfo =
            serde_json::from_str(&self.payment_json).map_err(|e| DbError::corrupt("payment", e))?;

        Ok(FiscalDocument {
            id: self.id,
            establishment_id: self.establishment_id,
            environment: self.environment,
            series: self.series,
            number: self.number,
            emission_type: self.emission_type,
            access_key: self.access_key,
            status: self.status,
            issued_at: self.issued_at,
            customer,
            payment,
            total_products_cents: self.total_products_cents,
            total_discount_cents: self.total_discount_cents,
            total_tax_cents: self.total_tax_cents,
            total_amount_cents: self.total_amount_cents,
            protocol_number: self.protocol_number,
            authorized_at: self.authorized_at,
            status_code: self.status_code,
            status_reason: self.status_reason,
            receipt_number: self.receipt_number,
            cancelled_at: self.cancelled_at,
            cancellation_protocol: self.cancellation_protocol,
            cancellation_reason: self.cancellation_reason,
            signed_xml: self.signed_xml,
            contingency_record_id: self.contingency_record_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for fiscal document operations.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    /// Creates a new DocumentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DocumentRepository { pool }
    }

    /// Inserts a document together with its items, atomically.
    ///
    /// ## Why One Transaction
    /// A document without its lines is fiscally meaningless; a crash
    /// between the two inserts must leave no trace of either.
    pub async fn insert_with_items(
        &self,
        document: &FiscalDocument,
        items: &[DocumentItem],
    ) -> DbResult<()> {
        debug!(
            id = %document.id,
            access_key = %document.access_key,
            status = ?document.status,
            "Inserting fiscal document"
        );

        let customer_json = match &document.customer {
            Some(customer) => {
                Some(serde_json::to_string(customer).map_err(|e| DbError::corrupt("customer", e))?)
            }
            None => None,
        };
        let payment_json = serde_json::to_string(&document.payment)
            .map_err(|e| DbError::corrupt("payment", e))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fiscal_documents (
                id, establishment_id, environment, series, number, emission_type,
                access_key, status, issued_at, customer_json, payment_json,
                total_products_cents, total_discount_cents, total_tax_cents, total_amount_cents,
                protocol_number, authorized_at, status_code, status_reason, receipt_number,
                cancelled_at, cancellation_protocol, cancellation_reason,
                signed_xml, contingency_record_id, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20,
                ?21, ?22, ?23,
                ?24, ?25, ?26, ?27
            )
            "#,
        )
        .bind(&document.id)
        .bind(&document.establishment_id)
        .bind(document.environment)
        .bind(document.series)
        .bind(document.number)
        .bind(document.emission_type)
        .bind(&document.access_key)
        .bind(document.status)
        .bind(document.issued_at)
        .bind(customer_json)
        .bind(payment_json)
        .bind(document.total_products_cents)
        .bind(document.total_discount_cents)
        .bind(document.total_tax_cents)
        .bind(document.total_amount_cents)
        .bind(&document.protocol_number)
        .bind(document.authorized_at)
        .bind(&document.status_code)
        .bind(&document.status_reason)
        .bind(&document.receipt_number)
        .bind(document.cancelled_at)
        .bind(&document.cancellation_protocol)
        .bind(&document.cancellation_reason)
        .bind(&document.signed_xml)
        .bind(&document.contingency_record_id)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO document_items (
                    id, document_id, line_number, code, description, ncm, cfop,
                    quantity_hundredths, unit_price_cents, line_total_cents, tax_cents,
                    created_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                    ?8, ?9, ?10, ?11,
                    ?12
                )
                "#,
            )
            .bind(&item.id)
            .bind(&item.document_id)
            .bind(item.line_number)
            .bind(&item.code)
            .bind(&item.description)
            .bind(&item.ncm)
            .bind(&item.cfop)
            .bind(item.quantity_hundredths)
            .bind(item.unit_price_cents)
            .bind(item.line_total_cents)
            .bind(item.tax_cents)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Gets a document by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<FiscalDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM fiscal_documents WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Gets a document by its 44-digit access key.
    pub async fn get_by_access_key(&self, access_key: &str) -> DbResult<Option<FiscalDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM fiscal_documents WHERE access_key = ?1"
        ))
        .bind(access_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Gets a document by its fiscal identity triple.
    pub async fn get_by_number(
        &self,
        establishment_id: &str,
        series: i64,
        number: i64,
    ) -> DbResult<Option<FiscalDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM fiscal_documents \
             WHERE establishment_id = ?1 AND series = ?2 AND number = ?3"
        ))
        .bind(establishment_id)
        .bind(series)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Gets all items for a document, in line order.
    pub async fn get_items(&self, document_id: &str) -> DbResult<Vec<DocumentItem>> {
        let items = sqlx::query_as::<_, DocumentItem>(
            r#"
            SELECT
                id, document_id, line_number, code, description, ncm, cfop,
                quantity_hundredths, unit_price_cents, line_total_cents, tax_cents,
                created_at
            FROM document_items
            WHERE document_id = ?1
            ORDER BY line_number
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Lists documents for an establishment, newest first.
    ///
    /// Filter fields combine with AND; unset fields don't constrain.
    pub async fn list(
        &self,
        establishment_id: &str,
        filter: &DocumentFilter,
    ) -> DbResult<Vec<FiscalDocument>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {DOCUMENT_COLUMNS} FROM fiscal_documents WHERE establishment_id = "
        ));
        builder.push_bind(establishment_id);

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(series) = filter.series {
            builder.push(" AND series = ").push_bind(series);
        }
        if let Some(emission_type) = filter.emission_type {
            builder.push(" AND emission_type = ").push_bind(emission_type);
        }
        if let Some(after) = filter.issued_after {
            builder.push(" AND issued_at >= ").push_bind(after);
        }
        if let Some(before) = filter.issued_before {
            builder.push(" AND issued_at < ").push_bind(before);
        }

        builder
            .push(" ORDER BY issued_at DESC, number DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));

        let rows: Vec<DocumentRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    /// Records a cancellation on an authorized document.
    ///
    /// ## Rules
    /// Only `authorized` rows qualify; anything else leaves the row
    /// untouched and returns NotFound.
    pub async fn mark_cancelled(
        &self,
        id: &str,
        cancellation_protocol: &str,
        cancellation_reason: &str,
        cancelled_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE fiscal_documents SET
                status = 'cancelled',
                cancellation_protocol = ?2,
                cancellation_reason = ?3,
                cancelled_at = ?4,
                updated_at = ?4
            WHERE id = ?1 AND status = 'authorized'
            "#,
        )
        .bind(id)
        .bind(cancellation_protocol)
        .bind(cancellation_reason)
        .bind(cancelled_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document (authorized)", id));
        }

        Ok(())
    }

    /// Settles an `error` document as authorized after a receipt follow-up.
    pub async fn resolve_error_authorized(
        &self,
        id: &str,
        protocol_number: &str,
        status_code: &str,
        status_reason: &str,
        authorized_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE fiscal_documents SET
                status = 'authorized',
                protocol_number = ?2,
                status_code = ?3,
                status_reason = ?4,
                authorized_at = ?5,
                updated_at = ?6
            WHERE id = ?1 AND status = 'error'
            "#,
        )
        .bind(id)
        .bind(protocol_number)
        .bind(status_code)
        .bind(status_reason)
        .bind(authorized_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document (error)", id));
        }

        Ok(())
    }

    /// Settles an `error` document as rejected after a receipt follow-up.
    pub async fn resolve_error_rejected(
        &self,
        id: &str,
        status_code: &str,
        status_reason: &str,
    ) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE fiscal_documents SET
                status = 'rejected',
                status_code = ?2,
                status_reason = ?3,
                updated_at = ?4
            WHERE id = ?1 AND status = 'error'
            "#,
        )
        .bind(id)
        .bind(status_code)
        .bind(status_reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document (error)", id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
