//! # Offline Contingency
//!
//! Freezes sales when the authority is unreachable and replays them later.
//!
//! ## Offline Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  EMISSION TIME (authority down)                                         │
//! │                                                                         │
//! │  EmissionRequest ──► validate draft ──► offline counter ──► key with    │
//! │                                         (per establishment) series 900, │
//! │                                                             tpEmis 9    │
//! │                                              │                          │
//! │                                              ▼                          │
//! │                                   ContingencyRecord (payload frozen,    │
//! │                                   sync_status = pending, NEVER deleted) │
//! │                                                                         │
//! │  RECONCILIATION (scheduler or operator)                                 │
//! │                                                                         │
//! │  probe status service ── not in operation ──► defer, consume nothing    │
//! │        │                                                                │
//! │        ▼ in operation                                                   │
//! │  for each pending record, oldest first:                                 │
//! │     consume one attempt ──► replay payload through the ONLINE pipeline  │
//! │     (fresh number, fresh key, emission type normal)                     │
//! │        │                                                                │
//! │        ├── document persisted ──► record synced, document backlinked    │
//! │        ├── connectivity error ──► failure logged, pass stops            │
//! │        └── other error        ──► failure logged, next record           │
//! │                                                                         │
//! │  After the attempt budget the record parks as `error` for an operator.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity of a Reconciled Sale
//! The offline key exists so the frozen sale has a stable identity while it
//! waits; it is never submitted. Reconciliation runs the ordinary online
//! pipeline, so the resulting document carries an online series, a fresh
//! number and emission type `normal` — only `contingency_record_id` betrays
//! its offline birth.

use chrono::{Datelike, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use fisco_core::access_key::KeyFields;
use fisco_core::builder::{DocumentBuilder, FlatRateTaxCalculator};
use fisco_core::{
    AccessKey, ContingencyRecord, ContingencyStatistics, EmissionRequest, EmissionType,
    EstablishmentConfig, SyncStatus, CONTINGENCY_SERIES,
};

use crate::authority::AuthorityClient;
use crate::emission::{draw_random_code, EmissionEngine};
use crate::error::{EngineError, EngineResult};

// =============================================================================
// Reconciliation Report
// =============================================================================

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub establishment_id: String,
    /// Whether the status probe found the service in operation. When false
    /// the pass ended before touching any record.
    pub probed_online: bool,
    /// Records that consumed a sync attempt this pass.
    pub attempted: i64,
    /// Records now linked to a persisted document.
    pub synced: i64,
    /// Records whose attempt failed (still pending, or parked as `error`
    /// once their budget ran out).
    pub failed: i64,
}

impl ReconciliationReport {
    fn deferred(establishment_id: &str) -> Self {
        ReconciliationReport {
            establishment_id: establishment_id.to_string(),
            probed_online: false,
            attempted: 0,
            synced: 0,
            failed: 0,
        }
    }
}

// =============================================================================
// Contingency Operations
// =============================================================================

impl<A: AuthorityClient> EmissionEngine<A> {
    /// Freezes a sale as a contingency record.
    ///
    /// The draft is built first: a request that cannot become a valid
    /// document must fail at the counter, not at reconciliation when the
    /// customer is long gone. The offline key gives the frozen sale its
    /// identity (series 900, emission type 9); no XML is rendered and
    /// nothing is submitted here.
    pub(crate) async fn record_offline(
        &self,
        establishment: &EstablishmentConfig,
        request: &EmissionRequest,
    ) -> EngineResult<ContingencyRecord> {
        let calculator = FlatRateTaxCalculator::new(self.config.tax.rate_bps as u32);
        DocumentBuilder::new(establishment, &calculator).build(request)?;

        let number = self
            .db
            .counters()
            .allocate_offline_number(&establishment.id)
            .await?;
        let created_at = Utc::now();

        let offline_key = AccessKey::build(&KeyFields {
            state_code: establishment.state_code,
            year: created_at.year(),
            month: created_at.month(),
            tax_id: establishment.tax_id.clone(),
            series: CONTINGENCY_SERIES,
            number,
            emission_type: EmissionType::Contingency,
            random_code: draw_random_code(number),
        })?;

        let record = ContingencyRecord {
            id: Uuid::new_v4().to_string(),
            establishment_id: establishment.id.clone(),
            offline_number: number,
            offline_key: offline_key.into_string(),
            payload: request.to_payload()?,
            sync_status: SyncStatus::Pending,
            attempts: 0,
            last_error: None,
            document_id: None,
            created_at,
            synced_at: None,
        };
        self.db.contingency().insert(&record).await?;

        info!(
            establishment_id = %establishment.id,
            record_id = %record.id,
            offline_number = number,
            "Sale frozen as contingency record"
        );
        Ok(record)
    }

    /// Replays pending contingency records through the online pipeline.
    ///
    /// ## Rules
    /// - The status service is probed first; a service that is down or not
    ///   in operation defers the whole pass and consumes no attempts
    /// - Records are replayed oldest first, up to the configured batch size
    /// - Each replay consumes one attempt before any network traffic, so
    ///   the at-most-N bound survives crashes
    /// - A connectivity failure mid-pass stops the loop; remaining records
    ///   keep their attempts for the next pass
    /// - Safe to re-run at any time: synced and parked records are never
    ///   picked up again, and records are never deleted
    pub async fn reconcile(&self, establishment_id: &str) -> EngineResult<ReconciliationReport> {
        let establishment = self.establishment(establishment_id).await?;
        // A broken certificate aborts outright: replayed documents must be
        // signed with it, so attempts spent now would all be wasted.
        let certificate = self.load_certificate(&establishment)?;

        if !self
            .authority_in_operation(&establishment, &certificate)
            .await?
        {
            info!(establishment_id, "Reconciliation deferred");
            return Ok(ReconciliationReport::deferred(establishment_id));
        }

        let pending = self
            .db
            .contingency()
            .list_pending(establishment_id, self.config.contingency.batch_size)
            .await?;
        let mut report = ReconciliationReport {
            establishment_id: establishment_id.to_string(),
            probed_online: true,
            attempted: 0,
            synced: 0,
            failed: 0,
        };
        let max_attempts = self.config.contingency.max_sync_attempts;

        for record in pending {
            let attempt = self.db.contingency().begin_attempt(&record.id).await?;
            report.attempted += 1;

            let request = match EmissionRequest::from_payload(&record.payload) {
                Ok(request) => request,
                Err(err) => {
                    // A payload that no longer decodes will not fix itself;
                    // burn its attempts so it parks for an operator.
                    warn!(
                        record_id = %record.id,
                        attempt,
                        error = %err,
                        "Undecodable contingency payload"
                    );
                    self.db
                        .contingency()
                        .record_failure(
                            &record.id,
                            &format!("undecodable payload: {err}"),
                            max_attempts,
                        )
                        .await?;
                    report.failed += 1;
                    continue;
                }
            };

            match self
                .emit_online(&establishment, &certificate, &request, Some(&record.id))
                .await
            {
                Ok(outcome) => {
                    let document = outcome.document().ok_or_else(|| {
                        EngineError::Internal(
                            "online replay produced no document".to_string(),
                        )
                    })?;
                    self.db
                        .contingency()
                        .mark_synced(&record.id, &document.id, Utc::now())
                        .await?;
                    report.synced += 1;
                    info!(
                        record_id = %record.id,
                        document_id = %document.id,
                        status = ?document.status,
                        "Contingency record reconciled"
                    );
                }
                Err(err) if err.is_connectivity() => {
                    self.db
                        .contingency()
                        .record_failure(&record.id, &err.to_string(), max_attempts)
                        .await?;
                    report.failed += 1;
                    warn!(
                        record_id = %record.id,
                        attempt,
                        error = %err,
                        "Authority dropped mid-reconciliation, stopping pass"
                    );
                    break;
                }
                Err(err) => {
                    self.db
                        .contingency()
                        .record_failure(&record.id, &err.to_string(), max_attempts)
                        .await?;
                    report.failed += 1;
                    warn!(
                        record_id = %record.id,
                        attempt,
                        error = %err,
                        "Contingency replay failed"
                    );
                }
            }
        }

        info!(
            establishment_id,
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    /// Aggregate contingency health for one establishment (dashboards,
    /// pre-close checks).
    pub async fn contingency_statistics(
        &self,
        establishment_id: &str,
    ) -> EngineResult<ContingencyStatistics> {
        Ok(self.db.contingency().statistics(establishment_id).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================
