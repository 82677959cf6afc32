//! # Emission Pipeline
//!
//! Main orchestrator for fiscal document emission. Coordinates drafting,
//! numbering, rendering, signing, authority submission and the offline
//! fallback.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  EmissionRequest                                                        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  status probe ── down / not in operation ──► contingency record         │
//! │        │                                     (series 900, no online     │
//! │        ▼ in operation                        number consumed)           │
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐         │
//! │  │   build   │──►│ allocate  │──►│ render +  │──►│  submit   │         │
//! │  │   draft   │   │  number,  │   │   sign    │   │ to SEFAZ  │         │
//! │  │ (validate)│   │ build key │   │  (DSig)   │   │ (SOAP/TLS)│         │
//! │  └───────────┘   └───────────┘   └───────────┘   └─────┬─────┘         │
//! │                                                        │               │
//! │            ┌─────────────────┬─────────────────────────┤               │
//! │            ▼                 ▼                         ▼               │
//! │       AUTHORIZED         REJECTED              batched? poll the       │
//! │       (protocol)         (number burned)       receipt, then give      │
//! │            │                 │                 up as INCONCLUSIVE      │
//! │            └────────┬────────┴─────────────────────────┘               │
//! │                     ▼                                                  │
//! │        row inserted with its FINAL status                              │
//! │                                                                        │
//! │  drop DURING submit ──► number burned, sale still frozen offline       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Persistence Rule
//! Documents are inserted only once their submission outcome is known, so
//! every row is born `authorized`, `rejected` or `error` and no crash can
//! leave half-submitted drafts behind. The price is that a number allocated
//! for a submission that never completes is burned; the allocator never
//! reissues it.

use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fisco_core::access_key::KeyFields;
use fisco_core::builder::{DocumentBuilder, DocumentStamp, DraftItem, FlatRateTaxCalculator};
use fisco_core::{
    lifecycle, validation, AccessKey, ContingencyRecord, CoreError, DocumentFilter, DocumentItem,
    DocumentStatus, EmissionRequest, EmissionType, EstablishmentConfig, FiscalDocument,
    MAX_RANDOM_CODE,
};
use fisco_db::Database;

use crate::authority::{
    AuthorityClient, AuthorityContext, AuthorityRejection, AuthorityVerdict, CancelOutcome,
    DocumentStanding, ReceiptOutcome, ServiceStatus, SubmissionOutcome,
};
use crate::certificate::MerchantCertificate;
use crate::config::EngineConfig;
use crate::document_xml;
use crate::error::{EngineError, EngineResult};
use crate::signer::XmlSigner;

// =============================================================================
// Emission Outcome
// =============================================================================

/// What the caller gets back from [`EmissionEngine::emit`].
///
/// All four variants are successful returns: even a rejection is a
/// definitive, persisted answer. Errors are reserved for failures that
/// produced nothing (bad request, broken certificate, corrupt response).
#[derive(Debug, Clone)]
pub enum EmissionOutcome {
    /// The authority granted a protocol; the receipt can be delivered.
    Authorized(FiscalDocument),
    /// The authority refused the document. Its number is burned and the
    /// sale must be corrected and re-emitted as a new document.
    Rejected(FiscalDocument),
    /// The authority was unreachable; the sale is frozen as a contingency
    /// record and will be re-emitted by reconciliation.
    Offline(ContingencyRecord),
    /// Submitted, but the verdict did not arrive within the poll budget.
    /// The document is persisted as `error` with its batch receipt and is
    /// resolved later by [`EmissionEngine::follow_up`].
    Inconclusive(FiscalDocument),
}

impl EmissionOutcome {
    /// True when the sale ended with an authorization protocol in hand.
    pub fn is_authorized(&self) -> bool {
        matches!(self, EmissionOutcome::Authorized(_))
    }

    /// The persisted document, when this outcome produced one.
    pub fn document(&self) -> Option<&FiscalDocument> {
        match self {
            EmissionOutcome::Authorized(doc)
            | EmissionOutcome::Rejected(doc)
            | EmissionOutcome::Inconclusive(doc) => Some(doc),
            EmissionOutcome::Offline(_) => None,
        }
    }
}

// =============================================================================
// Emission Engine
// =============================================================================

/// Drives fiscal documents from sale request to authority verdict.
///
/// One engine serves every establishment in the database; certificates and
/// endpoints are resolved per call from the establishment's configuration.
/// The authority is a type parameter so tests can script verdicts without
/// a network.
pub struct EmissionEngine<A: AuthorityClient> {
    /// Storage for establishments, counters, documents and contingency.
    pub(crate) db: Database,

    /// Authority transport (SOAP webservice in production).
    pub(crate) authority: A,

    /// Engine-level tuning: timeouts, poll budget, tax rate.
    pub(crate) config: EngineConfig,
}

impl<A: AuthorityClient> EmissionEngine<A> {
    /// Creates an engine over an open database.
    ///
    /// The configuration is trusted as validated; [`EngineConfig::load`]
    /// already rejects out-of-range values.
    pub fn new(db: Database, authority: A, config: EngineConfig) -> Self {
        EmissionEngine {
            db,
            authority,
            config,
        }
    }

    /// The authority client this engine submits through.
    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying database, for callers that need direct repository
    /// access (reports, back office listings).
    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emits a fiscal document for one sale.
    ///
    /// ## Rules
    /// - The request is validated and totalled before any network traffic,
    ///   and long before any number is consumed
    /// - The status service is probed next: an authority that is down or
    ///   not in operation freezes the sale offline without consuming an
    ///   online number
    /// - An authority that drops mid-submission still freezes the sale; the
    ///   online number allocated for that attempt is burned
    /// - A certificate problem fails both paths: the offline document would
    ///   need the same certificate at reconciliation, so freezing the sale
    ///   would only move the failure
    /// - Rejections and inconclusive submissions are persisted outcomes,
    ///   not errors
    pub async fn emit(&self, request: &EmissionRequest) -> EngineResult<EmissionOutcome> {
        let establishment = self.establishment(&request.establishment_id).await?;
        let certificate = self.load_certificate(&establishment)?;

        // Refuse malformed requests before going anywhere near the wire.
        let calculator = FlatRateTaxCalculator::new(self.config.tax.rate_bps as u32);
        DocumentBuilder::new(&establishment, &calculator).build(request)?;

        if !self
            .authority_in_operation(&establishment, &certificate)
            .await?
        {
            let record = self.record_offline(&establishment, request).await?;
            return Ok(EmissionOutcome::Offline(record));
        }

        match self
            .emit_online(&establishment, &certificate, request, None)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_connectivity() => {
                warn!(
                    establishment_id = %establishment.id,
                    error = %err,
                    "Authority dropped mid-submission, freezing sale offline"
                );
                let record = self.record_offline(&establishment, request).await?;
                Ok(EmissionOutcome::Offline(record))
            }
            Err(err) => Err(err),
        }
    }

    /// Probes the status service ahead of online work.
    ///
    /// `Ok(false)` covers both an unreachable authority and one answering
    /// that it is not in operation; failures that connectivity cannot
    /// explain (certificate, corrupt response) propagate.
    pub(crate) async fn authority_in_operation(
        &self,
        establishment: &EstablishmentConfig,
        certificate: &MerchantCertificate,
    ) -> EngineResult<bool> {
        let ctx = authority_context(establishment, certificate);
        match self.authority.check_status(&ctx).await {
            Ok(status) if status.is_available() => Ok(true),
            Ok(status) => {
                warn!(
                    establishment_id = %establishment.id,
                    status_code = %status.status_code,
                    reason = %status.reason,
                    "Authority not in operation"
                );
                Ok(false)
            }
            Err(err) if err.is_connectivity() => {
                warn!(
                    establishment_id = %establishment.id,
                    error = %err,
                    "Authority unreachable"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the full online pipeline: draft, number, key, render, sign,
    /// submit, persist.
    ///
    /// `contingency_record_id` backlinks the document to the offline record
    /// it reconciles; reconciled documents are otherwise ordinary online
    /// emissions with fresh numbers.
    pub(crate) async fn emit_online(
        &self,
        establishment: &EstablishmentConfig,
        certificate: &MerchantCertificate,
        request: &EmissionRequest,
        contingency_record_id: Option<&str>,
    ) -> EngineResult<EmissionOutcome> {
        let calculator = FlatRateTaxCalculator::new(self.config.tax.rate_bps as u32);
        let draft = DocumentBuilder::new(establishment, &calculator).build(request)?;

        // The draft is valid; only now is a number worth consuming.
        let series = establishment.active_series;
        let number = self
            .db
            .counters()
            .allocate_number(&establishment.id, series)
            .await?;
        let issued_at = Utc::now();

        let access_key = AccessKey::build(&KeyFields {
            state_code: establishment.state_code,
            year: issued_at.year(),
            month: issued_at.month(),
            tax_id: establishment.tax_id.clone(),
            series,
            number,
            emission_type: EmissionType::Normal,
            random_code: draw_random_code(number),
        })?;

        let (mut document, draft_items) = draft.into_document(DocumentStamp {
            document_id: Uuid::new_v4().to_string(),
            series,
            number,
            emission_type: EmissionType::Normal,
            access_key,
            issued_at,
        });
        document.contingency_record_id = contingency_record_id.map(str::to_string);
        let items = attach_items(&document.id, draft_items, issued_at);

        // Render, sign, and splice the signature in as infNFe's sibling.
        let mut nfe = document_xml::render_document(establishment, &document, &items)?;
        let signer = XmlSigner::new(certificate);
        let inf_nfe = nfe.child_named("infNFe").ok_or_else(|| {
            EngineError::Internal("rendered document has no <infNFe>".to_string())
        })?;
        let signature = signer.sign_element(inf_nfe)?;
        nfe.push_child(signature);
        let signed_xml = nfe.canonicalize();

        document.signed_xml = Some(signed_xml.clone());
        lifecycle::advance(&mut document, DocumentStatus::Generated)?;

        debug!(
            document_id = %document.id,
            access_key = %document.access_key,
            "Submitting signed document"
        );
        lifecycle::advance(&mut document, DocumentStatus::Submitted)?;
        let ctx = authority_context(establishment, certificate);
        match self.authority.submit(&ctx, &signed_xml).await? {
            SubmissionOutcome::Authorized(verdict) => self
                .finalize_authorized(document, &items, verdict)
                .await
                .map(EmissionOutcome::Authorized),
            SubmissionOutcome::Rejected(rejection) => self
                .finalize_rejected(document, &items, rejection)
                .await
                .map(EmissionOutcome::Rejected),
            SubmissionOutcome::Batched { receipt_number } => {
                self.poll_receipt(&ctx, document, &items, receipt_number)
                    .await
            }
        }
    }

    /// Polls a batch receipt until a verdict arrives or the budget runs out.
    ///
    /// Poll failures are logged and tolerated: the submission itself went
    /// through, so the sale must not fail because a status query did. An
    /// exhausted budget persists the document as `error` with its receipt
    /// for [`EmissionEngine::follow_up`].
    async fn poll_receipt(
        &self,
        ctx: &AuthorityContext<'_>,
        mut document: FiscalDocument,
        items: &[DocumentItem],
        receipt_number: String,
    ) -> EngineResult<EmissionOutcome> {
        document.receipt_number = Some(receipt_number.clone());

        let attempts = self.config.authority.poll_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.authority.poll_interval()).await;

            match self.authority.query_receipt(ctx, &receipt_number).await {
                Ok(ReceiptOutcome::Authorized(verdict)) => {
                    return self
                        .finalize_authorized(document, items, verdict)
                        .await
                        .map(EmissionOutcome::Authorized);
                }
                Ok(ReceiptOutcome::Rejected(rejection)) => {
                    return self
                        .finalize_rejected(document, items, rejection)
                        .await
                        .map(EmissionOutcome::Rejected);
                }
                Ok(ReceiptOutcome::Processing) => {
                    debug!(
                        receipt_number = %receipt_number,
                        attempt,
                        "Batch still processing"
                    );
                }
                Err(err) => {
                    warn!(
                        receipt_number = %receipt_number,
                        attempt,
                        error = %err,
                        "Receipt query failed"
                    );
                }
            }
        }

        document.status_reason = Some(format!(
            "batch {receipt_number} still processing after {attempts} queries"
        ));
        lifecycle::advance(&mut document, DocumentStatus::Error)?;
        self.db.documents().insert_with_items(&document, items).await?;
        warn!(
            document_id = %document.id,
            receipt_number = %receipt_number,
            "Submission inconclusive, needs follow-up"
        );
        Ok(EmissionOutcome::Inconclusive(document))
    }

    async fn finalize_authorized(
        &self,
        mut document: FiscalDocument,
        items: &[DocumentItem],
        verdict: AuthorityVerdict,
    ) -> EngineResult<FiscalDocument> {
        info!(
            document_id = %document.id,
            access_key = %document.access_key,
            protocol_number = %verdict.protocol_number,
            "Document authorized"
        );
        lifecycle::advance(&mut document, DocumentStatus::Authorized)?;
        document.protocol_number = Some(verdict.protocol_number);
        document.status_code = Some(verdict.status_code);
        document.status_reason = Some(verdict.reason);
        document.authorized_at = Some(verdict.authorized_at);
        self.db.documents().insert_with_items(&document, items).await?;
        Ok(document)
    }

    async fn finalize_rejected(
        &self,
        mut document: FiscalDocument,
        items: &[DocumentItem],
        rejection: AuthorityRejection,
    ) -> EngineResult<FiscalDocument> {
        warn!(
            document_id = %document.id,
            status_code = %rejection.status_code,
            reason = %rejection.reason,
            "Document rejected"
        );
        lifecycle::advance(&mut document, DocumentStatus::Rejected)?;
        document.status_code = Some(rejection.status_code);
        document.status_reason = Some(rejection.reason);
        self.db.documents().insert_with_items(&document, items).await?;
        Ok(document)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels an authorized document within the legal window.
    ///
    /// ## Rules
    /// - Only `authorized` documents can be cancelled
    /// - The event must be registered within 30 minutes of authorization
    /// - The justification is mandatory (15 to 255 characters)
    /// - The authority has the final word: a refused event leaves the
    ///   document authorized
    pub async fn cancel(&self, document_id: &str, reason: &str) -> EngineResult<FiscalDocument> {
        validation::validate_cancellation_reason(reason).map_err(CoreError::from)?;

        let document = self
            .db
            .documents()
            .get_by_id(document_id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound(document_id.to_string()))?;

        if document.status != DocumentStatus::Authorized {
            return Err(CoreError::InvalidTransition {
                from: document.status,
                to: DocumentStatus::Cancelled,
            }
            .into());
        }
        let authorized_at = document.authorized_at.ok_or_else(|| {
            EngineError::Internal(format!(
                "document {} is authorized but has no authorization timestamp",
                document.id
            ))
        })?;

        let now = Utc::now();
        if !lifecycle::cancellation_open(authorized_at, now) {
            return Err(EngineError::CancellationWindowClosed {
                deadline: lifecycle::cancellation_deadline(authorized_at),
            });
        }

        let establishment = self.establishment(&document.establishment_id).await?;
        let certificate = self.load_certificate(&establishment)?;

        let mut event = document_xml::render_cancel_event(&establishment, &document, reason, now)?;
        let signer = XmlSigner::new(&certificate);
        let inf_evento = event.child_named("infEvento").ok_or_else(|| {
            EngineError::Internal("rendered event has no <infEvento>".to_string())
        })?;
        let signature = signer.sign_element(inf_evento)?;
        event.push_child(signature);
        let event_xml = event.canonicalize();

        let ctx = authority_context(&establishment, &certificate);
        match self.authority.cancel(&ctx, &event_xml).await? {
            CancelOutcome::Registered {
                protocol_number,
                registered_at,
            } => {
                info!(
                    document_id = %document.id,
                    protocol_number = %protocol_number,
                    "Cancellation registered"
                );
                self.db
                    .documents()
                    .mark_cancelled(&document.id, &protocol_number, reason, registered_at)
                    .await?;
                self.db
                    .documents()
                    .get_by_id(&document.id)
                    .await?
                    .ok_or_else(|| CoreError::DocumentNotFound(document.id.clone()).into())
            }
            CancelOutcome::Refused {
                status_code,
                reason: refusal,
            } => {
                warn!(
                    document_id = %document.id,
                    status_code = %status_code,
                    reason = %refusal,
                    "Cancellation refused"
                );
                Err(EngineError::CancelRefused {
                    status_code,
                    reason: refusal,
                })
            }
        }
    }

    // =========================================================================
    // Follow-up
    // =========================================================================

    /// Resolves an inconclusive emission by re-querying its batch receipt.
    ///
    /// Safe to call repeatedly; the document leaves `error` only when the
    /// authority returns a definitive verdict. Documents in any other
    /// status are returned unchanged.
    pub async fn follow_up(&self, document_id: &str) -> EngineResult<FiscalDocument> {
        let document = self
            .db
            .documents()
            .get_by_id(document_id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound(document_id.to_string()))?;

        if document.status != DocumentStatus::Error {
            debug!(
                document_id = %document.id,
                status = ?document.status,
                "Nothing to follow up"
            );
            return Ok(document);
        }
        let receipt_number = document
            .receipt_number
            .clone()
            .ok_or_else(|| EngineError::MissingReceipt(document.id.clone()))?;

        let establishment = self.establishment(&document.establishment_id).await?;
        let certificate = self.load_certificate(&establishment)?;
        let ctx = authority_context(&establishment, &certificate);

        match self.authority.query_receipt(&ctx, &receipt_number).await? {
            ReceiptOutcome::Authorized(verdict) => {
                info!(
                    document_id = %document.id,
                    protocol_number = %verdict.protocol_number,
                    "Follow-up resolved: authorized"
                );
                self.db
                    .documents()
                    .resolve_error_authorized(
                        &document.id,
                        &verdict.protocol_number,
                        &verdict.status_code,
                        &verdict.reason,
                        verdict.authorized_at,
                    )
                    .await?;
            }
            ReceiptOutcome::Rejected(rejection) => {
                warn!(
                    document_id = %document.id,
                    status_code = %rejection.status_code,
                    "Follow-up resolved: rejected"
                );
                self.db
                    .documents()
                    .resolve_error_rejected(&document.id, &rejection.status_code, &rejection.reason)
                    .await?;
            }
            ReceiptOutcome::Processing => {
                debug!(document_id = %document.id, "Batch still processing");
                return Ok(document);
            }
        }

        self.db
            .documents()
            .get_by_id(&document.id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound(document.id.clone()).into())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Probes the authority's status service for one establishment's state
    /// and environment.
    pub async fn check_service(&self, establishment_id: &str) -> EngineResult<ServiceStatus> {
        let establishment = self.establishment(establishment_id).await?;
        let certificate = self.load_certificate(&establishment)?;
        let ctx = authority_context(&establishment, &certificate);
        self.authority.check_status(&ctx).await
    }

    /// Asks the authority for the registry standing of a locally known
    /// document (audit, or confirming a cancellation landed).
    pub async fn query_standing(&self, access_key: &str) -> EngineResult<DocumentStanding> {
        let document = self
            .db
            .documents()
            .get_by_access_key(access_key)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound(access_key.to_string()))?;

        let establishment = self.establishment(&document.establishment_id).await?;
        let certificate = self.load_certificate(&establishment)?;
        let ctx = authority_context(&establishment, &certificate);
        self.authority.query_key(&ctx, access_key).await
    }

    /// Lists documents for an establishment, newest first.
    pub async fn list_documents(
        &self,
        establishment_id: &str,
        filter: &DocumentFilter,
    ) -> EngineResult<Vec<FiscalDocument>> {
        Ok(self.db.documents().list(establishment_id, filter).await?)
    }

    /// Loads one document with its line items (receipt reprint).
    pub async fn get_document(
        &self,
        document_id: &str,
    ) -> EngineResult<(FiscalDocument, Vec<DocumentItem>)> {
        let document = self
            .db
            .documents()
            .get_by_id(document_id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound(document_id.to_string()))?;
        let items = self.db.documents().get_items(&document.id).await?;
        Ok((document, items))
    }

    // =========================================================================
    // Shared Plumbing
    // =========================================================================

    /// Loads and validates an establishment's configuration.
    pub(crate) async fn establishment(&self, id: &str) -> EngineResult<EstablishmentConfig> {
        let establishment = self
            .db
            .establishments()
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::EstablishmentNotFound(id.to_string()))?;
        establishment.validate().map_err(CoreError::from)?;
        Ok(establishment)
    }

    /// Loads the establishment's certificate and checks its validity
    /// window.
    pub(crate) fn load_certificate(
        &self,
        establishment: &EstablishmentConfig,
    ) -> EngineResult<MerchantCertificate> {
        let certificate = MerchantCertificate::load(
            Path::new(&establishment.certificate_path),
            &establishment.certificate_password,
        )?;
        certificate.ensure_valid()?;
        Ok(certificate)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Builds the per-call authority context for an establishment.
pub(crate) fn authority_context<'a>(
    establishment: &EstablishmentConfig,
    certificate: &'a MerchantCertificate,
) -> AuthorityContext<'a> {
    AuthorityContext {
        environment: establishment.environment,
        state_code: establishment.state_code,
        certificate,
    }
}

/// Draws the key's random component.
///
/// Redraws until it differs from the document number; a key whose random
/// digits echo the number is trivially guessable and the authority rejects
/// it.
pub(crate) fn draw_random_code(number: i64) -> i64 {
    let mut rng = rand::thread_rng();
    loop {
        let code = rng.gen_range(0..=MAX_RANDOM_CODE);
        if code != number {
            return code;
        }
    }
}

/// Gives draft lines their row identities for persistence.
fn attach_items(
    document_id: &str,
    drafts: Vec<DraftItem>,
    created_at: DateTime<Utc>,
) -> Vec<DocumentItem> {
    drafts
        .into_iter()
        .map(|item| DocumentItem {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            line_number: item.line_number,
            code: item.code,
            description: item.description,
            ncm: item.ncm,
            cfop: item.cfop,
            quantity_hundredths: item.quantity.hundredths(),
            unit_price_cents: item.unit_price.cents(),
            line_total_cents: item.line_total.cents(),
            tax_cents: item.tax.cents(),
            created_at,
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use chrono::Duration;
    use fisco_core::{
        Environment, ItemRequest, PaymentInfo, PaymentMethod, PaymentRequest, MODEL_NFCE,
    };
    use fisco_db::DbConfig;

    use crate::certificate::tests::{fixture_path, TEST_PASSWORD};
    use crate::testing::StubAuthority;

    pub(crate) fn sample_establishment() -> EstablishmentConfig {
        EstablishmentConfig {
            id: "est-1".to_string(),
            tax_id: "12345678000195".to_string(),
            legal_name: "Mercado Bom Preço LTDA".to_string(),
            trade_name: Some("Bom Preço".to_string()),
            state_registration: "123456789".to_string(),
            state_code: 35,
            municipality_code: 3_550_308,
            address_street: "Rua das Flores".to_string(),
            address_number: "100".to_string(),
            address_district: "Centro".to_string(),
            address_city: "São Paulo".to_string(),
            address_state: "SP".to_string(),
            address_zip: "01310100".to_string(),
            environment: Environment::Homologation,
            active_series: 1,
            certificate_path: fixture_path("merchant.pem").display().to_string(),
            certificate_password: TEST_PASSWORD.to_string(),
            tax_regime: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn sample_request() -> EmissionRequest {
        EmissionRequest {
            establishment_id: "est-1".to_string(),
            items: vec![
                ItemRequest {
                    code: "SKU-1".to_string(),
                    description: "Água mineral 500ml".to_string(),
                    ncm: "22011000".to_string(),
                    cfop: "5102".to_string(),
                    quantity_hundredths: 150,
                    unit_price_cents: 223,
                },
                ItemRequest {
                    code: "SKU-2".to_string(),
                    description: "Pão francês".to_string(),
                    ncm: "19059090".to_string(),
                    cfop: "5102".to_string(),
                    quantity_hundredths: 100,
                    unit_price_cents: 395,
                },
            ],
            customer: None,
            payment: Some(PaymentRequest {
                method: PaymentMethod::Pix,
                amount_cents: 1000,
            }),
            discount_cents: 0,
        }
    }

    pub(crate) fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.authority.poll_attempts = 2;
        config.authority.poll_interval_ms = 1;
        config
    }

    pub(crate) fn verdict_now() -> AuthorityVerdict {
        verdict_at(Utc::now())
    }

    fn verdict_at(authorized_at: DateTime<Utc>) -> AuthorityVerdict {
        AuthorityVerdict {
            protocol_number: "135260000000101".to_string(),
            status_code: "100".to_string(),
            reason: "Autorizado o uso da NF-e".to_string(),
            authorized_at,
        }
    }

    pub(crate) fn rejection_302() -> AuthorityRejection {
        AuthorityRejection {
            status_code: "302".to_string(),
            reason: "Rejeição: Irregularidade fiscal do emitente".to_string(),
        }
    }

    pub(crate) fn service_up() -> ServiceStatus {
        ServiceStatus {
            status_code: "107".to_string(),
            reason: "Serviço em Operação".to_string(),
        }
    }

    pub(crate) async fn engine_with(stub: StubAuthority) -> EmissionEngine<StubAuthority> {
        let db = Database::new(DbConfig::in_memory())
            .await
            .expect("in-memory db");
        db.establishments()
            .insert(&sample_establishment())
            .await
            .expect("establishment fixture");
        EmissionEngine::new(db, stub, test_config())
    }

    #[tokio::test]
    async fn test_emit_authorized_end_to_end() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_now())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document = match outcome {
            EmissionOutcome::Authorized(doc) => doc,
            other => panic!("expected authorized outcome, got {other:?}"),
        };

        assert_eq!(document.status, DocumentStatus::Authorized);
        assert_eq!(document.series, 1);
        assert_eq!(document.number, 1);
        assert_eq!(document.emission_type, EmissionType::Normal);
        assert_eq!(document.protocol_number.as_deref(), Some("135260000000101"));
        assert!(document.authorized_at.is_some());

        let key = AccessKey::parse(&document.access_key).unwrap();
        assert_eq!(key.series(), 1);
        assert_eq!(key.number(), 1);
        assert_eq!(key.model(), MODEL_NFCE);
        assert!(!key.is_contingency());

        // Persisted with its final status, items included.
        let stored = engine
            .db
            .documents()
            .get_by_id(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Authorized);
        let items = engine.db.documents().get_items(&document.id).await.unwrap();
        assert_eq!(items.len(), 2);

        // The counter moved past the consumed number.
        let next = engine
            .db
            .counters()
            .peek_next_number("est-1", 1)
            .await
            .unwrap();
        assert_eq!(next, 2);
    }

    #[tokio::test]
    async fn test_submitted_xml_is_the_signed_document() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_now())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document = outcome.document().unwrap();

        let submitted = engine.authority().submitted_xml.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].starts_with("<NFe"));
        assert!(submitted[0].contains("<Signature"));
        assert!(submitted[0].contains(&format!("Id=\"NFe{}\"", document.access_key)));
        // What was stored is exactly what went over the wire.
        assert_eq!(document.signed_xml.as_deref(), Some(submitted[0].as_str()));
    }

    #[tokio::test]
    async fn test_emit_rejected_persists_and_burns_the_number() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Rejected(rejection_302())))
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_now())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let rejected = match outcome {
            EmissionOutcome::Rejected(doc) => doc,
            other => panic!("expected rejected outcome, got {other:?}"),
        };
        assert_eq!(rejected.status, DocumentStatus::Rejected);
        assert_eq!(rejected.status_code.as_deref(), Some("302"));
        assert_eq!(rejected.number, 1);

        // The burned number is never reissued; the next sale moves on.
        let outcome = engine.emit(&sample_request()).await.unwrap();
        assert_eq!(outcome.document().unwrap().number, 2);
    }

    #[tokio::test]
    async fn test_emit_batched_polls_until_authorized() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string(),
            }))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Authorized(verdict_now())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document = match outcome {
            EmissionOutcome::Authorized(doc) => doc,
            other => panic!("expected authorized outcome, got {other:?}"),
        };
        assert_eq!(document.receipt_number.as_deref(), Some("351000012345678"));

        let queries = engine.authority().receipt_queries.lock().unwrap();
        assert_eq!(queries.as_slice(), ["351000012345678", "351000012345678"]);
    }

    #[tokio::test]
    async fn test_emit_batched_exhausts_into_inconclusive() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string(),
            }))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Processing));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document = match outcome {
            EmissionOutcome::Inconclusive(doc) => doc,
            other => panic!("expected inconclusive outcome, got {other:?}"),
        };
        assert_eq!(document.status, DocumentStatus::Error);
        assert_eq!(document.receipt_number.as_deref(), Some("351000012345678"));

        let stored = engine
            .db
            .documents()
            .get_by_id(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
        assert!(stored.receipt_number.is_some());
    }

    #[tokio::test]
    async fn test_poll_errors_do_not_fail_the_sale() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string(),
            }))
            .expect_receipt(Err(EngineError::Timeout("deadline elapsed".to_string())))
            .expect_receipt(Ok(ReceiptOutcome::Authorized(verdict_now())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        assert!(outcome.is_authorized());
    }

    #[tokio::test]
    async fn test_emit_freezes_offline_when_the_probe_finds_the_authority_down() {
        let stub = StubAuthority::new().expect_status(Err(EngineError::ConnectionFailed(
            "connection refused".to_string(),
        )));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let record = match outcome {
            EmissionOutcome::Offline(record) => record,
            other => panic!("expected offline outcome, got {other:?}"),
        };
        assert_eq!(record.offline_number, 1);
        let key = AccessKey::parse(&record.offline_key).unwrap();
        assert!(key.is_contingency());

        // The frozen payload restores the original request, byte for byte.
        let restored = EmissionRequest::from_payload(&record.payload).unwrap();
        assert_eq!(restored, sample_request());

        // No document row, and no online number was touched: the probe
        // failed before the allocator ran.
        let docs = engine
            .db
            .documents()
            .list("est-1", &DocumentFilter::default())
            .await
            .unwrap();
        assert!(docs.is_empty());
        assert_eq!(
            engine
                .db
                .counters()
                .peek_next_number("est-1", 1)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            engine
                .db
                .counters()
                .peek_next_offline_number("est-1")
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_emit_freezes_offline_when_the_service_is_not_in_operation() {
        let stub = StubAuthority::new().expect_status(Ok(ServiceStatus {
            status_code: "108".to_string(),
            reason: "Serviço Paralisado Momentaneamente".to_string(),
        }));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        assert!(matches!(outcome, EmissionOutcome::Offline(_)));
    }

    #[tokio::test]
    async fn test_emit_freezes_offline_when_the_authority_drops_mid_submission() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Err(EngineError::ConnectionFailed(
                "connection reset by peer".to_string(),
            )));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let record = match outcome {
            EmissionOutcome::Offline(record) => record,
            other => panic!("expected offline outcome, got {other:?}"),
        };
        assert_eq!(record.offline_number, 1);

        // The probe passed, so an online number was allocated for the
        // doomed submission. It burns; the next sale moves past it.
        assert_eq!(
            engine
                .db
                .counters()
                .peek_next_number("est-1", 1)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_certificate_failure_blocks_both_paths() {
        let engine = engine_with(StubAuthority::new()).await;
        let mut broken = sample_establishment();
        broken.id = "est-bad".to_string();
        broken.tax_id = "11222333000181".to_string();
        broken.certificate_path = "/nonexistent/cert.pem".to_string();
        engine.db.establishments().insert(&broken).await.unwrap();

        let mut request = sample_request();
        request.establishment_id = "est-bad".to_string();

        let err = engine.emit(&request).await.unwrap_err();
        assert!(matches!(err, EngineError::CertificateLoad(_)));

        // Nothing was frozen offline and no number was consumed.
        let pending = engine
            .db
            .contingency()
            .list_pending("est-bad", 10)
            .await
            .unwrap();
        assert!(pending.is_empty());
        assert_eq!(
            engine
                .db
                .counters()
                .peek_next_number("est-bad", 1)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_request_reaches_no_counter_and_no_wire() {
        // The unscripted stub doubles as the assertion: a probe or submit
        // would panic.
        let engine = engine_with(StubAuthority::new()).await;
        let mut request = sample_request();
        request.items.clear();

        let err = engine.emit(&request).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(_)));
        assert_eq!(
            engine
                .db
                .counters()
                .peek_next_number("est-1", 1)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_within_window() {
        let reason = "Registro incorreto do valor da venda";
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_now())))
            .expect_cancel(Ok(CancelOutcome::Registered {
                protocol_number: "135260000000999".to_string(),
                registered_at: Utc::now(),
            }));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let cancelled = engine.cancel(&document_id, reason).await.unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Cancelled);
        assert_eq!(
            cancelled.cancellation_protocol.as_deref(),
            Some("135260000000999")
        );
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some(reason));
        assert!(cancelled.cancelled_at.is_some());

        let events = engine.authority().cancelled_xml.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("<evento"));
        assert!(events[0].contains("<Signature"));
        assert!(events[0].contains(reason));
    }

    #[tokio::test]
    async fn test_cancel_after_window_never_reaches_the_authority() {
        let late = Utc::now() - Duration::minutes(31);
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_at(late))));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let err = engine
            .cancel(&document_id, "Registro incorreto do valor da venda")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CancellationWindowClosed { .. }));

        // An unscripted stub would panic if the event had been sent.
        let stored = engine
            .db
            .documents()
            .get_by_id(&document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Authorized);
    }

    #[tokio::test]
    async fn test_cancel_refused_leaves_document_authorized() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_now())))
            .expect_cancel(Ok(CancelOutcome::Refused {
                status_code: "573".to_string(),
                reason: "Rejeição: Duplicidade de evento".to_string(),
            }));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let err = engine
            .cancel(&document_id, "Registro incorreto do valor da venda")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CancelRefused { ref status_code, .. } if status_code == "573"
        ));

        let stored = engine
            .db
            .documents()
            .get_by_id(&document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Authorized);
    }

    #[tokio::test]
    async fn test_cancel_requires_an_authorized_document() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Rejected(rejection_302())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let err = engine
            .cancel(&document_id, "Registro incorreto do valor da venda")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_rejects_a_short_justification() {
        let engine = engine_with(StubAuthority::new()).await;
        let err = engine.cancel("doc-any", "curta").await.unwrap_err();
        assert!(matches!(err, EngineError::Core(_)));
    }

    #[tokio::test]
    async fn test_follow_up_resolves_authorized() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string(),
            }))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Authorized(verdict_now())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let resolved = engine.follow_up(&document_id).await.unwrap();
        assert_eq!(resolved.status, DocumentStatus::Authorized);
        assert_eq!(resolved.protocol_number.as_deref(), Some("135260000000101"));
        assert!(resolved.authorized_at.is_some());
    }

    #[tokio::test]
    async fn test_follow_up_resolves_rejected() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string(),
            }))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Rejected(rejection_302())));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let resolved = engine.follow_up(&document_id).await.unwrap();
        assert_eq!(resolved.status, DocumentStatus::Rejected);
        assert_eq!(resolved.status_code.as_deref(), Some("302"));
    }

    #[tokio::test]
    async fn test_follow_up_leaves_processing_untouched() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string(),
            }))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Processing))
            .expect_receipt(Ok(ReceiptOutcome::Processing));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let document_id = outcome.document().unwrap().id.clone();

        let unchanged = engine.follow_up(&document_id).await.unwrap();
        assert_eq!(unchanged.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn test_follow_up_without_receipt_is_an_error() {
        let engine = engine_with(StubAuthority::new()).await;

        // Forge the one shape emit never produces: error with no receipt.
        let key = AccessKey::build(&KeyFields {
            state_code: 35,
            year: 2026,
            month: 8,
            tax_id: "12345678000195".to_string(),
            series: 1,
            number: 77,
            emission_type: EmissionType::Normal,
            random_code: 5_551_234,
        })
        .unwrap();
        let now = Utc::now();
        let document = FiscalDocument {
            id: "doc-broken".to_string(),
            establishment_id: "est-1".to_string(),
            environment: Environment::Homologation,
            series: 1,
            number: 77,
            emission_type: EmissionType::Normal,
            access_key: key.into_string(),
            status: DocumentStatus::Error,
            issued_at: now,
            customer: None,
            payment: PaymentInfo {
                method: PaymentMethod::Cash,
                amount_cents: 1100,
                change_cents: 17,
            },
            total_products_cents: 1000,
            total_discount_cents: 0,
            total_tax_cents: 83,
            total_amount_cents: 1083,
            protocol_number: None,
            authorized_at: None,
            status_code: None,
            status_reason: None,
            receipt_number: None,
            cancelled_at: None,
            cancellation_protocol: None,
            cancellation_reason: None,
            signed_xml: None,
            contingency_record_id: None,
            created_at: now,
            updated_at: now,
        };
        engine
            .db
            .documents()
            .insert_with_items(&document, &[])
            .await
            .unwrap();

        let err = engine.follow_up("doc-broken").await.unwrap_err();
        assert!(matches!(err, EngineError::MissingReceipt(_)));
    }

    #[tokio::test]
    async fn test_check_service_probes_the_authority() {
        let stub = StubAuthority::new().expect_status(Ok(ServiceStatus {
            status_code: "107".to_string(),
            reason: "Serviço em Operação".to_string(),
        }));
        let engine = engine_with(stub).await;

        let status = engine.check_service("est-1").await.unwrap();
        assert!(status.is_available());
    }

    #[tokio::test]
    async fn test_query_standing_round_trips_the_key() {
        let stub = StubAuthority::new()
            .expect_status(Ok(service_up()))
            .expect_submit(Ok(SubmissionOutcome::Authorized(verdict_now())))
            .expect_standing(Ok(DocumentStanding {
                status_code: "100".to_string(),
                reason: "Autorizado o uso da NF-e".to_string(),
                protocol_number: Some("135260000000101".to_string()),
            }));
        let engine = engine_with(stub).await;

        let outcome = engine.emit(&sample_request()).await.unwrap();
        let access_key = outcome.document().unwrap().access_key.clone();

        let standing = engine.query_standing(&access_key).await.unwrap();
        assert!(standing.is_authorized());

        let queried = engine.authority().key_queries.lock().unwrap();
        assert_eq!(queried.as_slice(), [access_key.as_str()]);
    }

    #[tokio::test]
    async fn test_unknown_establishment_is_rejected_up_front() {
        let engine = engine_with(StubAuthority::new()).await;
        let mut request = sample_request();
        request.establishment_id = "est-missing".to_string();

        let err = engine.emit(&request).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::EstablishmentNotFound(_))
        ));
    }

    #[test]
    fn test_draw_random_code_never_echoes_the_number() {
        for number in [0, 1, 42, MAX_RANDOM_CODE] {
            for _ in 0..50 {
                let code = draw_random_code(number);
                assert_ne!(code, number);
                assert!((0..=MAX_RANDOM_CODE).contains(&code));
            }
        }
    }
}
