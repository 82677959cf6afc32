//! # Domain Types
//!
//! Core domain types used throughout Fisco.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ EmissionRequest  │   │  FiscalDocument  │   │ContingencyRecord │    │
//! │  │  ──────────────  │   │  ──────────────  │   │  ──────────────  │    │
//! │  │  items           │──►│  series/number   │   │  offline_number  │    │
//! │  │  customer        │   │  access_key      │   │  offline_key     │    │
//! │  │  payment         │   │  totals, status  │◄──│  payload, status │    │
//! │  └──────────────────┘   │  protocol        │   │  attempts        │    │
//! │                         └──────────────────┘   └──────────────────┘    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │  DocumentStatus  │   │   EmissionType   │   │    SyncStatus    │    │
//! │  │  ──────────────  │   │   ────────────   │   │   ───────────    │    │
//! │  │  Draft→…→        │   │   Normal    "1"  │   │   Pending        │    │
//! │  │  Authorized      │   │   Contingency"9" │   │   Synced         │    │
//! │  │  →Cancelled      │   └──────────────────┘   │   Error          │    │
//! │  └──────────────────┘                          └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every persisted entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Fiscal identity: (establishment, series, number) and the access key -
//!   what the authority and auditors know the document by

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::Money;
use crate::validation;

// =============================================================================
// Environment
// =============================================================================

/// Which authority environment documents are submitted to.
///
/// Homologation documents carry no fiscal validity; every establishment
/// must be exercised there before being switched to production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Documents are legally binding.
    Production,
    /// Authority test environment.
    Homologation,
}

impl Environment {
    /// The `tpAmb` digit used in the document XML.
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Homologation
    }
}

// =============================================================================
// Emission Type
// =============================================================================

/// How the document was issued: against a reachable authority, or offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum EmissionType {
    /// Issued online, authorized before delivery.
    Normal,
    /// Issued offline under contingency, reconciled later.
    Contingency,
}

impl EmissionType {
    /// The `tpEmis` digit used in the access key and document XML.
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            EmissionType::Normal => 1,
            EmissionType::Contingency => 9,
        }
    }

    /// Maps a key digit back to an emission type, if it is one this
    /// system issues.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EmissionType::Normal),
            9 => Some(EmissionType::Contingency),
            _ => None,
        }
    }
}

// =============================================================================
// Document Status
// =============================================================================

/// The lifecycle state of a fiscal document.
///
/// The legal transition table lives in [`crate::lifecycle`]; this enum is
/// just the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Built and totalled, not yet numbered into XML.
    Draft,
    /// Numbered, rendered to XML and signed.
    Generated,
    /// Sent to the authority, outcome not yet recorded.
    Submitted,
    /// Authority granted a protocol number. The only state a cancellation
    /// may start from.
    Authorized,
    /// Authority explicitly refused the document. The number is burned.
    Rejected,
    /// Submission round-trip did not produce a verdict (e.g. batch still
    /// processing after the poll budget). Needs follow-up by receipt.
    Error,
    /// Authorized, then cancelled within the legal window.
    Cancelled,
}

// =============================================================================
// Sync Status
// =============================================================================

/// Reconciliation state of a contingency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting for a reconciliation pass.
    Pending,
    /// Re-emitted online; `document_id` links the resulting document.
    Synced,
    /// Exhausted its reconciliation attempts; needs operator attention.
    Error,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Pending
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// Payment methods the document schema recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    Pix,
    Other,
}

impl PaymentMethod {
    /// The `tPag` code used in the document XML payment block.
    pub const fn code(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "01",
            PaymentMethod::CreditCard => "03",
            PaymentMethod::DebitCard => "04",
            PaymentMethod::Pix => "17",
            PaymentMethod::Other => "99",
        }
    }
}

// =============================================================================
// Emission Request
// =============================================================================

/// One sale line as the caller submits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    /// Merchant's product code.
    pub code: String,
    /// Description printed on the receipt.
    pub description: String,
    /// NCM commodity classification (8 digits).
    pub ncm: String,
    /// CFOP operation code (4 digits).
    pub cfop: String,
    /// Quantity in hundredths of a unit (250 = 2.50).
    pub quantity_hundredths: i64,
    /// Unit price in cents.
    pub unit_price_cents: i64,
}

/// Payment as the caller submits it (change is computed, not supplied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    /// Amount tendered, in cents.
    pub amount_cents: i64,
}

/// Optional consumer identification.
///
/// A consumer receipt may be issued to an anonymous buyer; when a tax id
/// is present it must be a valid CPF or CNPJ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub tax_id: Option<String>,
    pub name: Option<String>,
}

/// A request to emit one fiscal document.
///
/// This is the exact payload frozen into a [`ContingencyRecord`] when the
/// authority is unreachable, so it must serialize losslessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRequest {
    pub establishment_id: String,
    pub items: Vec<ItemRequest>,
    pub customer: Option<CustomerInfo>,
    pub payment: Option<PaymentRequest>,
    /// Document-level discount, in cents.
    #[serde(default)]
    pub discount_cents: i64,
}

impl EmissionRequest {
    /// Serializes the request for contingency storage.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores a request from a stored contingency payload.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

// =============================================================================
// Payment Info (computed)
// =============================================================================

/// Payment as recorded on the document: method, amount and change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub amount_cents: i64,
    /// `amount - total`, never negative (coverage is validated first).
    pub change_cents: i64,
}

impl PaymentInfo {
    /// Returns the tendered amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// Returns the change as Money.
    #[inline]
    pub fn change(&self) -> Money {
        Money::from_cents(self.change_cents)
    }
}

// =============================================================================
// Fiscal Document
// =============================================================================

/// A fiscal document as persisted.
///
/// ## Lifecycle Note
/// A row exists only after the emission pipeline has run a submission
/// round-trip (online path) or after a contingency record is promoted by
/// reconciliation. Drafts never hit the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: String,
    pub establishment_id: String,
    pub environment: Environment,
    /// Numbering partition; online documents use the establishment's
    /// active series, reconciled ones too (they get fresh online numbers).
    pub series: i64,
    pub number: i64,
    pub emission_type: EmissionType,
    /// The 44-digit access key. Always produced by
    /// [`crate::access_key::AccessKey::build`], never assembled by hand.
    pub access_key: String,
    pub status: DocumentStatus,
    pub issued_at: DateTime<Utc>,
    pub customer: Option<CustomerInfo>,
    pub payment: PaymentInfo,
    pub total_products_cents: i64,
    pub total_discount_cents: i64,
    pub total_tax_cents: i64,
    pub total_amount_cents: i64,
    /// Authority protocol number, present once authorized.
    pub protocol_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    /// Last authority status code observed for this document.
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    /// Batch receipt number, kept when the submission outcome was still
    /// processing after the poll budget (status [`DocumentStatus::Error`]).
    pub receipt_number: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_protocol: Option<String>,
    pub cancellation_reason: Option<String>,
    /// The exact signed XML submitted to the authority.
    pub signed_xml: Option<String>,
    /// Backlink to the contingency record this document reconciles,
    /// if it was born offline.
    pub contingency_record_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FiscalDocument {
    /// Returns the product total as Money.
    #[inline]
    pub fn total_products(&self) -> Money {
        Money::from_cents(self.total_products_cents)
    }

    /// Returns the discount total as Money.
    #[inline]
    pub fn total_discount(&self) -> Money {
        Money::from_cents(self.total_discount_cents)
    }

    /// Returns the tax total as Money.
    #[inline]
    pub fn total_tax(&self) -> Money {
        Money::from_cents(self.total_tax_cents)
    }

    /// Returns the grand total as Money.
    #[inline]
    pub fn total_amount(&self) -> Money {
        Money::from_cents(self.total_amount_cents)
    }
}

// =============================================================================
// Document Item
// =============================================================================

/// A persisted document line.
/// Uses the snapshot pattern: descriptions and prices are frozen at
/// emission time and never re-resolved against a product catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DocumentItem {
    pub id: String,
    pub document_id: String,
    /// 1-based position within the document (`nItem`).
    pub line_number: i64,
    pub code: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub quantity_hundredths: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
    pub tax_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl DocumentItem {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns the line total as Money.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

// =============================================================================
// Contingency Record
// =============================================================================

/// A sale taken while the authority was unreachable.
///
/// The record freezes the *original, unmodified* emission request; the
/// reconciliation pass replays it through the online pipeline with a
/// fresh number and key. Offline numbers are never promoted in place,
/// and records are never deleted - failed ones stay visible for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ContingencyRecord {
    pub id: String,
    pub establishment_id: String,
    /// Position in the per-establishment offline counter (not per series).
    pub offline_number: i64,
    /// Access key issued offline: contingency series, emission type 9.
    pub offline_key: String,
    /// The serialized [`EmissionRequest`].
    pub payload: String,
    pub sync_status: SyncStatus,
    /// Reconciliation attempts consumed so far.
    pub attempts: i64,
    pub last_error: Option<String>,
    /// The fiscal document created by a successful sync.
    pub document_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Contingency Statistics
// =============================================================================

/// Aggregate contingency health for one establishment, exposed to
/// dashboards and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyStatistics {
    pub establishment_id: String,
    /// Records waiting for reconciliation.
    pub pending: i64,
    /// Records promoted into fiscal documents.
    pub synced: i64,
    /// Records that exhausted their attempts ([`SyncStatus::Error`]).
    pub failed: i64,
    pub total: i64,
    /// Age marker for monitoring: creation time of the oldest record
    /// still pending.
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Establishment Fiscal Configuration
// =============================================================================

/// Per-establishment fiscal configuration.
///
/// Owned by merchant onboarding (out of scope here); the emission engine
/// only reads it. The certificate password is stored as the onboarding
/// flow delivered it - protecting that secret at rest is the platform's
/// concern, not this crate's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EstablishmentConfig {
    pub id: String,
    /// Issuer CNPJ, 14 digits.
    pub tax_id: String,
    pub legal_name: String,
    pub trade_name: Option<String>,
    /// State tax registration (IE).
    pub state_registration: String,
    /// IBGE federation-unit code; routes authority endpoints and keys.
    pub state_code: i64,
    /// IBGE municipality code (7 digits).
    pub municipality_code: i64,
    pub address_street: String,
    pub address_number: String,
    pub address_district: String,
    pub address_city: String,
    /// Two-letter state abbreviation for the address block.
    pub address_state: String,
    /// CEP, 8 digits.
    pub address_zip: String,
    pub environment: Environment,
    /// Series used for online emission (1-899).
    pub active_series: i64,
    /// Path to the certificate container (PEM with certificate and
    /// private key).
    pub certificate_path: String,
    pub certificate_password: String,
    /// CRT tax regime code (1 = Simples Nacional).
    pub tax_regime: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EstablishmentConfig {
    /// Validates the fiscal fields the emission pipeline depends on.
    ///
    /// Run when the configuration is loaded for an operation, so a broken
    /// row fails loudly instead of producing keys the authority rejects.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_cnpj(&self.tax_id)?;
        validation::validate_state_code(self.state_code)?;
        validation::validate_online_series(self.active_series)?;
        validation::validate_cep(&self.address_zip)?;

        if self.legal_name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "legal_name".to_string(),
            });
        }

        if self.state_registration.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "state_registration".to_string(),
            });
        }

        if self.certificate_path.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "certificate_path".to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Document Filter
// =============================================================================

/// Filters for document listing queries.
///
/// All fields are optional and combine with AND semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub status: Option<DocumentStatus>,
    pub series: Option<i64>,
    pub emission_type: Option<EmissionType>,
    pub issued_after: Option<DateTime<Utc>>,
    pub issued_before: Option<DateTime<Utc>>,
    /// Maximum rows to return (newest first). Unset means the repository
    /// default.
    pub limit: Option<i64>,
}

// =============================================================================
// Unit Tests
// =============================================================================
