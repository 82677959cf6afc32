//! # fisco-core: Pure Fiscal Logic for Fisco
//!
//! This crate is the **heart** of Fisco. It contains all fiscal document
//! logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Fisco Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Callers (POS, API, back office)                 │   │
//! │  │      emit sale ──► cancel document ──► reconcile offline        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              fisco-engine (signing + authority I/O)             │   │
//! │  │    certificate • XML-DSig • SEFAZ webservice • contingency      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fisco-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐       │   │
//! │  │  │access_key │ │  builder  │ │ lifecycle │ │ validation│       │   │
//! │  │  │ 44 digits │ │  totals   │ │  states   │ │ CNPJ/CPF  │       │   │
//! │  │  │ mod-11 DV │ │  drafts   │ │  table    │ │  rules    │       │   │
//! │  │  └───────────┘ └───────────┘ └───────────┘ └───────────┘       │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    fisco-db (Database Layer)                    │   │
//! │  │          SQLite queries, migrations, counter allocation         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (FiscalDocument, ContingencyRecord, etc.)
//! - [`money`] - Money and Quantity types with integer arithmetic (no floats!)
//! - [`access_key`] - The 44-digit self-checking document identifier
//! - [`builder`] - Emission request → canonical document draft
//! - [`lifecycle`] - Document status transition table
//! - [`error`] - Domain error types
//! - [`validation`] - Fiscal rule validation (CNPJ/CPF, state codes, ...)
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use fisco_core::access_key::{AccessKey, KeyFields};
//! use fisco_core::types::EmissionType;
//!
//! let key = AccessKey::build(&KeyFields {
//!     state_code: 35,
//!     year: 2026,
//!     month: 8,
//!     tax_id: "12345678000195".to_string(),
//!     series: 1,
//!     number: 42,
//!     emission_type: EmissionType::Normal,
//!     random_code: 12_345_678,
//! }).unwrap();
//!
//! // The last digit is a mod-11 self check over the preceding 43
//! assert_eq!(key.as_str(), "35260812345678000195650010000000421123456783");
//! assert_eq!(key.check_digit(), 3);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access_key;
pub mod builder;
pub mod error;
pub mod lifecycle;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use fisco_core::Money` instead of
// `use fisco_core::money::Money`

pub use access_key::AccessKey;
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Quantity};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fiscal model of every document this system emits: 65, the electronic
/// consumer receipt. Model 55 (the full invoice) is out of scope.
///
/// ## Why a constant?
/// The model participates in the access key layout and the XML `mod` field.
/// Hard-coding it in one place keeps the two from drifting apart.
pub const MODEL_NFCE: i64 = 65;

/// Series reserved for offline contingency emission.
///
/// ## Why 900?
/// The authority reserves the 900-999 series block for contingency issuance.
/// Online series are restricted to 1-899 so the two numbering spaces can
/// never collide.
pub const CONTINGENCY_SERIES: i64 = 900;

/// Highest series value the key layout can represent (3 digits).
pub const MAX_SERIES: i64 = 999;

/// Highest online series an establishment may be configured with.
/// 900+ is the contingency block (see [`CONTINGENCY_SERIES`]).
pub const MAX_ONLINE_SERIES: i64 = 899;

/// Highest document number the key layout can represent (9 digits).
/// A series that reaches this value is exhausted and must be rotated.
pub const MAX_DOCUMENT_NUMBER: i64 = 999_999_999;

/// Highest random code the key layout can represent (8 digits).
pub const MAX_RANDOM_CODE: i64 = 99_999_999;

/// Maximum line items in a single document.
///
/// ## Business Reason
/// The authority caps consumer receipts at 500 line items; larger sales
/// must be split across documents by the caller.
pub const MAX_DOCUMENT_ITEMS: usize = 500;
