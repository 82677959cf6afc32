//! # fisco-engine: Emission Engine for Fisco
//!
//! This crate drives a consumer fiscal document from sale request to tax
//! authority verdict, with offline-first contingency when the authority is
//! unreachable.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Emission Engine Architecture                     │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  EmissionEngine (Main Orchestrator)              │  │
//! │  │                                                                  │  │
//! │  │  emit / cancel / follow_up / reconcile                           │  │
//! │  │  Decides online vs offline, persists every verdict               │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ DocumentXml    │  │   XmlSigner    │  │  AuthorityClient       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Renders layout │  │ SHA-1/RSA      │  │ SOAP 1.2 over mutual   │    │
//! │  │ 4.00 NFC-e XML │  │ enveloped      │  │ TLS (reqwest/rustls)   │    │
//! │  │ from documents │  │ XML-DSig       │  │ or a scripted stub     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  OFFLINE PATH:                                                          │
//! │  ────────────                                                           │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Contingency    │  │ Reconciliation │  │  MerchantCertificate   │    │
//! │  │ recording      │  │                │  │                        │    │
//! │  │ Series 900 key │  │ Probe first,   │  │ Encrypted PKCS#8 key   │    │
//! │  │ frozen payload │  │ replay oldest, │  │ X.509 validity window  │    │
//! │  │ never deleted  │  │ ≤3 attempts    │  │ feeds TLS + signatures │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Pipeline Modules
//! - [`emission`] - Main `EmissionEngine` orchestrator (emit, cancel, follow up)
//! - [`contingency`] - Offline recording and reconciliation
//! - [`config`] - Engine configuration (TOML file + env overrides)
//! - [`error`] - Engine error types and retry classification
//!
//! ### Document Modules
//! - [`xml`] - Canonical XML tree used for rendering and digesting
//! - [`document_xml`] - Layout 4.00 rendering of documents and cancel events
//! - [`signer`] - Enveloped XML-DSig signatures (SHA-1 digest, RSA PKCS#1 v1.5)
//! - [`certificate`] - Merchant certificate loading and validity checks
//!
//! ### Authority Modules
//! - [`authority`] - `AuthorityClient` trait, response parsing, status codes
//! - [`endpoints`] - Webservice URL resolution per state and environment
//! - [`webservice`] - SOAP 1.2 client over mutual TLS
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fisco_engine::{EmissionEngine, EngineConfig, SefazWebservice};
//! use fisco_core::EmissionRequest;
//! use fisco_db::Database;
//!
//! let config = EngineConfig::load(None)?;
//! let database = Database::new(db_config).await?;
//! let engine = EmissionEngine::new(database, SefazWebservice::new(&config), config);
//!
//! // Emit a sale; falls back to contingency when the authority is down
//! match engine.emit(&request).await? {
//!     EmissionOutcome::Authorized(doc) => println!("protocol {:?}", doc.protocol_number),
//!     EmissionOutcome::Offline(record) => println!("queued as {}", record.offline_key),
//!     other => println!("{other:?}"),
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Pipeline modules
pub mod config;
pub mod contingency;
pub mod emission;
pub mod error;

// Document modules
pub mod certificate;
pub mod document_xml;
pub mod signer;
pub mod xml;

// Authority modules
pub mod authority;
pub mod endpoints;
pub mod webservice;

// Scripted authority used across the crate's tests
#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

// Pipeline types
pub use config::{AuthoritySettings, ContingencySettings, EngineConfig, TaxSettings};
pub use contingency::ReconciliationReport;
pub use emission::{EmissionEngine, EmissionOutcome};
pub use error::{EngineError, EngineResult};

// Document types
pub use certificate::MerchantCertificate;
pub use signer::XmlSigner;
pub use xml::{XmlElement, XmlNode};

// Authority types
pub use authority::{
    AuthorityClient, AuthorityContext, AuthorityRejection, AuthorityVerdict, CancelOutcome,
    DocumentStanding, ReceiptOutcome, ServiceStatus, SubmissionOutcome,
};
pub use endpoints::AuthorityService;
pub use webservice::SefazWebservice;
