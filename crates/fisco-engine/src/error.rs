//! Error types for the emission engine
//!
//! Groups failures by where they originate in the pipeline: configuration,
//! merchant certificate, XML/signing, transport, authority verdicts, and the
//! storage layer underneath. The classification methods at the bottom drive
//! behavior: a connectivity error sends an emission down the contingency
//! path, a certificate error refuses the sale outright.

use chrono::{DateTime, Utc};
use fisco_core::{CoreError, ValidationError};
use fisco_db::DbError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while emitting, cancelling, or reconciling documents
#[derive(Error, Debug)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    /// Configuration file could not be written
    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    /// Configuration contains an invalid value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Certificate Errors
    // =========================================================================
    /// Certificate file missing, unreadable, or not a usable PEM bundle
    #[error("Failed to load merchant certificate: {0}")]
    CertificateLoad(String),

    /// Private key decryption failed (wrong password or corrupt container)
    #[error("Failed to decrypt certificate private key: {0}")]
    CertificateDecrypt(String),

    /// Certificate validity window has already ended
    #[error("Merchant certificate expired at {not_after}")]
    CertificateExpired { not_after: DateTime<Utc> },

    /// Certificate validity window has not started yet
    #[error("Merchant certificate not valid before {not_before}")]
    CertificateNotYetValid { not_before: DateTime<Utc> },

    // =========================================================================
    // XML and Signature Errors
    // =========================================================================
    /// Document or event XML could not be produced or signed
    #[error("Signature failed: {0}")]
    Signing(String),

    /// Authority response was not parseable XML
    #[error("Malformed XML: {0}")]
    XmlMalformed(String),

    /// Authority response parsed but lacked a required field
    #[error("Authority response missing {0}")]
    MissingResponseField(&'static str),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// TCP/TLS connection to the authority could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request exceeded the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Request failed in flight (reset, truncated body, protocol error)
    #[error("Transport error: {0}")]
    Transport(String),

    // =========================================================================
    // Authority Errors
    // =========================================================================
    /// Authority answered the status service with anything but "in operation"
    #[error("Authority service unavailable: {status_code} - {reason}")]
    ServiceUnavailable { status_code: String, reason: String },

    /// Authority refused to register the cancellation event
    #[error("Cancellation refused: {status_code} - {reason}")]
    CancelRefused { status_code: String, reason: String },

    /// Authority returned a status code the pipeline does not know how to act on
    #[error("Unexpected authority status: {status_code} - {reason}")]
    UnexpectedStatus { status_code: String, reason: String },

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Cancellation requested after the legal window closed
    #[error("Cancellation window closed at {deadline}")]
    CancellationWindowClosed { deadline: DateTime<Utc> },

    /// Follow-up requested for a document that never received a receipt number
    #[error("Document {0} has no pending receipt to follow up")]
    MissingReceipt(String),

    /// Storage layer failure
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Domain rule violation from the core layer
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Invariant violation that indicates a bug rather than bad input
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this failure means the authority could not be reached.
    ///
    /// Connectivity failures are the trigger for offline contingency: the
    /// sale still happened, so the engine records it locally instead of
    /// failing it. Everything else (bad XML, refused signature, domain rule)
    /// would fail identically offline and is surfaced to the caller.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            EngineError::ConnectionFailed(_)
                | EngineError::Timeout(_)
                | EngineError::Transport(_)
                | EngineError::ServiceUnavailable { .. }
        )
    }

    /// Whether this failure originates in the merchant certificate.
    ///
    /// Certificate failures block the offline path too: a contingency
    /// document must eventually be signed with the same certificate, so
    /// queueing it would only move the failure to reconciliation time.
    pub fn is_certificate_error(&self) -> bool {
        matches!(
            self,
            EngineError::CertificateLoad(_)
                | EngineError::CertificateDecrypt(_)
                | EngineError::CertificateExpired { .. }
                | EngineError::CertificateNotYetValid { .. }
        )
    }

    /// Whether retrying the same operation later can succeed without
    /// operator intervention.
    pub fn is_retryable(&self) -> bool {
        self.is_connectivity()
    }

    /// Whether this failure requires fixing the deployment configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigLoad(_)
                | EngineError::ConfigSave(_)
                | EngineError::InvalidConfig(_)
        )
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(err.to_string())
        } else if err.is_connect() {
            EngineError::ConnectionFailed(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

impl From<quick_xml::Error> for EngineError {
    fn from(err: quick_xml::Error) -> Self {
        EngineError::XmlMalformed(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", err))
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::from(err))
    }
}

// =============================================================================
// Tests
// =============================================================================
