//! # Error Types
//!
//! Domain-specific error types for fisco-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fisco-core errors (this file)                                         │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  fisco-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  fisco-engine errors (separate crate)                                  │
//! │  └── EngineError      - Certificate, connectivity, authority outcomes  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (key, number, field, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

use crate::types::DocumentStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core fiscal logic errors.
///
/// These errors represent fiscal rule violations or domain logic failures.
/// They should be caught and translated to user-friendly messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Establishment cannot be found.
    ///
    /// ## When This Occurs
    /// - An emission request references an establishment id with no
    ///   fiscal configuration row
    #[error("Establishment not found: {0}")]
    EstablishmentNotFound(String),

    /// Fiscal document cannot be found.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A document status transition that the lifecycle table forbids.
    ///
    /// ## When This Occurs
    /// - Submitting a document that was never generated
    /// - Cancelling a rejected document
    /// - Touching any terminal document
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// Payment does not cover the document total.
    ///
    /// ## When This Occurs
    /// - Tendered amount is below `total_products - discounts + tax`
    #[error("Payment of {paid_cents} cents does not cover document total of {total_cents} cents")]
    InsufficientPayment { total_cents: i64, paid_cents: i64 },

    /// Document has exceeded the maximum item count.
    #[error("Document cannot have more than {max} items (got {count})")]
    TooManyItems { count: usize, max: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when an emission request or identifier doesn't meet
/// fiscal requirements. Used for early validation before any sequence
/// number is allocated.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., non-digit tax id, malformed key).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A self-checking identifier failed its check digit.
    ///
    /// ## When This Occurs
    /// - Parsing a 44-digit access key whose last digit does not match
    ///   the mod-11 computation over the preceding 43
    /// - Validating a CNPJ/CPF with corrupted verifier digits
    #[error("{field} check digit mismatch: expected {expected}, found {found}")]
    InvalidCheckDigit {
        field: String,
        expected: u8,
        found: u8,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientPayment {
            total_cents: 1250,
            paid_cents: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Payment of 1000 cents does not cover document total of 1250 cents"
        );

        let err = CoreError::InvalidTransition {
            from: DocumentStatus::Rejected,
            to: DocumentStatus::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: Rejected -> Cancelled"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "payment".to_string(),
        };
        assert_eq!(err.to_string(), "payment is required");

        let err = ValidationError::InvalidCheckDigit {
            field: "access_key".to_string(),
            expected: 3,
            found: 7,
        };
        assert_eq!(
            err.to_string(),
            "access_key check digit mismatch: expected 3, found 7"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "items".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
