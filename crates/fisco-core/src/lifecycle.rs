//! # Document Lifecycle
//!
//! The legal state machine for fiscal documents.
//!
//! ```text
//!                      ┌────────────┐
//!                      │   Draft    │
//!                      └─────┬──────┘
//!                            │ XML rendered + signed
//!                      ┌─────▼──────┐
//!                      │ Generated  │
//!                      └─────┬──────┘
//!                            │ sent to authority
//!                      ┌─────▼──────┐
//!            ┌─────────┤ Submitted  ├─────────┐
//!            │         └─────┬──────┘         │
//!            │               │                │
//!      ┌─────▼──────┐ ┌──────▼─────┐  ┌──────▼─────┐
//!      │ Authorized │ │  Rejected  │  │   Error    │
//!      └─────┬──────┘ └────────────┘  └─────┬──────┘
//!            │                              │ receipt follow-up
//!            │ within window                │ (to Authorized or
//!      ┌─────▼──────┐                       │  Rejected)
//!      │ Cancelled  │◄──────────────────────┘
//!      └────────────┘   (never directly)
//! ```
//!
//! ## Rules
//! - Transitions not in the table are refused with
//!   [`CoreError::InvalidTransition`]; there is no force override
//! - `Rejected` and `Cancelled` are terminal
//! - `Error` means the submission verdict is unknown; a later receipt
//!   query resolves it to `Authorized` or `Rejected`
//! - Only `Authorized` documents may be cancelled, and only while the
//!   cancellation window is open

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::{DocumentStatus, FiscalDocument};

/// How long after authorization a document may still be cancelled.
///
/// The authority refuses cancellation events past this window; checking
/// locally avoids burning a round-trip on a request that cannot succeed.
pub const CANCELLATION_WINDOW_MINUTES: i64 = 30;

impl DocumentStatus {
    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Draft, Generated)
                | (Generated, Submitted)
                | (Submitted, Authorized)
                | (Submitted, Rejected)
                | (Submitted, Error)
                | (Error, Authorized)
                | (Error, Rejected)
                | (Authorized, Cancelled)
        )
    }

    /// Whether no further transition can ever leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Rejected | DocumentStatus::Cancelled)
    }
}

/// Moves a document to `next`, refusing illegal transitions.
///
/// Status is the only field touched; callers record protocol numbers,
/// timestamps and reasons themselves before persisting.
pub fn advance(document: &mut FiscalDocument, next: DocumentStatus) -> CoreResult<()> {
    if !document.status.can_transition_to(next) {
        return Err(CoreError::InvalidTransition {
            from: document.status,
            to: next,
        });
    }
    document.status = next;
    Ok(())
}

/// The instant after which a document can no longer be cancelled.
pub fn cancellation_deadline(authorized_at: DateTime<Utc>) -> DateTime<Utc> {
    authorized_at + Duration::minutes(CANCELLATION_WINDOW_MINUTES)
}

/// Whether a cancellation started at `now` would still be inside the
/// window. The deadline itself is already outside.
pub fn cancellation_open(authorized_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < cancellation_deadline(authorized_at)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EmissionType, Environment, PaymentInfo, PaymentMethod,
    };

    fn document_in(status: DocumentStatus) -> FiscalDocument {
        let now = Utc::now();
        FiscalDocument {
            id: "doc-1".to_string(),
            establishment_id: "est-1".to_string(),
            environment: Environment::Homologation,
            series: 1,
            number: 42,
            emission_type: EmissionType::Normal,
            access_key: "35260812345678000195650010000000421123456783".to_string(),
            status,
            issued_at: now,
            customer: None,
            payment: PaymentInfo {
                method: PaymentMethod::Cash,
                amount_cents: 1000,
                change_cents: 0,
            },
            total_products_cents: 1000,
            total_discount_cents: 0,
            total_tax_cents: 0,
            total_amount_cents: 1000,
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
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut doc = document_in(DocumentStatus::Draft);
        advance(&mut doc, DocumentStatus::Generated).unwrap();
        advance(&mut doc, DocumentStatus::Submitted).unwrap();
        advance(&mut doc, DocumentStatus::Authorized).unwrap();
        advance(&mut doc, DocumentStatus::Cancelled).unwrap();
        assert_eq!(doc.status, DocumentStatus::Cancelled);
    }

    #[test]
    fn test_error_resolves_by_receipt() {
        let mut doc = document_in(DocumentStatus::Submitted);
        advance(&mut doc, DocumentStatus::Error).unwrap();
        advance(&mut doc, DocumentStatus::Authorized).unwrap();
        assert_eq!(doc.status, DocumentStatus::Authorized);

        let mut doc = document_in(DocumentStatus::Error);
        advance(&mut doc, DocumentStatus::Rejected).unwrap();
        assert_eq!(doc.status, DocumentStatus::Rejected);
    }

    #[test]
    fn test_illegal_transitions_refused() {
        use DocumentStatus::*;
        let illegal = [
            (Draft, Submitted),
            (Draft, Authorized),
            (Draft, Cancelled),
            (Generated, Authorized),
            (Generated, Draft),
            (Submitted, Cancelled),
            (Submitted, Draft),
            (Rejected, Authorized),
            (Rejected, Submitted),
            (Cancelled, Authorized),
            (Cancelled, Draft),
            (Error, Cancelled),
            (Error, Submitted),
            (Authorized, Rejected),
            (Authorized, Submitted),
        ];
        for (from, to) in illegal {
            let mut doc = document_in(from);
            let err = advance(&mut doc, to).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidTransition { from: f, to: t } if f == from && t == to),
                "{from:?} -> {to:?} should be refused"
            );
            // Failed advance must not mutate
            assert_eq!(doc.status, from);
        }
    }

    #[test]
    fn test_no_self_transitions() {
        use DocumentStatus::*;
        for status in [Draft, Generated, Submitted, Authorized, Rejected, Error, Cancelled] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(DocumentStatus::Rejected.is_terminal());
        assert!(DocumentStatus::Cancelled.is_terminal());
        assert!(!DocumentStatus::Authorized.is_terminal());
        assert!(!DocumentStatus::Error.is_terminal());
        assert!(!DocumentStatus::Draft.is_terminal());
    }

    #[test]
    fn test_cancellation_window() {
        let authorized_at = Utc::now();
        assert!(cancellation_open(
            authorized_at,
            authorized_at + Duration::minutes(29)
        ));
        // The deadline itself is closed
        assert!(!cancellation_open(
            authorized_at,
            authorized_at + Duration::minutes(CANCELLATION_WINDOW_MINUTES)
        ));
        assert!(!cancellation_open(
            authorized_at,
            authorized_at + Duration::minutes(31)
        ));
    }
}
