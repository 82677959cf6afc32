//! # Document Builder
//!
//! Turns an [`EmissionRequest`] into a validated, fully-totalled
//! [`DocumentDraft`], and a draft plus a [`DocumentStamp`] into the
//! [`FiscalDocument`] that gets rendered, signed and submitted.
//!
//! ## Pipeline Position
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ EmissionRequest │ ──► │  DocumentDraft  │ ──► │ FiscalDocument  │
//! │  (caller input) │     │ (validated +    │     │ (stamped with   │
//! │                 │     │  totalled)      │     │  number + key)  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!        build()              into_document(stamp)
//! ```
//!
//! The split matters for contingency: the draft is built and totalled
//! *before* any number is allocated, so an unreachable authority costs
//! nothing from the online sequence.
//!
//! ## Rules
//! - 1 to 500 items; every item fully validated
//! - All arithmetic in integer cents ([`Money`]), round half up
//! - Discount may not exceed the product total
//! - A payment block is required and must cover the total; change is
//!   computed here, never supplied by the caller

use chrono::{DateTime, Utc};

use crate::access_key::AccessKey;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Quantity};
use crate::types::{
    CustomerInfo, DocumentStatus, EmissionRequest, EmissionType, Environment, FiscalDocument,
    PaymentInfo, PaymentRequest,
};
use crate::validation;
use crate::{EstablishmentConfig, MAX_DOCUMENT_ITEMS};

// =============================================================================
// Tax Calculation
// =============================================================================

/// Computes the tax portion of each document line.
///
/// Per-line figures are summed into the document's tax total, which is
/// part of the amount charged. Implementations may resolve rates per
/// NCM; the engine wires in whichever policy the deployment uses.
pub trait TaxCalculator: Send + Sync {
    /// Returns the tax portion of one line, given its total and
    /// classification.
    fn line_tax(&self, line_total: Money, ncm: &str, cfop: &str) -> Money;
}

/// Applies one flat rate to every line.
///
/// Good enough for Simples Nacional merchants, where a single effective
/// rate approximates the burden across the whole catalog.
#[derive(Debug, Clone, Copy)]
pub struct FlatRateTaxCalculator {
    rate_bps: u32,
}

impl FlatRateTaxCalculator {
    /// Creates a calculator with a rate in basis points (825 = 8.25%).
    pub const fn new(rate_bps: u32) -> Self {
        Self { rate_bps }
    }
}

impl TaxCalculator for FlatRateTaxCalculator {
    fn line_tax(&self, line_total: Money, _ncm: &str, _cfop: &str) -> Money {
        line_total.percentage(self.rate_bps)
    }
}

// =============================================================================
// Draft Item
// =============================================================================

/// A validated document line with its computed totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftItem {
    /// 1-based position within the document.
    pub line_number: i64,
    pub code: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    /// `unit_price × quantity`, rounded half up.
    pub line_total: Money,
    pub tax: Money,
}

// =============================================================================
// Document Draft
// =============================================================================

/// A validated, totalled document that has no fiscal identity yet.
///
/// Drafts are in-memory only. Nothing is persisted and no number is
/// consumed until the emission pipeline stamps the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDraft {
    pub establishment_id: String,
    pub environment: Environment,
    pub items: Vec<DraftItem>,
    pub customer: Option<CustomerInfo>,
    pub payment: PaymentInfo,
    pub total_products: Money,
    pub total_discount: Money,
    pub total_tax: Money,
    /// `products - discount + tax`.
    pub total_amount: Money,
}

/// The fiscal identity assigned to a draft at emission time.
///
/// Produced by the emission pipeline after number allocation; the draft
/// itself never chooses its own number.
#[derive(Debug, Clone)]
pub struct DocumentStamp {
    pub document_id: String,
    pub series: i64,
    pub number: i64,
    pub emission_type: EmissionType,
    pub access_key: AccessKey,
    pub issued_at: DateTime<Utc>,
}

impl DocumentDraft {
    /// Combines the draft with its stamp into a persistable document.
    ///
    /// The document starts in [`DocumentStatus::Draft`]; the pipeline
    /// advances it as XML is rendered and signed. Items are returned
    /// separately so the storage layer can assign them row identities.
    pub fn into_document(self, stamp: DocumentStamp) -> (FiscalDocument, Vec<DraftItem>) {
        let document = FiscalDocument {
            id: stamp.document_id,
            establishment_id: self.establishment_id,
            environment: self.environment,
            series: stamp.series,
            number: stamp.number,
            emission_type: stamp.emission_type,
            access_key: stamp.access_key.into_string(),
            status: DocumentStatus::Draft,
            issued_at: stamp.issued_at,
            customer: self.customer,
            payment: self.payment,
            total_products_cents: self.total_products.cents(),
            total_discount_cents: self.total_discount.cents(),
            total_tax_cents: self.total_tax.cents(),
            total_amount_cents: self.total_amount.cents(),
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
            created_at: stamp.issued_at,
            updated_at: stamp.issued_at,
        };
        (document, self.items)
    }
}

// =============================================================================
// Document Builder
// =============================================================================

/// Validates and totals emission requests for one establishment.
pub struct DocumentBuilder<'a> {
    config: &'a EstablishmentConfig,
    calculator: &'a dyn TaxCalculator,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(config: &'a EstablishmentConfig, calculator: &'a dyn TaxCalculator) -> Self {
        Self { config, calculator }
    }

    /// Builds a validated draft from a request.
    ///
    /// ## Rules
    /// - The request must target this builder's establishment
    /// - 1 to 500 items, each with positive quantity and price
    /// - Customer tax id, when present, must be a valid CPF or CNPJ
    /// - Discount must fit within the product total
    /// - Payment is required and must cover `products - discount + tax`
    pub fn build(&self, request: &EmissionRequest) -> CoreResult<DocumentDraft> {
        if request.establishment_id != self.config.id {
            return Err(CoreError::EstablishmentNotFound(
                request.establishment_id.clone(),
            ));
        }

        if request.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        if request.items.len() > MAX_DOCUMENT_ITEMS {
            return Err(CoreError::TooManyItems {
                count: request.items.len(),
                max: MAX_DOCUMENT_ITEMS,
            });
        }

        if let Some(customer) = &request.customer {
            if let Some(tax_id) = &customer.tax_id {
                validation::validate_customer_tax_id(tax_id)?;
            }
        }

        let mut items = Vec::with_capacity(request.items.len());
        let mut total_products = Money::zero();
        let mut total_tax = Money::zero();

        for (index, item) in request.items.iter().enumerate() {
            validation::validate_item_code(&item.code)?;
            validation::validate_description(&item.description)?;
            validation::validate_ncm(&item.ncm)?;
            validation::validate_cfop(&item.cfop)?;

            if item.quantity_hundredths <= 0 {
                return Err(ValidationError::MustBePositive {
                    field: "quantity".to_string(),
                }
                .into());
            }
            if item.unit_price_cents <= 0 {
                return Err(ValidationError::MustBePositive {
                    field: "unit_price".to_string(),
                }
                .into());
            }

            let quantity = Quantity::from_hundredths(item.quantity_hundredths);
            let unit_price = Money::from_cents(item.unit_price_cents);
            let line_total = unit_price.times(quantity);
            let tax = self.calculator.line_tax(line_total, &item.ncm, &item.cfop);

            total_products += line_total;
            total_tax += tax;

            items.push(DraftItem {
                line_number: (index + 1) as i64,
                code: item.code.clone(),
                description: item.description.clone(),
                ncm: item.ncm.clone(),
                cfop: item.cfop.clone(),
                quantity,
                unit_price,
                line_total,
                tax,
            });
        }

        let discount = Money::from_cents(request.discount_cents);
        if request.discount_cents < 0 || discount > total_products {
            return Err(ValidationError::OutOfRange {
                field: "discount_cents".to_string(),
                min: 0,
                max: total_products.cents(),
            }
            .into());
        }

        let total_amount = total_products - discount + total_tax;
        let payment = Self::settle_payment(request.payment, total_amount)?;

        Ok(DocumentDraft {
            establishment_id: request.establishment_id.clone(),
            environment: self.config.environment,
            items,
            customer: request.customer.clone(),
            payment,
            total_products,
            total_discount: discount,
            total_tax,
            total_amount,
        })
    }

    /// Resolves the payment block: presence, coverage, change.
    fn settle_payment(
        payment: Option<PaymentRequest>,
        total: Money,
    ) -> CoreResult<PaymentInfo> {
        let payment = payment.ok_or_else(|| ValidationError::Required {
            field: "payment".to_string(),
        })?;

        let tendered = Money::from_cents(payment.amount_cents);
        if tendered < total {
            return Err(CoreError::InsufficientPayment {
                total_cents: total.cents(),
                paid_cents: tendered.cents(),
            });
        }

        Ok(PaymentInfo {
            method: payment.method,
            amount_cents: tendered.cents(),
            change_cents: (tendered - total).cents(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
