//! # Validation Module
//!
//! Fiscal rule validation for Fisco.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (POS frontend, API boundary)                          │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + DocumentBuilder                                │
//! │  ├── Fiscal rules (check digits, state codes, ranges)                  │
//! │  └── Runs BEFORE any sequence number is allocated                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / UNIQUE constraints                                     │
//! │  └── (establishment, series, number) uniqueness                        │
//! │                                                                         │
//! │  Defense in depth: the authority rejects what slips through,           │
//! │  but a rejection burns an allocated number — catch it here             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fisco_core::validation::{validate_cnpj, validate_state_code};
//!
//! validate_cnpj("12345678000195").unwrap();
//! validate_state_code(35).unwrap(); // São Paulo
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// State Code Registry
// =============================================================================

/// IBGE codes of the 27 federation units.
///
/// The code appears in the first two digits of every access key and routes
/// the document to the right authority endpoint. The list is sparse (gaps
/// between regions), so a range check is not enough.
const STATE_CODES: [i64; 27] = [
    11, 12, 13, 14, 15, 16, 17, // North
    21, 22, 23, 24, 25, 26, 27, 28, 29, // Northeast
    31, 32, 33, 35, // Southeast
    41, 42, 43, // South
    50, 51, 52, 53, // Center-West
];

/// Checks whether a numeric code is a real federation-unit code.
#[inline]
pub fn is_valid_state_code(code: i64) -> bool {
    STATE_CODES.contains(&code)
}

/// Validates a federation-unit (state) code.
pub fn validate_state_code(code: i64) -> ValidationResult<()> {
    if !is_valid_state_code(code) {
        return Err(ValidationError::InvalidFormat {
            field: "state_code".to_string(),
            reason: format!("{code} is not an IBGE federation-unit code"),
        });
    }

    Ok(())
}

// =============================================================================
// Tax Id Validators (CNPJ / CPF)
// =============================================================================

/// Computes one mod-11 verifier digit over `digits` with the given weights.
///
/// Remainders 0 and 1 map to digit 0; anything else maps to `11 - remainder`.
/// This is the same rule the access key check digit uses (§ access_key),
/// with different weight tables.
fn mod11_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

/// Converts an all-digit string into numeric values, or None if any
/// character is not an ASCII digit.
fn digit_values(s: &str) -> Option<Vec<u32>> {
    s.chars().map(|c| c.to_digit(10)).collect()
}

/// Validates a CNPJ (14-digit company tax id).
///
/// ## Rules
/// - Exactly 14 ASCII digits, no punctuation
/// - Not a repeated single digit (00000000000000 passes the math but is
///   not a registrable id)
/// - Both verifier digits (positions 13 and 14) must match the mod-11
///   computation over the preceding digits
///
/// ## Example
/// ```rust
/// use fisco_core::validation::validate_cnpj;
///
/// assert!(validate_cnpj("12345678000195").is_ok());
/// assert!(validate_cnpj("12345678000194").is_err()); // bad verifier
/// ```
pub fn validate_cnpj(cnpj: &str) -> ValidationResult<()> {
    let digits = match digit_values(cnpj) {
        Some(d) if d.len() == 14 => d,
        _ => {
            return Err(ValidationError::InvalidFormat {
                field: "cnpj".to_string(),
                reason: "must be exactly 14 digits".to_string(),
            })
        }
    };

    if digits.iter().all(|&d| d == digits[0]) {
        return Err(ValidationError::InvalidFormat {
            field: "cnpj".to_string(),
            reason: "repeated-digit sequences are not valid ids".to_string(),
        });
    }

    const WEIGHTS_1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const WEIGHTS_2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let dv1 = mod11_digit(&digits[..12], &WEIGHTS_1);
    if digits[12] != dv1 {
        return Err(ValidationError::InvalidCheckDigit {
            field: "cnpj".to_string(),
            expected: dv1 as u8,
            found: digits[12] as u8,
        });
    }

    let dv2 = mod11_digit(&digits[..13], &WEIGHTS_2);
    if digits[13] != dv2 {
        return Err(ValidationError::InvalidCheckDigit {
            field: "cnpj".to_string(),
            expected: dv2 as u8,
            found: digits[13] as u8,
        });
    }

    Ok(())
}

/// Validates a CPF (11-digit personal tax id).
///
/// Same mod-11 discipline as the CNPJ, with descending weight tables.
///
/// ## Example
/// ```rust
/// use fisco_core::validation::validate_cpf;
///
/// assert!(validate_cpf("11144477735").is_ok());
/// assert!(validate_cpf("11144477734").is_err());
/// ```
pub fn validate_cpf(cpf: &str) -> ValidationResult<()> {
    let digits = match digit_values(cpf) {
        Some(d) if d.len() == 11 => d,
        _ => {
            return Err(ValidationError::InvalidFormat {
                field: "cpf".to_string(),
                reason: "must be exactly 11 digits".to_string(),
            })
        }
    };

    if digits.iter().all(|&d| d == digits[0]) {
        return Err(ValidationError::InvalidFormat {
            field: "cpf".to_string(),
            reason: "repeated-digit sequences are not valid ids".to_string(),
        });
    }

    const WEIGHTS_1: [u32; 9] = [10, 9, 8, 7, 6, 5, 4, 3, 2];
    const WEIGHTS_2: [u32; 10] = [11, 10, 9, 8, 7, 6, 5, 4, 3, 2];

    let dv1 = mod11_digit(&digits[..9], &WEIGHTS_1);
    if digits[9] != dv1 {
        return Err(ValidationError::InvalidCheckDigit {
            field: "cpf".to_string(),
            expected: dv1 as u8,
            found: digits[9] as u8,
        });
    }

    let dv2 = mod11_digit(&digits[..10], &WEIGHTS_2);
    if digits[10] != dv2 {
        return Err(ValidationError::InvalidCheckDigit {
            field: "cpf".to_string(),
            expected: dv2 as u8,
            found: digits[10] as u8,
        });
    }

    Ok(())
}

/// Validates a customer tax id, which may be either a CPF (11 digits) or
/// a CNPJ (14 digits).
pub fn validate_customer_tax_id(tax_id: &str) -> ValidationResult<()> {
    match tax_id.len() {
        11 => validate_cpf(tax_id),
        14 => validate_cnpj(tax_id),
        _ => Err(ValidationError::InvalidFormat {
            field: "customer_tax_id".to_string(),
            reason: "must be 11 (CPF) or 14 (CNPJ) digits".to_string(),
        }),
    }
}

// =============================================================================
// Numbering Validators
// =============================================================================

/// Validates a document series (the key layout holds 3 digits).
pub fn validate_series(series: i64) -> ValidationResult<()> {
    if !(0..=crate::MAX_SERIES).contains(&series) {
        return Err(ValidationError::OutOfRange {
            field: "series".to_string(),
            min: 0,
            max: crate::MAX_SERIES,
        });
    }

    Ok(())
}

/// Validates an online series. 900-999 is the contingency block and may
/// never be configured as an establishment's active series.
pub fn validate_online_series(series: i64) -> ValidationResult<()> {
    if !(1..=crate::MAX_ONLINE_SERIES).contains(&series) {
        return Err(ValidationError::OutOfRange {
            field: "active_series".to_string(),
            min: 1,
            max: crate::MAX_ONLINE_SERIES,
        });
    }

    Ok(())
}

/// Validates a document number (the key layout holds 9 digits, zero is
/// not issued).
pub fn validate_document_number(number: i64) -> ValidationResult<()> {
    if !(1..=crate::MAX_DOCUMENT_NUMBER).contains(&number) {
        return Err(ValidationError::OutOfRange {
            field: "number".to_string(),
            min: 1,
            max: crate::MAX_DOCUMENT_NUMBER,
        });
    }

    Ok(())
}

// =============================================================================
// Item Field Validators
// =============================================================================

/// Validates an item description.
///
/// ## Rules
/// - Must not be empty after trimming
/// - Maximum 120 characters (schema limit for the product name field)
pub fn validate_description(description: &str) -> ValidationResult<()> {
    let description = description.trim();

    if description.is_empty() {
        return Err(ValidationError::Required {
            field: "description".to_string(),
        });
    }

    if description.chars().count() > 120 {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: 120,
        });
    }

    Ok(())
}

/// Validates an item (product) code.
pub fn validate_item_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.chars().count() > 60 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 60,
        });
    }

    Ok(())
}

/// Validates an NCM commodity classification code (exactly 8 digits).
pub fn validate_ncm(ncm: &str) -> ValidationResult<()> {
    if ncm.len() != 8 || !ncm.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "ncm".to_string(),
            reason: "must be exactly 8 digits".to_string(),
        });
    }

    Ok(())
}

/// Validates a CFOP operation code (exactly 4 digits).
pub fn validate_cfop(cfop: &str) -> ValidationResult<()> {
    if cfop.len() != 4 || !cfop.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "cfop".to_string(),
            reason: "must be exactly 4 digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Cancellation Validators
// =============================================================================

/// Validates a cancellation justification.
///
/// ## Rules
/// The authority requires between 15 and 255 characters of justification
/// text on every cancellation event; anything shorter is refused with
/// event rejection, so catch it locally first.
pub fn validate_cancellation_reason(reason: &str) -> ValidationResult<()> {
    let reason = reason.trim();
    let len = reason.chars().count();

    if len < 15 {
        return Err(ValidationError::TooShort {
            field: "cancellation_reason".to_string(),
            min: 15,
        });
    }

    if len > 255 {
        return Err(ValidationError::TooLong {
            field: "cancellation_reason".to_string(),
            max: 255,
        });
    }

    Ok(())
}

// =============================================================================
// Address Validators
// =============================================================================

/// Validates a CEP postal code (exactly 8 digits, no separator).
pub fn validate_cep(cep: &str) -> ValidationResult<()> {
    if cep.len() != 8 || !cep.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "address_zip".to_string(),
            reason: "must be exactly 8 digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert!(validate_state_code(35).is_ok()); // SP
        assert!(validate_state_code(43).is_ok()); // RS
        assert!(validate_state_code(53).is_ok()); // DF

        assert!(validate_state_code(0).is_err());
        assert!(validate_state_code(20).is_err()); // gap between regions
        assert!(validate_state_code(34).is_err()); // gap before SP
        assert!(validate_state_code(54).is_err());
    }

    #[test]
    fn test_validate_cnpj() {
        assert!(validate_cnpj("12345678000195").is_ok());
        assert!(validate_cnpj("11222333000181").is_ok());
        assert!(validate_cnpj("33009911002506").is_ok());

        // Corrupted verifier digit
        assert!(matches!(
            validate_cnpj("12345678000194"),
            Err(ValidationError::InvalidCheckDigit { .. })
        ));
        // Wrong length / non-digit
        assert!(validate_cnpj("1234567800019").is_err());
        assert!(validate_cnpj("12.345.678/0001-95").is_err());
        // Repeated digits pass mod-11 but are not registrable
        assert!(validate_cnpj("00000000000000").is_err());
    }

    #[test]
    fn test_validate_cpf() {
        assert!(validate_cpf("11144477735").is_ok());
        assert!(validate_cpf("52998224725").is_ok());

        assert!(matches!(
            validate_cpf("11144477734"),
            Err(ValidationError::InvalidCheckDigit { .. })
        ));
        assert!(validate_cpf("111444777").is_err());
        assert!(validate_cpf("11111111111").is_err());
    }

    #[test]
    fn test_validate_customer_tax_id() {
        assert!(validate_customer_tax_id("11144477735").is_ok()); // CPF
        assert!(validate_customer_tax_id("12345678000195").is_ok()); // CNPJ
        assert!(validate_customer_tax_id("123").is_err());
    }

    #[test]
    fn test_numbering_ranges() {
        assert!(validate_series(0).is_ok());
        assert!(validate_series(999).is_ok());
        assert!(validate_series(1000).is_err());

        assert!(validate_online_series(1).is_ok());
        assert!(validate_online_series(899).is_ok());
        assert!(validate_online_series(900).is_err()); // contingency block
        assert!(validate_online_series(0).is_err());

        assert!(validate_document_number(1).is_ok());
        assert!(validate_document_number(999_999_999).is_ok());
        assert!(validate_document_number(0).is_err());
        assert!(validate_document_number(1_000_000_000).is_err());
    }

    #[test]
    fn test_item_fields() {
        assert!(validate_description("Água mineral 500ml").is_ok());
        assert!(validate_description("   ").is_err());
        assert!(validate_description(&"x".repeat(121)).is_err());

        assert!(validate_item_code("SKU-001").is_ok());
        assert!(validate_item_code("").is_err());

        assert!(validate_ncm("22011000").is_ok());
        assert!(validate_ncm("2201100").is_err());
        assert!(validate_ncm("2201100a").is_err());

        assert!(validate_cfop("5102").is_ok());
        assert!(validate_cfop("510").is_err());
    }

    #[test]
    fn test_cancellation_reason() {
        assert!(validate_cancellation_reason("Erro de digitação no item").is_ok());
        assert!(validate_cancellation_reason("curta demais").is_err());
        assert!(validate_cancellation_reason(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_cep() {
        assert!(validate_cep("01310100").is_ok());
        assert!(validate_cep("01310-100").is_err());
        assert!(validate_cep("0131010").is_err());
    }
}
