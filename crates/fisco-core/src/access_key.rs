//! # Access Key Module
//!
//! The 44-digit self-checking identifier that names every fiscal document.
//!
//! ## Key Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              44-DIGIT ACCESS KEY (all ASCII digits)                     │
//! │                                                                         │
//! │  35 2608 12345678000195 65 001 000000042 1 12345678 3                  │
//! │  ── ──── ────────────── ── ─── ───────── ─ ──────── ─                  │
//! │  │    │        │         │   │      │    │     │    └─ check digit (1) │
//! │  │    │        │         │   │      │    │     └─ random code (8)      │
//! │  │    │        │         │   │      │    └─ emission type (1)          │
//! │  │    │        │         │   │      │       1=normal 9=contingency     │
//! │  │    │        │         │   │      └─ number (9, zero-padded)         │
//! │  │    │        │         │   └─ series (3, zero-padded)                │
//! │  │    │        │         └─ model ("65", fixed)                        │
//! │  │    │        └─ issuer tax id (14)                                   │
//! │  │    └─ year + month of emission (AAMM)                               │
//! │  └─ state code (2)                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## The Check Digit
//! The last digit is a mod-11 computation over the preceding 43: each digit
//! is multiplied by a weight from the repeating cycle 2..9 read right to
//! left, the products are summed, and `remainder = sum mod 11` maps to
//! digit 0 when below 2, otherwise `11 - remainder`. Any consumer can
//! verify a key offline from the digits alone, with no network access.
//!
//! ## Invariant
//! An `AccessKey` can only be obtained through [`AccessKey::build`] (from
//! validated fields) or [`AccessKey::parse`] (which re-verifies the check
//! digit). There is no way to fabricate one around the check.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::error::ValidationError;
use crate::types::EmissionType;
use crate::validation::{self, ValidationResult};
use crate::{MAX_DOCUMENT_NUMBER, MAX_RANDOM_CODE, MAX_SERIES, MODEL_NFCE};

// =============================================================================
// Constants
// =============================================================================

/// Total key length in ASCII digits.
pub const ACCESS_KEY_LEN: usize = 44;

/// The 2..9 weight cycle, read right to left, pre-expanded over the 43
/// checked positions so the hot loop is a table walk instead of modular
/// arithmetic. Position 42 (rightmost) carries weight 2.
const CHECK_DIGIT_WEIGHTS: [u32; ACCESS_KEY_LEN - 1] = [
    4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2, 9, 8, 7, 6,
    5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2,
];

// Field positions within the 44-digit string.
const POS_STATE: Range<usize> = 0..2;
const POS_YEAR_MONTH: Range<usize> = 2..6;
const POS_TAX_ID: Range<usize> = 6..20;
const POS_MODEL: Range<usize> = 20..22;
const POS_SERIES: Range<usize> = 22..25;
const POS_NUMBER: Range<usize> = 25..34;
const POS_EMISSION_TYPE: usize = 34;
const POS_RANDOM: Range<usize> = 35..43;
const POS_CHECK_DIGIT: usize = 43;

// =============================================================================
// Check Digit
// =============================================================================

/// Computes the mod-11 check digit over the first 43 digits of a key.
///
/// ## Arguments
/// * `digits` - Exactly 43 ASCII digits (the key minus its last position)
///
/// ## Returns
/// The check digit (0-9). Remainders 0 and 1 collapse to digit 0; there is
/// no "digit 10" escape in this layout.
///
/// ## Example
/// ```rust
/// use fisco_core::access_key::compute_check_digit;
///
/// let head = "3526081234567800019565001000000042112345678";
/// assert_eq!(compute_check_digit(head).unwrap(), 3);
/// ```
pub fn compute_check_digit(digits: &str) -> ValidationResult<u8> {
    let bytes = digits.as_bytes();

    if bytes.len() != ACCESS_KEY_LEN - 1 {
        return Err(ValidationError::InvalidFormat {
            field: "access_key".to_string(),
            reason: format!(
                "check digit input must be {} digits, got {}",
                ACCESS_KEY_LEN - 1,
                bytes.len()
            ),
        });
    }

    let mut sum: u32 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if !b.is_ascii_digit() {
            return Err(ValidationError::InvalidFormat {
                field: "access_key".to_string(),
                reason: "must contain only ASCII digits".to_string(),
            });
        }
        sum += u32::from(b - b'0') * CHECK_DIGIT_WEIGHTS[i];
    }

    let remainder = sum % 11;
    Ok(if remainder < 2 {
        0
    } else {
        (11 - remainder) as u8
    })
}

// =============================================================================
// Key Fields
// =============================================================================

/// The inputs the access key is a pure function of.
///
/// Everything except `number` and `random_code` comes from the
/// establishment's fiscal configuration and the emission timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFields {
    /// IBGE federation-unit code (2 digits in the key).
    pub state_code: i64,
    /// Full emission year (only the last two digits are encoded).
    pub year: i32,
    /// Emission month, 1-12.
    pub month: u32,
    /// Issuer CNPJ, exactly 14 digits.
    pub tax_id: String,
    /// Document series, 0-999.
    pub series: i64,
    /// Document number, 1-999,999,999.
    pub number: i64,
    /// Normal or contingency emission.
    pub emission_type: EmissionType,
    /// 8-digit entropy code. Must differ from `number` (the layout forbids
    /// the two fields being equal, so keys cannot be guessed from the
    /// public sequence alone).
    pub random_code: i64,
}

// =============================================================================
// Access Key
// =============================================================================

/// A validated 44-digit access key.
///
/// Stored as its canonical digit string; every instance has, by
/// construction, a check digit that matches [`compute_check_digit`] over
/// its first 43 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessKey(String);

impl AccessKey {
    /// Builds a key from its fields, computing the check digit.
    ///
    /// ## Errors
    /// `ValidationError` if any field is outside its layout range, the tax
    /// id is not 14 digits, or the random code equals the document number.
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::access_key::{AccessKey, KeyFields};
    /// use fisco_core::types::EmissionType;
    ///
    /// let key = AccessKey::build(&KeyFields {
    ///     state_code: 35,
    ///     year: 2026,
    ///     month: 8,
    ///     tax_id: "12345678000195".to_string(),
    ///     series: 900,
    ///     number: 1,
    ///     emission_type: EmissionType::Contingency,
    ///     random_code: 87_654_321,
    /// }).unwrap();
    ///
    /// assert_eq!(key.series(), 900);
    /// assert_eq!(key.emission_type_code(), 9);
    /// ```
    pub fn build(fields: &KeyFields) -> ValidationResult<Self> {
        validation::validate_state_code(fields.state_code)?;

        if !(1..=12).contains(&fields.month) {
            return Err(ValidationError::OutOfRange {
                field: "month".to_string(),
                min: 1,
                max: 12,
            });
        }

        // Two-digit year encoding: the layout cannot represent other centuries
        if !(2000..=2099).contains(&fields.year) {
            return Err(ValidationError::OutOfRange {
                field: "year".to_string(),
                min: 2000,
                max: 2099,
            });
        }

        if fields.tax_id.len() != 14 || !fields.tax_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "tax_id".to_string(),
                reason: "must be exactly 14 digits".to_string(),
            });
        }

        if !(0..=MAX_SERIES).contains(&fields.series) {
            return Err(ValidationError::OutOfRange {
                field: "series".to_string(),
                min: 0,
                max: MAX_SERIES,
            });
        }

        if !(1..=MAX_DOCUMENT_NUMBER).contains(&fields.number) {
            return Err(ValidationError::OutOfRange {
                field: "number".to_string(),
                min: 1,
                max: MAX_DOCUMENT_NUMBER,
            });
        }

        if !(0..=MAX_RANDOM_CODE).contains(&fields.random_code) {
            return Err(ValidationError::OutOfRange {
                field: "random_code".to_string(),
                min: 0,
                max: MAX_RANDOM_CODE,
            });
        }

        if fields.random_code == fields.number {
            return Err(ValidationError::InvalidFormat {
                field: "random_code".to_string(),
                reason: "must differ from the document number".to_string(),
            });
        }

        let head = format!(
            "{:02}{:02}{:02}{}{:02}{:03}{:09}{}{:08}",
            fields.state_code,
            fields.year % 100,
            fields.month,
            fields.tax_id,
            MODEL_NFCE,
            fields.series,
            fields.number,
            fields.emission_type.code(),
            fields.random_code,
        );
        debug_assert_eq!(head.len(), ACCESS_KEY_LEN - 1);

        let check_digit = compute_check_digit(&head)?;
        Ok(AccessKey(format!("{head}{check_digit}")))
    }

    /// Parses and verifies an externally supplied 44-digit key.
    ///
    /// ## Errors
    /// - `InvalidFormat` for wrong length or non-digit characters
    /// - `InvalidCheckDigit` when the last digit disagrees with the mod-11
    ///   computation over the first 43
    pub fn parse(key: &str) -> ValidationResult<Self> {
        if key.len() != ACCESS_KEY_LEN || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "access_key".to_string(),
                reason: format!("must be exactly {ACCESS_KEY_LEN} digits"),
            });
        }

        let expected = compute_check_digit(&key[..ACCESS_KEY_LEN - 1])?;
        let found = key.as_bytes()[POS_CHECK_DIGIT] - b'0';
        if found != expected {
            return Err(ValidationError::InvalidCheckDigit {
                field: "access_key".to_string(),
                expected,
                found,
            });
        }

        Ok(AccessKey(key.to_string()))
    }

    /// Returns the key as its 44-digit string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the owned digit string.
    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Numeric value of a digit range. Every byte is a verified ASCII
    /// digit, so this cannot fail.
    fn field_value(&self, range: Range<usize>) -> i64 {
        self.0[range]
            .bytes()
            .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'))
    }

    /// State code (positions 1-2).
    pub fn state_code(&self) -> i64 {
        self.field_value(POS_STATE)
    }

    /// Emission year+month as the raw "AAMM" slice (positions 3-6).
    pub fn year_month(&self) -> &str {
        &self.0[POS_YEAR_MONTH]
    }

    /// Issuer tax id (positions 7-20). Leading zeros are significant, so
    /// this stays a string slice.
    pub fn tax_id(&self) -> &str {
        &self.0[POS_TAX_ID]
    }

    /// Fiscal model (positions 21-22; always 65 for keys built here).
    pub fn model(&self) -> i64 {
        self.field_value(POS_MODEL)
    }

    /// Document series (positions 23-25).
    pub fn series(&self) -> i64 {
        self.field_value(POS_SERIES)
    }

    /// Document number (positions 26-34).
    pub fn number(&self) -> i64 {
        self.field_value(POS_NUMBER)
    }

    /// Emission type digit (position 35).
    pub fn emission_type_code(&self) -> u8 {
        self.0.as_bytes()[POS_EMISSION_TYPE] - b'0'
    }

    /// Whether this key was issued under contingency.
    pub fn is_contingency(&self) -> bool {
        self.emission_type_code() == EmissionType::Contingency.code()
    }

    /// Random code as its 8-digit slice (positions 36-43). Leading zeros
    /// are significant.
    pub fn random_code(&self) -> &str {
        &self.0[POS_RANDOM]
    }

    /// The check digit (position 44).
    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[POS_CHECK_DIGIT] - b'0'
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
