//! # Money Module
//!
//! Provides the `Money` and `Quantity` types for handling fiscal values
//! safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  The authority validates totals to the cent:                            │
//! │    a document whose vNF disagrees with Σ(item totals) by 0.01           │
//! │    is REJECTED with code 629                                            │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    R$ 10,99  = 1099 cents (i64)                                         │
//! │    qty 2.50  =  250 hundredths (i64)                                    │
//! │    All rounding is explicit, at one documented point                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fisco_core::money::{Money, Quantity};
//!
//! // Create from cents (preferred)
//! let price = Money::from_cents(1099); // R$ 10,99
//!
//! // Line totals round half up at the cent
//! let qty = Quantity::from_hundredths(250); // 2.50 units
//! assert_eq!(price.times(qty).cents(), 2748); // 27.475 → 27.48
//!
//! // Wire format is always two fraction digits with a dot
//! assert_eq!(price.to_decimal_string(), "10.99");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in cents (centavos).
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for adjustments and deltas
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Derives**: Full serde support for JSON serialization
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  ItemRequest.unit_price_cents ──► DraftItem.line_total_cents            │
/// │                                         │                               │
/// │  Σ line totals ──► total_products ──► − discounts + tax ──► total      │
/// │                                         │                               │
/// │  total ──► payment coverage check ──► change                            │
/// │                                         │                               │
/// │  every value lands in the XML as a two-decimal string ("10.99")        │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // R$ 10,99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (reais) portion.
    #[inline]
    pub const fn reais(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit (centavos) portion (always 0-99).
    #[inline]
    pub const fn centavos_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies a unit price by a fractional quantity, rounding half up
    /// at the cent.
    ///
    /// ## Implementation
    /// `(price_cents × quantity_hundredths + 50) / 100` in i128, so large
    /// documents cannot overflow and the rounding point is explicit.
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::money::{Money, Quantity};
    ///
    /// let unit_price = Money::from_cents(223);        // R$ 2,23
    /// let qty = Quantity::from_hundredths(150);       // 1.50 units
    /// // 2.23 × 1.50 = 3.345 → rounds to 3.35
    /// assert_eq!(unit_price.times(qty).cents(), 335);
    /// ```
    pub fn times(&self, quantity: Quantity) -> Money {
        let raw = self.0 as i128 * quantity.hundredths() as i128;
        Money::from_cents(((raw + 50) / 100) as i64)
    }

    /// Takes a percentage of this amount, expressed in basis points,
    /// rounding half up at the cent.
    ///
    /// ## Arguments
    /// * `bps` - Basis points (1 bps = 0.01%; 825 = 8.25%)
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::money::Money;
    ///
    /// let amount = Money::from_cents(1000); // R$ 10,00
    /// // 10.00 × 8.25% = 0.825 → rounds to 0.83
    /// assert_eq!(amount.percentage(825).cents(), 83);
    /// ```
    pub fn percentage(&self, bps: u32) -> Money {
        // i128 to prevent overflow on large amounts
        let raw = self.0 as i128 * bps as i128;
        Money::from_cents(((raw + 5000) / 10000) as i64)
    }

    /// Formats the value with exactly two fraction digits and a dot
    /// separator, the only representation the authority accepts on the
    /// wire.
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(1099).to_decimal_string(), "10.99");
    /// assert_eq!(Money::from_cents(500).to_decimal_string(), "5.00");
    /// assert_eq!(Money::from_cents(-550).to_decimal_string(), "-5.50");
    /// ```
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.reais().abs(), self.centavos_part())
    }
}

// =============================================================================
// Money Trait Implementations
// =============================================================================

/// Display implementation shows money in a human-readable format.
///
/// ## Note
/// This is for logs and debugging. The wire format is
/// [`Money::to_decimal_string`].
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}R$ {},{:02}",
            sign,
            self.reais().abs(),
            self.centavos_part()
        )
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

/// Addition of two Money values.
impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

/// Addition assignment (+=).
impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// Subtraction of two Money values.
impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

/// Subtraction assignment (-=).
impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by i64 (for whole-unit quantities).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Quantity Type
// =============================================================================

/// A fractional item quantity in hundredths of a unit.
///
/// ## Why Hundredths?
/// Merchants sell by weight and fraction (0.5 kg, 2.25 m). Two fraction
/// digits match the wire format the document schema uses for quantities,
/// and keep quantity arithmetic in the same integer discipline as Money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quantity(i64);

impl Quantity {
    /// Creates a quantity from hundredths of a unit.
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::money::Quantity;
    ///
    /// let half_kilo = Quantity::from_hundredths(50); // 0.50
    /// assert_eq!(half_kilo.hundredths(), 50);
    /// ```
    #[inline]
    pub const fn from_hundredths(hundredths: i64) -> Self {
        Quantity(hundredths)
    }

    /// Creates a quantity from whole units.
    ///
    /// ## Example
    /// ```rust
    /// use fisco_core::money::Quantity;
    ///
    /// assert_eq!(Quantity::from_units(3).hundredths(), 300);
    /// ```
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * 100)
    }

    /// Returns the value in hundredths of a unit.
    #[inline]
    pub const fn hundredths(&self) -> i64 {
        self.0
    }

    /// Checks if the quantity is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Formats the quantity with exactly two fraction digits and a dot
    /// separator (wire format).
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
