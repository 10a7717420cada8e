//! Amount type for handling monetary values with a fixed precision of two fractional digits.
//!
//! Values coming from upstream files may carry a dollar sign and thousands separators, these are
//! tolerated when parsing. Internally the value is always held at a scale of exactly two.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// The number of fractional digits carried by every `Amount`.
pub const SCALE: u32 = 2;

/// Represents a monetary amount with exactly two fractional digits.
///
/// The sign carries meaning: negative amounts are debits and positive amounts are credits.
///
/// # Examples
///
/// ```
/// # use txn_report::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("-$1,250.5").unwrap();
/// assert_eq!(amount.to_string(), "-1250.50");
/// assert!(amount.is_debit());
/// ```
///
/// More than two significant fractional digits cannot be represented and are rejected:
/// ```
/// # use txn_report::model::Amount;
/// # use std::str::FromStr;
/// assert!(Amount::from_str("10.005").is_err());
/// assert!(Amount::from_str("10.500").is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    pub const ZERO: Amount = Amount {
        value: Decimal::from_parts(0, 0, 0, false, SCALE),
    };

    /// Creates a new `Amount`, rounding `value` to two fractional digits with banker's rounding.
    ///
    /// Returns `None` when the magnitude of `value` is too large to be held with two fractional
    /// digits.
    pub fn new(value: Decimal) -> Option<Self> {
        let mut value = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven);
        value.rescale(SCALE);
        // rescale leaves the scale lower when the mantissa cannot grow any further.
        if value.scale() != SCALE {
            return None;
        }
        if value.is_zero() {
            value.set_sign_positive(true);
        }
        Some(Self { value })
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn abs(&self) -> Self {
        Self {
            value: self.value.abs(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// A positive amount.
    pub fn is_credit(&self) -> bool {
        !self.is_zero() && self.value.is_sign_positive()
    }

    /// A negative amount.
    pub fn is_debit(&self) -> bool {
        !self.is_zero() && self.value.is_sign_negative()
    }

    /// The arithmetic mean of `total` over `count` items, or zero when `count` is zero.
    pub fn mean(total: Amount, count: u64) -> Amount {
        if count == 0 {
            return Amount::ZERO;
        }
        // The mean is never larger in magnitude than `total`, which already fits.
        Amount::new(total.value / Decimal::from(count)).unwrap_or(total)
    }

    /// Adds `rhs`, or returns `None` if the sum cannot be held with two fractional digits.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.value.checked_add(rhs.value).and_then(Amount::new)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::ZERO
    }
}

/// An error that can occur when parsing strings into `Amount` values.
#[derive(Debug)]
pub enum AmountError {
    Empty,
    Parse(rust_decimal::Error),
    Precision(String),
    Range(String),
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AmountError::Empty => write!(f, "amount is empty"),
            AmountError::Parse(e) => Display::fmt(e, f),
            AmountError::Precision(s) => {
                write!(f, "amount '{s}' has more than {SCALE} fractional digits")
            }
            AmountError::Range(s) => write!(f, "amount '{s}' is too large"),
        }
    }
}

impl std::error::Error for AmountError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AmountError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }

        // Remove the dollar sign if present: "-$50.00", "$50.00", "+$50.00"
        let (sign, rest) = match trimmed.chars().next() {
            Some(c @ ('-' | '+')) => (Some(c), &trimmed[1..]),
            _ => (None, trimmed),
        };
        let rest = rest.strip_prefix('$').unwrap_or(rest);

        // Remove commas (thousand separators)
        let digits = rest.replace(',', "");
        let normalized = match sign {
            Some('-') => format!("-{digits}"),
            _ => digits,
        };

        let value = Decimal::from_str(&normalized).map_err(AmountError::Parse)?;
        if value.normalize().scale() > SCALE {
            return Err(AmountError::Precision(trimmed.to_string()));
        }
        Amount::new(value).ok_or_else(|| AmountError::Range(trimmed.to_string()))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.value, f)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}
