//! Fixed-point amounts in the ledger's native unit.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Number of decimals of the ledger's native unit.
pub const NATIVE_DECIMALS: u32 = 18;

const BPS_DENOMINATOR: u128 = 10_000;

/// An amount of native units.
///
/// Amounts are always integers. They serialize as decimal strings so that no
/// precision is lost when they go through JSON or a text column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    #[error("empty amount")]
    Empty,
    #[error("invalid character in amount: {0}")]
    InvalidDigit(String),
    #[error("too many decimal places (max {max}): {value}")]
    TooManyDecimals { value: String, max: u32 },
    #[error("amount does not fit in 128 bits: {0}")]
    Overflow(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u128) -> Self {
        Amount(units)
    }

    pub const fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Returns `bps` basis points of this amount, rounded down.
    pub fn mul_bps(self, bps: u16) -> Amount {
        let bps = u128::from(bps);
        let whole = (self.0 / BPS_DENOMINATOR) * bps;
        let rest = (self.0 % BPS_DENOMINATOR) * bps / BPS_DENOMINATOR;
        Amount(whole + rest)
    }

    /// Parses a human readable amount, e.g. `"0.2"`, with the given number of decimals.
    pub fn parse_units(value: &str, decimals: u32) -> Result<Amount, AmountParseError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AmountParseError::Empty);
        }

        let (integer, fraction) = match value.split_once('.') {
            Some((integer, fraction)) => (integer, fraction),
            None => (value, ""),
        };

        if integer.is_empty() && fraction.is_empty() {
            return Err(AmountParseError::Empty);
        }

        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if !all_digits(integer) || !all_digits(fraction) {
            return Err(AmountParseError::InvalidDigit(value.to_string()));
        }

        if fraction.len() > decimals as usize {
            return Err(AmountParseError::TooManyDecimals {
                value: value.to_string(),
                max: decimals,
            });
        }

        let overflow = || AmountParseError::Overflow(value.to_string());
        let scale = 10u128.checked_pow(decimals).ok_or_else(overflow)?;

        let integer = if integer.is_empty() {
            0
        } else {
            integer.parse::<u128>().map_err(|_| overflow())?
        };

        let fraction = if fraction.is_empty() {
            0
        } else {
            let padding = 10u128
                .checked_pow(decimals - fraction.len() as u32)
                .ok_or_else(overflow)?;
            fraction.parse::<u128>().map_err(|_| overflow())? * padding
        };

        integer
            .checked_mul(scale)
            .and_then(|units| units.checked_add(fraction))
            .map(Amount)
            .ok_or_else(overflow)
    }

    /// Parses a human readable amount of the native unit.
    pub fn from_native(value: &str) -> Result<Amount, AmountParseError> {
        Self::parse_units(value, NATIVE_DECIMALS)
    }

    /// Formats the amount with the given number of decimals, trimming trailing zeros.
    pub fn format_units(&self, decimals: u32) -> String {
        let Some(scale) = 10u128.checked_pow(decimals) else {
            return self.0.to_string();
        };

        let integer = self.0 / scale;
        let fraction = self.0 % scale;
        if fraction == 0 {
            return integer.to_string();
        }

        let fraction = format!("{:0width$}", fraction, width = decimals as usize);
        format!("{}.{}", integer, fraction.trim_end_matches('0'))
    }

    /// Formats the amount in the native unit, e.g. `"0.2"`.
    pub fn to_native_string(&self) -> String {
        self.format_units(NATIVE_DECIMALS)
    }
}

impl From<u128> for Amount {
    fn from(units: u128) -> Self {
        Amount(units)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    /// Parses an integer amount of native units.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }
        if !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountParseError::InvalidDigit(s.to_string()));
        }
        s.parse::<u128>()
            .map(Amount)
            .map_err(|_| AmountParseError::Overflow(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> de::Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal string or an unsigned integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(u128::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u128::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom("negative amount"))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
