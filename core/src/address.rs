//! Hex identifiers: account addresses and transaction hashes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexIdError {
    #[error("missing 0x prefix: {0}")]
    MissingPrefix(String),
    #[error("expected {expected} hex characters, got {actual}: {value}")]
    InvalidLength {
        value: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid hex value: {0}")]
    InvalidHex(String),
}

fn normalize_hex(value: &str, bytes: usize) -> Result<String, HexIdError> {
    let value = value.trim();
    let Some(digits) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    else {
        return Err(HexIdError::MissingPrefix(value.to_string()));
    };

    if digits.len() != bytes * 2 {
        return Err(HexIdError::InvalidLength {
            value: value.to_string(),
            expected: bytes * 2,
            actual: digits.len(),
        });
    }

    hex::decode(digits).map_err(|_| HexIdError::InvalidHex(value.to_string()))?;

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

fn low_u64_be(value: u64, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    buf[bytes - 8..].copy_from_slice(&value.to_be_bytes());
    format!("0x{}", hex::encode(buf))
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $bytes:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const BYTES: usize = $bytes;

            /// Builds an identifier whose last eight bytes are `value`.
            pub fn from_low_u64_be(value: u64) -> Self {
                Self(low_u64_be(value, Self::BYTES))
            }

            pub fn from_bytes(bytes: [u8; $bytes]) -> Self {
                Self(format!("0x{}", hex::encode(bytes)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = HexIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                normalize_hex(s, Self::BYTES).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = HexIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

hex_id!(
    /// A 20 bytes account address, stored lowercase.
    Address,
    20
);

hex_id!(
    /// A 32 bytes transaction hash, stored lowercase.
    ///
    /// The transaction hash is the idempotency key of pledges, releases and refunds.
    TxHash,
    32
);
