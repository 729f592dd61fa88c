use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Flow account addresses are eight bytes, rendered as `0x` + 16 hex digits.
pub const ADDRESS_BYTES: usize = 8;
const ADDRESS_HEX_LEN: usize = ADDRESS_BYTES * 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address cannot be empty")]
    Empty,
    #[error("address exceeds 8 bytes")]
    TooLong,
    #[error("address is not valid hex: {0}")]
    InvalidHex(String),
}

/// Canonical account address. Always lowercase, zero padded and `0x`
/// prefixed so two spellings of one account compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let trimmed = value.trim();
        let digits = strip_hex_prefix(trimmed);
        if digits.is_empty() {
            return Err(AddressError::Empty);
        }
        if digits.len() > ADDRESS_HEX_LEN {
            return Err(AddressError::TooLong);
        }
        let padded = format!("{:0>width$}", digits, width = ADDRESS_HEX_LEN).to_ascii_lowercase();
        let bytes = hex::decode(&padded).map_err(|err| AddressError::InvalidHex(err.to_string()))?;
        assert_eq!(bytes.len(), ADDRESS_BYTES, "Padded address must decode to 8 bytes");
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
