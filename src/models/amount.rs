use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// UFix64 carries eight fractional digits.
pub const DECIMALS: usize = 8;
pub const UNITS_PER_TOKEN: u64 = 100_000_000;
pub const TOKEN_SYMBOL: &str = "FLOW";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is required")]
    Empty,
    #[error("amount must not be negative")]
    Negative,
    #[error("amount is not a decimal number: {0}")]
    Malformed(String),
    #[error("amount supports at most 8 decimal places")]
    Precision,
    #[error("amount exceeds the UFix64 range")]
    Overflow,
}

/// Non-negative fixed point token amount in 10^-8 base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(u64);

impl TokenAmount {
    pub const ZERO: Self = Self(0);

    pub const fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn base_units(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Human readable form with trailing zeros trimmed, e.g. `1.5 FLOW`.
    pub fn format_balance(self) -> String {
        let whole = self.0 / UNITS_PER_TOKEN;
        let frac = self.0 % UNITS_PER_TOKEN;
        if frac == 0 {
            format!("{whole} {TOKEN_SYMBOL}")
        } else {
            let frac_str = format!("{frac:08}");
            let trimmed = frac_str.trim_end_matches('0');
            format!("{whole}.{trimmed} {TOKEN_SYMBOL}")
        }
    }
}

/// Renders exactly eight fractional digits, the form UFix64 arguments require.
impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / UNITS_PER_TOKEN,
            self.0 % UNITS_PER_TOKEN
        )
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }
        if trimmed.starts_with('-') {
            return Err(AmountError::Negative);
        }

        let (whole, frac) = match trimmed.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Malformed(trimmed.to_string()));
        }
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Malformed(trimmed.to_string()));
        }
        if frac.len() > DECIMALS {
            return Err(AmountError::Precision);
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| AmountError::Overflow)?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = DECIMALS);
            padded
                .parse::<u64>()
                .map_err(|err| AmountError::Malformed(err.to_string()))?
        };

        whole_units
            .checked_mul(UNITS_PER_TOKEN)
            .and_then(|units| units.checked_add(frac_units))
            .map(Self)
            .ok_or(AmountError::Overflow)
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenAmount> for String {
    fn from(amount: TokenAmount) -> Self {
        amount.to_string()
    }
}
