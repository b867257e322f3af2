//! Native-currency amounts
//!
//! Amounts cross the contract boundary as integer base units (wei). Users
//! type and read them as decimal ether. Conversion is exact fixed-point
//! scaling: input with more precision than the chain supports is rejected,
//! never rounded.

use crate::{Error, Result};
use alloy::primitives::U256;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Decimal places of the chain's native currency
pub const DECIMALS: usize = 18;

/// An amount of the native currency, stored in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EtherAmount(U256);

impl EtherAmount {
    pub const ZERO: Self = Self(U256::ZERO);

    pub const fn from_wei(wei: U256) -> Self {
        Self(wei)
    }

    /// Base-unit value sent to the contract
    pub const fn wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a decimal amount that must be strictly positive
    pub fn parse_positive(input: &str) -> Result<Self> {
        let amount: Self = input.parse()?;
        if amount.is_zero() {
            return Err(Error::InvalidArgument(format!(
                "Amount must be greater than zero, got '{}'",
                input.trim()
            )));
        }
        Ok(amount)
    }
}

impl From<U256> for EtherAmount {
    fn from(wei: U256) -> Self {
        Self(wei)
    }
}

impl FromStr for EtherAmount {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let s = input.trim();
        let invalid = |why: &str| Error::InvalidArgument(format!("Invalid amount '{}': {}", s, why));

        if s.is_empty() {
            return Err(invalid("empty"));
        }

        let (whole, frac) = match s.split_once('.') {
            Some((_, "")) => return Err(invalid("missing digits after decimal point")),
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };

        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid("expected a plain decimal number"));
        }
        if frac.len() > DECIMALS {
            return Err(invalid("more than 18 decimal places"));
        }

        let digits = format!("{}{:0<width$}", whole, frac, width = DECIMALS);
        U256::from_str_radix(&digits, 10)
            .map(Self)
            .map_err(|_| invalid("too large"))
    }
}

impl fmt::Display for EtherAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.0, DECIMALS))
    }
}

impl Serialize for EtherAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Format a U256 value with decimals
fn format_units(value: U256, decimals: usize) -> String {
    if value.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10).pow(U256::from(decimals));
    let whole = value / divisor;
    let remainder = value % divisor;

    if remainder.is_zero() {
        return whole.to_string();
    }

    let remainder_str = format!("{:0>width$}", remainder.to_string(), width = decimals);
    format!("{}.{}", whole, remainder_str.trim_end_matches('0'))
}
