//! Money is always an integer count of micro-USDC (1e-6 USDC, the USDC
//! minor unit). `ProfitMonth` is the `YYYYMM` calendar key used to key
//! settlements and reconciliation.

use crate::error::{Error, Result};
use std::fmt;

/// Integer micro-units of USDC. Signed because capital deltas and
/// reconciliation deltas may be negative.
pub type Micro = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProfitMonth(String);

impl ProfitMonth {
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::validation("profit_month_id"));
        }
        let month: u32 = value[4..6].parse().map_err(|_| Error::validation("profit_month_id"))?;
        if !(1..=12).contains(&month) {
            return Err(Error::validation("profit_month_id"));
        }
        Ok(ProfitMonth(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfitMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProfitMonth {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_months() {
        assert!(ProfitMonth::parse("202501").is_ok());
        assert!(ProfitMonth::parse("202512").is_ok());
    }

    #[test]
    fn rejects_bad_shape_or_month() {
        assert!(ProfitMonth::parse("2025013").is_err());
        assert!(ProfitMonth::parse("202500").is_err());
        assert!(ProfitMonth::parse("202513").is_err());
        assert!(ProfitMonth::parse("abcdef").is_err());
    }
}
