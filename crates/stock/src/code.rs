use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ValueObject};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    In,
    Out,
}

impl StockDirection {
    /// Transaction-code prefix for this direction.
    pub fn code_prefix(self) -> &'static str {
        match self {
            StockDirection::In => "SI",
            StockDirection::Out => "SO",
        }
    }
}

impl core::fmt::Display for StockDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StockDirection::In => write!(f, "in"),
            StockDirection::Out => write!(f, "out"),
        }
    }
}

/// Human-readable transaction code, e.g. `SI-20260830-0001`.
///
/// Format: `<SI|SO>-<YYYYMMDD>-<NNNN>` where `NNNN` is a per-tenant, per-day
/// sequence, zero-padded to at least four digits. Codes are unique per tenant;
/// the sequence allocator in the infra layer guarantees that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionCode(String);

impl TransactionCode {
    /// Build a code from its components.
    pub fn generate(direction: StockDirection, date: NaiveDate, sequence: u32) -> Self {
        Self(format!(
            "{}-{}-{:04}",
            direction.code_prefix(),
            date.format("%Y%m%d"),
            sequence
        ))
    }

    /// Parse and validate a code string.
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let raw = raw.as_ref().trim();
        let mut parts = raw.splitn(3, '-');

        let prefix = parts.next().unwrap_or_default();
        if prefix != "SI" && prefix != "SO" {
            return Err(DomainError::validation(
                "transaction code must start with SI or SO",
            ));
        }

        let date = parts.next().unwrap_or_default();
        if date.len() != 8 || !date.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(
                "transaction code date must be YYYYMMDD",
            ));
        }
        if NaiveDate::parse_from_str(date, "%Y%m%d").is_err() {
            return Err(DomainError::validation(
                "transaction code date is not a calendar date",
            ));
        }

        let seq = parts.next().unwrap_or_default();
        if seq.len() < 4 || !seq.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(
                "transaction code sequence must be at least four digits",
            ));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn direction(&self) -> StockDirection {
        if self.0.starts_with("SI") {
            StockDirection::In
        } else {
            StockDirection::Out
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for TransactionCode {}

impl core::fmt::Display for TransactionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn generate_formats_components() {
        let code = TransactionCode::generate(StockDirection::In, date(2026, 8, 30), 7);
        assert_eq!(code.as_str(), "SI-20260830-0007");
        assert_eq!(code.direction(), StockDirection::In);

        let code = TransactionCode::generate(StockDirection::Out, date(2026, 1, 2), 12345);
        assert_eq!(code.as_str(), "SO-20260102-12345");
        assert_eq!(code.direction(), StockDirection::Out);
    }

    #[test]
    fn parse_accepts_generated_codes() {
        let code = TransactionCode::generate(StockDirection::Out, date(2026, 8, 30), 42);
        assert!(TransactionCode::parse(code.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_bad_prefix() {
        assert!(TransactionCode::parse("XX-20260830-0001").is_err());
        assert!(TransactionCode::parse("20260830-0001").is_err());
    }

    #[test]
    fn parse_rejects_bad_date() {
        assert!(TransactionCode::parse("SI-2026083-0001").is_err());
        assert!(TransactionCode::parse("SI-20261345-0001").is_err());
    }

    #[test]
    fn parse_rejects_short_sequence() {
        assert!(TransactionCode::parse("SI-20260830-001").is_err());
        assert!(TransactionCode::parse("SI-20260830-").is_err());
    }
}
