use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ValueObject};

/// Maximum SKU length after normalization.
const MAX_SKU_LEN: usize = 64;

/// Stock-keeping unit code.
///
/// Normalized on construction: trimmed and uppercased. Valid SKUs are
/// non-empty, at most 64 characters, drawn from `[A-Z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let normalized = raw.as_ref().trim().to_uppercase();

        if normalized.is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }
        if normalized.len() > MAX_SKU_LEN {
            return Err(DomainError::validation(format!(
                "SKU exceeds {MAX_SKU_LEN} characters"
            )));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')))
        {
            return Err(DomainError::validation(format!(
                "SKU contains invalid character '{bad}'"
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Sku {}

impl core::fmt::Display for Sku {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
