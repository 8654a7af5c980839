//! Per-tenant, per-day transaction code allocation.
//!
//! Transaction codes (`SI-20260830-0001`) embed a sequence that restarts
//! every day and is scoped to a tenant + direction. The allocator is the
//! single source of those sequences, which is what makes codes unique.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use thiserror::Error;

use stockroom_core::TenantId;
use stockroom_stock::{StockDirection, TransactionCode};

#[derive(Debug, Error)]
pub enum CodeSequenceError {
    #[error("code sequence storage failed: {0}")]
    Storage(String),
}

/// Allocates the next transaction code for a tenant + direction + entry date.
pub trait CodeSequences: Send + Sync {
    fn next_code(
        &self,
        tenant_id: TenantId,
        direction: StockDirection,
        date: NaiveDate,
    ) -> Result<TransactionCode, CodeSequenceError>;
}

impl<S> CodeSequences for Arc<S>
where
    S: CodeSequences + ?Sized,
{
    fn next_code(
        &self,
        tenant_id: TenantId,
        direction: StockDirection,
        date: NaiveDate,
    ) -> Result<TransactionCode, CodeSequenceError> {
        (**self).next_code(tenant_id, direction, date)
    }
}

/// In-memory allocator for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCodeSequences {
    counters: RwLock<HashMap<(TenantId, StockDirection, NaiveDate), u32>>,
}

impl InMemoryCodeSequences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeSequences for InMemoryCodeSequences {
    fn next_code(
        &self,
        tenant_id: TenantId,
        direction: StockDirection,
        date: NaiveDate,
    ) -> Result<TransactionCode, CodeSequenceError> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| CodeSequenceError::Storage("lock poisoned".to_string()))?;

        let counter = counters.entry((tenant_id, direction, date)).or_insert(0);
        *counter += 1;
        Ok(TransactionCode::generate(direction, date, *counter))
    }
}

/// Postgres-backed allocator.
///
/// Uses an upsert on `(tenant_id, direction, seq_date)` so concurrent
/// allocations serialize on the row and never hand out the same sequence.
pub struct PostgresCodeSequences {
    pool: Arc<PgPool>,
}

impl PostgresCodeSequences {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

impl CodeSequences for PostgresCodeSequences {
    fn next_code(
        &self,
        tenant_id: TenantId,
        direction: StockDirection,
        date: NaiveDate,
    ) -> Result<TransactionCode, CodeSequenceError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| CodeSequenceError::Storage("tokio runtime required".to_string()))?;

        let pool = self.pool.clone();
        let tenant_id_uuid = *tenant_id.as_uuid();
        let direction_str = direction.code_prefix();

        let sequence: i32 = handle
            .block_on(async {
                sqlx::query(
                    r#"
                    INSERT INTO transaction_code_sequences (tenant_id, direction, seq_date, last_seq)
                    VALUES ($1, $2, $3, 1)
                    ON CONFLICT (tenant_id, direction, seq_date)
                    DO UPDATE SET last_seq = transaction_code_sequences.last_seq + 1
                    RETURNING last_seq
                    "#,
                )
                .bind(tenant_id_uuid)
                .bind(direction_str)
                .bind(date)
                .fetch_one(&*pool)
                .await
            })
            .map_err(|e| CodeSequenceError::Storage(e.to_string()))?
            .try_get("last_seq")
            .map_err(|e| CodeSequenceError::Storage(e.to_string()))?;

        Ok(TransactionCode::generate(direction, date, sequence as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sequences_start_at_one_and_increment() {
        let seqs = InMemoryCodeSequences::new();
        let tenant_id = TenantId::new();
        let day = date(2026, 8, 30);

        let first = seqs.next_code(tenant_id, StockDirection::In, day).unwrap();
        let second = seqs.next_code(tenant_id, StockDirection::In, day).unwrap();

        assert_eq!(first.as_str(), "SI-20260830-0001");
        assert_eq!(second.as_str(), "SI-20260830-0002");
    }

    #[test]
    fn directions_count_independently() {
        let seqs = InMemoryCodeSequences::new();
        let tenant_id = TenantId::new();
        let day = date(2026, 8, 30);

        seqs.next_code(tenant_id, StockDirection::In, day).unwrap();
        let out = seqs.next_code(tenant_id, StockDirection::Out, day).unwrap();

        assert_eq!(out.as_str(), "SO-20260830-0001");
    }

    #[test]
    fn sequences_reset_per_day() {
        let seqs = InMemoryCodeSequences::new();
        let tenant_id = TenantId::new();

        seqs.next_code(tenant_id, StockDirection::In, date(2026, 8, 30)).unwrap();
        let next_day = seqs
            .next_code(tenant_id, StockDirection::In, date(2026, 8, 31))
            .unwrap();

        assert_eq!(next_day.as_str(), "SI-20260831-0001");
    }

    #[test]
    fn tenants_count_independently() {
        let seqs = InMemoryCodeSequences::new();
        let day = date(2026, 8, 30);

        seqs.next_code(TenantId::new(), StockDirection::In, day).unwrap();
        let other = seqs
            .next_code(TenantId::new(), StockDirection::In, day)
            .unwrap();

        assert_eq!(other.as_str(), "SI-20260830-0001");
    }
}
