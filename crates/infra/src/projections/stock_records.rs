use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockroom_core::{AggregateId, TenantId};
use stockroom_events::EventEnvelope;
use stockroom_stock::{StockDirection, StockLine, StockRecordEvent, StockRecordId};

use crate::read_model::TenantStore;

/// Queryable stock record read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecordReadModel {
    pub record_id: StockRecordId,
    pub code: String,
    pub direction: StockDirection,
    pub status: String,
    pub entry_date: NaiveDate,
    pub note: String,
    pub lines: Vec<StockLine>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRecordReadModel {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum StockRecordProjectionError {
    #[error("failed to deserialize stock record event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock records projection.
///
/// Maintains the per-tenant directory of stock-in/stock-out records, including
/// their lifecycle status. On-hand quantities live in the stock levels
/// projection, not here.
#[derive(Debug)]
pub struct StockRecordsProjection<S>
where
    S: TenantStore<StockRecordId, StockRecordReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockRecordsProjection<S>
where
    S: TenantStore<StockRecordId, StockRecordReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, record_id: &StockRecordId) -> Option<StockRecordReadModel> {
        self.store.get(tenant_id, record_id)
    }

    /// List records for a tenant. `include_deleted` keeps soft-deleted entries.
    pub fn list(&self, tenant_id: TenantId, include_deleted: bool) -> Vec<StockRecordReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|r| include_deleted || !r.is_deleted())
            .collect()
    }

    /// Find a record by its transaction code (linear scan; uniqueness support).
    pub fn get_by_code(&self, tenant_id: TenantId, code: &str) -> Option<StockRecordReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|r| r.code == code)
    }

    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey { tenant_id, aggregate_id })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(CursorKey { tenant_id, aggregate_id }, sequence_number);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }

    /// Apply a published envelope into the projection.
    ///
    /// Idempotent for at-least-once delivery; replays <= cursor are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockRecordProjectionError> {
        if envelope.aggregate_type() != "stock.record" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(StockRecordProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(StockRecordProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: StockRecordEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockRecordProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, record_id) = match &ev {
            StockRecordEvent::RecordOpened(e) => (e.tenant_id, e.record_id),
            StockRecordEvent::DraftUpdated(e) => (e.tenant_id, e.record_id),
            StockRecordEvent::RecordSubmitted(e) => (e.tenant_id, e.record_id),
            StockRecordEvent::RecordDeleted(e) => (e.tenant_id, e.record_id),
            StockRecordEvent::RecordRestored(e) => (e.tenant_id, e.record_id),
        };

        if event_tenant != tenant_id {
            return Err(StockRecordProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if record_id.0 != aggregate_id {
            return Err(StockRecordProjectionError::TenantIsolation(
                "event record_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            StockRecordEvent::RecordOpened(e) => {
                self.store.upsert(
                    tenant_id,
                    e.record_id,
                    StockRecordReadModel {
                        record_id: e.record_id,
                        code: e.code.as_str().to_string(),
                        direction: e.direction,
                        status: "draft".to_string(),
                        entry_date: e.entry_date,
                        note: e.note,
                        lines: vec![],
                        deleted_at: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            StockRecordEvent::DraftUpdated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.record_id) {
                    rm.entry_date = e.entry_date;
                    rm.note = e.note;
                    rm.lines = e.lines;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.record_id, rm);
                }
            }
            StockRecordEvent::RecordSubmitted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.record_id) {
                    rm.status = "submitted".to_string();
                    rm.lines = e.lines;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.record_id, rm);
                }
            }
            StockRecordEvent::RecordDeleted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.record_id) {
                    rm.deleted_at = Some(e.occurred_at);
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.record_id, rm);
                }
            }
            StockRecordEvent::RecordRestored(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.record_id) {
                    rm.deleted_at = None;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.record_id, rm);
                }
            }
        }

        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockRecordProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.clear_cursors(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
