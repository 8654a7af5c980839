use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockroom_catalog::{ProductEvent, ProductId, VariantId};
use stockroom_core::{AggregateId, TenantId};
use stockroom_events::EventEnvelope;
use stockroom_stock::{StockDirection, StockRecordEvent};

use crate::read_model::TenantStore;

/// On-hand quantity per variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevelReadModel {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub sku: String,
    pub quantity: i64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum StockLevelProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock levels projection.
///
/// Listens to two streams:
/// - `catalog.product` events seed and maintain the variant entries
///   (quantity starts at 0 when a variant is added)
/// - `stock.record` events move quantities, and only on `RecordSubmitted`;
///   draft edits never touch this read model
///
/// Quantities can go negative only if a stock-out is submitted without the
/// service-level availability check; the projection itself does not enforce it.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: TenantStore<VariantId, StockLevelReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: TenantStore<VariantId, StockLevelReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, variant_id: &VariantId) -> Option<StockLevelReadModel> {
        self.store.get(tenant_id, variant_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevelReadModel> {
        self.store.list(tenant_id)
    }

    /// Current on-hand quantity for a variant (0 if unknown).
    pub fn quantity(&self, tenant_id: TenantId, variant_id: &VariantId) -> i64 {
        self.store
            .get(tenant_id, variant_id)
            .map(|l| l.quantity)
            .unwrap_or(0)
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
    /// The cursor is per (tenant, aggregate) stream, so interleaved catalog and
    /// stock streams do not disturb each other.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockLevelProjectionError> {
        let aggregate_type = envelope.aggregate_type();
        if aggregate_type != "catalog.product" && aggregate_type != "stock.record" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(StockLevelProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(StockLevelProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if aggregate_type == "catalog.product" {
            self.apply_product_event(tenant_id, envelope.payload())?;
        } else {
            self.apply_record_event(tenant_id, envelope.payload())?;
        }

        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn apply_product_event(
        &self,
        tenant_id: TenantId,
        payload: &JsonValue,
    ) -> Result<(), StockLevelProjectionError> {
        let ev: ProductEvent = serde_json::from_value(payload.clone())
            .map_err(|e| StockLevelProjectionError::Deserialize(e.to_string()))?;

        match ev {
            ProductEvent::VariantAdded(e) => {
                if e.tenant_id != tenant_id {
                    return Err(StockLevelProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope tenant_id".to_string(),
                    ));
                }
                self.store.upsert(
                    tenant_id,
                    e.variant_id,
                    StockLevelReadModel {
                        variant_id: e.variant_id,
                        product_id: e.product_id,
                        sku: e.sku.as_str().to_string(),
                        quantity: 0,
                    },
                );
            }
            ProductEvent::VariantUpdated(e) => {
                if let Some(mut level) = self.store.get(tenant_id, &e.variant_id) {
                    level.sku = e.sku.as_str().to_string();
                    self.store.upsert(tenant_id, e.variant_id, level);
                }
            }
            ProductEvent::VariantRemoved(e) => {
                self.store.remove(tenant_id, &e.variant_id);
            }
            // Product-level events do not change stock levels.
            _ => {}
        }

        Ok(())
    }

    fn apply_record_event(
        &self,
        tenant_id: TenantId,
        payload: &JsonValue,
    ) -> Result<(), StockLevelProjectionError> {
        let ev: StockRecordEvent = serde_json::from_value(payload.clone())
            .map_err(|e| StockLevelProjectionError::Deserialize(e.to_string()))?;

        // Only submission moves quantities.
        let StockRecordEvent::RecordSubmitted(e) = ev else {
            return Ok(());
        };

        if e.tenant_id != tenant_id {
            return Err(StockLevelProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        for line in &e.lines {
            let mut level = self
                .store
                .get(tenant_id, &line.variant_id)
                .unwrap_or(StockLevelReadModel {
                    variant_id: line.variant_id,
                    product_id: ProductId(AggregateId::from_uuid(uuid::Uuid::nil())),
                    sku: String::new(),
                    quantity: 0,
                });

            match e.direction {
                StockDirection::In => level.quantity += line.quantity,
                StockDirection::Out => level.quantity -= line.quantity,
            }

            self.store.upsert(tenant_id, line.variant_id, level);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockLevelProjectionError> {
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
