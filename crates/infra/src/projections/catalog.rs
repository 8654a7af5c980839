use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockroom_catalog::{ProductEvent, ProductId, VariantId};
use stockroom_core::{AggregateId, TenantId};
use stockroom_events::EventEnvelope;

use crate::read_model::TenantStore;

/// Queryable variant entry inside the product catalog read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantReadModel {
    pub variant_id: VariantId,
    pub sku: String,
    pub name: String,
}

/// Queryable product read model (catalog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub variants: Vec<VariantReadModel>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProductReadModel {
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
pub enum CatalogProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Product catalog projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a tenant-isolated
/// read model. Soft-deleted products stay in the store with `deleted_at` set so
/// they can be listed and restored.
#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    /// List products for a tenant. `include_deleted` keeps soft-deleted entries.
    pub fn list(&self, tenant_id: TenantId, include_deleted: bool) -> Vec<ProductReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|p| include_deleted || !p.is_deleted())
            .collect()
    }

    /// Find a live product by SKU (linear scan; uniqueness check support).
    pub fn get_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<ProductReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|p| !p.is_deleted() && p.sku == sku)
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
    /// - Enforces tenant isolation
    /// - Enforces monotonic sequence per (tenant, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CatalogProjectionError> {
        if envelope.aggregate_type() != "catalog.product" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CatalogProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, product_id) = match &ev {
            ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductUpdated(e) => (e.tenant_id, e.product_id),
            ProductEvent::VariantAdded(e) => (e.tenant_id, e.product_id),
            ProductEvent::VariantUpdated(e) => (e.tenant_id, e.product_id),
            ProductEvent::VariantRemoved(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductDeleted(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductRestored(e) => (e.tenant_id, e.product_id),
        };

        if event_tenant != tenant_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if product_id.0 != aggregate_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            ProductEvent::ProductCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.product_id,
                    ProductReadModel {
                        product_id: e.product_id,
                        sku: e.sku.as_str().to_string(),
                        name: e.name,
                        description: e.description,
                        variants: vec![],
                        deleted_at: None,
                        updated_at: e.occurred_at,
                    },
                );
            }
            ProductEvent::ProductUpdated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.sku = e.sku.as_str().to_string();
                    rm.name = e.name;
                    rm.description = e.description;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::VariantAdded(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.variants.push(VariantReadModel {
                        variant_id: e.variant_id,
                        sku: e.sku.as_str().to_string(),
                        name: e.name,
                    });
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::VariantUpdated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    if let Some(v) = rm.variants.iter_mut().find(|v| v.variant_id == e.variant_id) {
                        v.sku = e.sku.as_str().to_string();
                        v.name = e.name;
                    }
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::VariantRemoved(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.variants.retain(|v| v.variant_id != e.variant_id);
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::ProductDeleted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.deleted_at = Some(e.occurred_at);
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::ProductRestored(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.deleted_at = None;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.product_id, rm);
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
    ) -> Result<(), CatalogProjectionError> {
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

        // Deterministic replay order: tenant, aggregate, sequence.
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
