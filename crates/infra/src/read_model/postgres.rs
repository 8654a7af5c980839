//! Postgres-backed read model storage.
//!
//! Persistent storage for the stock levels read model. Every query includes
//! `tenant_id` in the WHERE clause or as part of the primary key, making
//! cross-tenant access architecturally impossible. `clear_tenant()` removes
//! all rows for a tenant, enabling deterministic rebuilds from the stream.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::Span;

use stockroom_catalog::{ProductId, VariantId};
use stockroom_core::TenantId;

use super::TenantStore;
use crate::projections::stock_levels::StockLevelReadModel;

/// Postgres-backed tenant store for `StockLevelReadModel`, mapped to the
/// `stock_levels` table.
pub struct PostgresStockLevelStore {
    pool: Arc<PgPool>,
}

impl PostgresStockLevelStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn row_to_level(row: &sqlx::postgres::PgRow) -> Option<StockLevelReadModel> {
    let variant_id: uuid::Uuid = row.try_get("variant_id").ok()?;
    let product_id: uuid::Uuid = row.try_get("product_id").ok()?;
    let sku: String = row.try_get("sku").ok()?;
    let quantity: i64 = row.try_get("quantity").ok()?;
    Some(StockLevelReadModel {
        variant_id: VariantId::from(variant_id),
        product_id: ProductId(stockroom_core::AggregateId::from_uuid(product_id)),
        sku,
        quantity,
    })
}

// TenantStore is synchronous; Postgres operations run via the ambient tokio
// runtime handle, same as PostgresEventStore.

impl TenantStore<VariantId, StockLevelReadModel> for PostgresStockLevelStore {
    fn get(&self, tenant_id: TenantId, key: &VariantId) -> Option<StockLevelReadModel> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let variant_id_uuid = *key.as_uuid();

        handle.block_on(async {
            let span = Span::current();
            span.record("operation", "get_stock_level");

            match sqlx::query(
                r#"
                SELECT
                    tenant_id,
                    variant_id,
                    product_id,
                    sku,
                    quantity,
                    updated_at
                FROM stock_levels
                WHERE tenant_id = $1 AND variant_id = $2
                "#,
            )
            .bind(tenant_id_uuid)
            .bind(variant_id_uuid)
            .fetch_optional(&*pool)
            .await
            {
                Ok(Some(row)) => row_to_level(&row),
                Ok(None) => None,
                Err(_) => None,
            }
        })
    }

    fn upsert(&self, tenant_id: TenantId, key: VariantId, value: StockLevelReadModel) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let variant_id_uuid = *key.as_uuid();
        let product_id_uuid = *value.product_id.0.as_uuid();

        let _ = handle.block_on(async {
            let span = Span::current();
            span.record("operation", "upsert_stock_level");

            let _ = sqlx::query(
                r#"
                INSERT INTO stock_levels (
                    tenant_id,
                    variant_id,
                    product_id,
                    sku,
                    quantity
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tenant_id, variant_id)
                DO UPDATE SET
                    product_id = EXCLUDED.product_id,
                    sku = EXCLUDED.sku,
                    quantity = EXCLUDED.quantity,
                    updated_at = NOW()
                "#,
            )
            .bind(tenant_id_uuid)
            .bind(variant_id_uuid)
            .bind(product_id_uuid)
            .bind(&value.sku)
            .bind(value.quantity)
            .execute(&*pool)
            .await;
        });
    }

    fn list(&self, tenant_id: TenantId) -> Vec<StockLevelReadModel> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return vec![],
        };

        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();

        handle.block_on(async {
            let span = Span::current();
            span.record("operation", "list_stock_levels");

            match sqlx::query(
                r#"
                SELECT
                    tenant_id,
                    variant_id,
                    product_id,
                    sku,
                    quantity,
                    updated_at
                FROM stock_levels
                WHERE tenant_id = $1
                ORDER BY sku ASC
                "#,
            )
            .bind(tenant_id_uuid)
            .fetch_all(&*pool)
            .await
            {
                Ok(rows) => rows.iter().filter_map(row_to_level).collect(),
                Err(_) => vec![],
            }
        })
    }

    fn remove(&self, tenant_id: TenantId, key: &VariantId) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let variant_id_uuid = *key.as_uuid();

        let _ = handle.block_on(async {
            let _ = sqlx::query(
                "DELETE FROM stock_levels WHERE tenant_id = $1 AND variant_id = $2",
            )
            .bind(tenant_id_uuid)
            .bind(variant_id_uuid)
            .execute(&*pool)
            .await;
        });
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();

        let _ = handle.block_on(async {
            let _ = sqlx::query("DELETE FROM stock_levels WHERE tenant_id = $1")
                .bind(tenant_id_uuid)
                .execute(&*pool)
                .await;
        });
    }
}
