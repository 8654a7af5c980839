//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Tenant-isolated**: data is partitioned by tenant
//! - **Idempotent**: safe for at-least-once delivery

pub mod catalog;
pub mod stock_levels;
pub mod stock_records;
pub mod users;

pub use catalog::{CatalogProjectionError, ProductCatalogProjection, ProductReadModel, VariantReadModel};
pub use stock_levels::{StockLevelProjectionError, StockLevelReadModel, StockLevelsProjection};
pub use stock_records::{StockRecordProjectionError, StockRecordReadModel, StockRecordsProjection};
pub use users::{default_role_permissions, EffectivePermissions, UserReadModel, UsersProjection};
