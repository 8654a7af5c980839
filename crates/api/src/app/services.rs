use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::NaiveDate;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use stockroom_auth::UserId;
use stockroom_catalog::{ProductId, VariantId};
use stockroom_core::{AggregateId, DomainError, TenantId};
use stockroom_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockroom_infra::{
    code_sequence::{CodeSequenceError, CodeSequences, InMemoryCodeSequences, PostgresCodeSequences},
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, PostgresEventStore, StoredEvent},
    projections::{
        EffectivePermissions, ProductCatalogProjection, ProductReadModel, StockLevelReadModel,
        StockLevelsProjection, StockRecordReadModel, StockRecordsProjection, UserReadModel,
        UsersProjection,
    },
    read_model::{InMemoryTenantStore, PostgresStockLevelStore, TenantStore},
};
use stockroom_stock::{StockDirection, StockRecordId, TransactionCode};

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: serde_json::Value,
}

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;

type CatalogStore = Arc<InMemoryTenantStore<ProductId, ProductReadModel>>;
type RecordStore = Arc<InMemoryTenantStore<StockRecordId, StockRecordReadModel>>;
type LevelStore = Arc<InMemoryTenantStore<VariantId, StockLevelReadModel>>;
type UserStore = Arc<InMemoryTenantStore<UserId, UserReadModel>>;

// Type-erased dispatcher for in-memory implementations
type InMemoryDispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

// Type-erased dispatcher for persistent implementations
type PersistentDispatcher = CommandDispatcher<Arc<PostgresEventStore>, Bus>;

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        dispatcher: Arc<InMemoryDispatcher>,
        event_bus: Bus,
        catalog_projection: Arc<ProductCatalogProjection<CatalogStore>>,
        records_projection: Arc<StockRecordsProjection<RecordStore>>,
        levels_projection: Arc<StockLevelsProjection<LevelStore>>,
        users_projection: Arc<UsersProjection<UserStore>>,
        code_sequences: Arc<dyn CodeSequences>,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
    Persistent {
        dispatcher: Arc<PersistentDispatcher>,
        event_bus: Bus,
        catalog_projection: Arc<ProductCatalogProjection<CatalogStore>>,
        records_projection: Arc<StockRecordsProjection<RecordStore>>,
        levels_projection: Arc<StockLevelsProjection<Arc<PostgresStockLevelStore>>>,
        users_projection: Arc<UsersProjection<UserStore>>,
        code_sequences: Arc<dyn CodeSequences>,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        return build_persistent_services().await;
    }

    build_in_memory_services()
}

fn build_in_memory_services() -> AppServices {
    // In-memory infra wiring (dev/test): store + bus + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let catalog_store: CatalogStore = Arc::new(InMemoryTenantStore::new());
    let catalog_projection = Arc::new(ProductCatalogProjection::new(catalog_store));

    let record_store: RecordStore = Arc::new(InMemoryTenantStore::new());
    let records_projection = Arc::new(StockRecordsProjection::new(record_store));

    let level_store: LevelStore = Arc::new(InMemoryTenantStore::new());
    let levels_projection = Arc::new(StockLevelsProjection::new(level_store));

    let users_store: UserStore = Arc::new(InMemoryTenantStore::new());
    let users_projection = Arc::new(UsersProjection::new(users_store));

    let code_sequences: Arc<dyn CodeSequences> = Arc::new(InMemoryCodeSequences::new());

    // Realtime channel (SSE): lossy broadcast, tenant-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(
        bus.clone(),
        catalog_projection.clone(),
        records_projection.clone(),
        levels_projection.clone(),
        users_projection.clone(),
        realtime_tx.clone(),
    );

    let dispatcher: Arc<InMemoryDispatcher> = Arc::new(CommandDispatcher::new(store, bus.clone()));
    AppServices::InMemory {
        dispatcher,
        event_bus: bus,
        catalog_projection,
        records_projection,
        levels_projection,
        users_projection,
        code_sequences,
        realtime_tx,
    }
}

async fn build_persistent_services() -> AppServices {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .expect("failed to connect to Postgres");

    let store = Arc::new(PostgresEventStore::new(pool.clone()));
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    // Stock levels are kept in Postgres; the other read models stay in-memory
    // and are rebuilt from the stream on restart.
    let level_store = Arc::new(PostgresStockLevelStore::new(pool.clone()));
    let levels_projection = Arc::new(StockLevelsProjection::new(level_store));

    let catalog_store: CatalogStore = Arc::new(InMemoryTenantStore::new());
    let catalog_projection = Arc::new(ProductCatalogProjection::new(catalog_store));

    let record_store: RecordStore = Arc::new(InMemoryTenantStore::new());
    let records_projection = Arc::new(StockRecordsProjection::new(record_store));

    let users_store: UserStore = Arc::new(InMemoryTenantStore::new());
    let users_projection = Arc::new(UsersProjection::new(users_store));

    let code_sequences: Arc<dyn CodeSequences> = Arc::new(PostgresCodeSequences::new(pool));

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(
        bus.clone(),
        catalog_projection.clone(),
        records_projection.clone(),
        levels_projection.clone(),
        users_projection.clone(),
        realtime_tx.clone(),
    );

    let dispatcher: Arc<PersistentDispatcher> = Arc::new(CommandDispatcher::new(store, bus.clone()));
    AppServices::Persistent {
        dispatcher,
        event_bus: bus,
        catalog_projection,
        records_projection,
        levels_projection,
        users_projection,
        code_sequences,
        realtime_tx,
    }
}

/// Background subscriber: bus -> projections, then a realtime notification.
fn spawn_projection_worker<LS>(
    bus: Bus,
    catalog_projection: Arc<ProductCatalogProjection<CatalogStore>>,
    records_projection: Arc<StockRecordsProjection<RecordStore>>,
    levels_projection: Arc<StockLevelsProjection<LS>>,
    users_projection: Arc<UsersProjection<UserStore>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) where
    LS: TenantStore<VariantId, StockLevelReadModel> + Send + Sync + 'static,
{
    let sub = bus.subscribe().expect("event bus subscribe failed");
    tokio::task::spawn_blocking(move || loop {
        match sub.recv() {
            Ok(env) => {
                let at = env.aggregate_type().to_string();

                // Apply to the relevant projection(s) only. The stock-levels
                // projection consumes both catalog and stock streams.
                let apply_ok = match at.as_str() {
                    "catalog.product" => {
                        if let Err(e) = catalog_projection.apply_envelope(&env) {
                            Err(e.to_string())
                        } else if let Err(e) = levels_projection.apply_envelope(&env) {
                            Err(e.to_string())
                        } else {
                            Ok(())
                        }
                    }
                    "stock.record" => {
                        if let Err(e) = records_projection.apply_envelope(&env) {
                            Err(e.to_string())
                        } else if let Err(e) = levels_projection.apply_envelope(&env) {
                            Err(e.to_string())
                        } else {
                            Ok(())
                        }
                    }
                    "auth.user" => users_projection.apply_envelope(&env).map_err(|e| e.to_string()),
                    _ => Ok(()),
                };

                if let Err(e) = apply_ok {
                    tracing::warn!("projection apply failed: {e}");
                    continue;
                }

                // Broadcast projection update (lossy; no backpressure on core).
                let _ = realtime_tx.send(RealtimeMessage {
                    tenant_id: env.tenant_id(),
                    topic: format!("{at}.projection_updated"),
                    payload: serde_json::json!({
                        "kind": "projection_update",
                        "aggregate_type": at,
                        "aggregate_id": env.aggregate_id().to_string(),
                        "sequence_number": env.sequence_number(),
                    }),
                });
            }
            Err(_) => break,
        }
    });
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        match self {
            AppServices::InMemory { realtime_tx, .. } => realtime_tx,
            AppServices::Persistent { realtime_tx, .. } => realtime_tx,
        }
    }

    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: stockroom_core::Aggregate<Error = DomainError>,
        A::Event: stockroom_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => dispatcher.dispatch::<A>(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            AppServices::Persistent { dispatcher, .. } => dispatcher.dispatch::<A>(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
        }
    }

    pub fn next_code(
        &self,
        tenant_id: TenantId,
        direction: StockDirection,
        date: NaiveDate,
    ) -> Result<TransactionCode, CodeSequenceError> {
        match self {
            AppServices::InMemory { code_sequences, .. } => {
                code_sequences.next_code(tenant_id, direction, date)
            }
            AppServices::Persistent { code_sequences, .. } => {
                code_sequences.next_code(tenant_id, direction, date)
            }
        }
    }

    pub fn catalog_get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        match self {
            AppServices::InMemory { catalog_projection, .. } => catalog_projection.get(tenant_id, product_id),
            AppServices::Persistent { catalog_projection, .. } => catalog_projection.get(tenant_id, product_id),
        }
    }

    pub fn catalog_list(&self, tenant_id: TenantId, include_deleted: bool) -> Vec<ProductReadModel> {
        match self {
            AppServices::InMemory { catalog_projection, .. } => {
                catalog_projection.list(tenant_id, include_deleted)
            }
            AppServices::Persistent { catalog_projection, .. } => {
                catalog_projection.list(tenant_id, include_deleted)
            }
        }
    }

    pub fn catalog_get_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<ProductReadModel> {
        match self {
            AppServices::InMemory { catalog_projection, .. } => catalog_projection.get_by_sku(tenant_id, sku),
            AppServices::Persistent { catalog_projection, .. } => catalog_projection.get_by_sku(tenant_id, sku),
        }
    }

    pub fn records_get(
        &self,
        tenant_id: TenantId,
        record_id: &StockRecordId,
    ) -> Option<StockRecordReadModel> {
        match self {
            AppServices::InMemory { records_projection, .. } => records_projection.get(tenant_id, record_id),
            AppServices::Persistent { records_projection, .. } => records_projection.get(tenant_id, record_id),
        }
    }

    pub fn records_list(&self, tenant_id: TenantId, include_deleted: bool) -> Vec<StockRecordReadModel> {
        match self {
            AppServices::InMemory { records_projection, .. } => {
                records_projection.list(tenant_id, include_deleted)
            }
            AppServices::Persistent { records_projection, .. } => {
                records_projection.list(tenant_id, include_deleted)
            }
        }
    }

    pub fn levels_list(&self, tenant_id: TenantId) -> Vec<StockLevelReadModel> {
        match self {
            AppServices::InMemory { levels_projection, .. } => levels_projection.list(tenant_id),
            AppServices::Persistent { levels_projection, .. } => levels_projection.list(tenant_id),
        }
    }

    pub fn level_quantity(&self, tenant_id: TenantId, variant_id: &VariantId) -> i64 {
        match self {
            AppServices::InMemory { levels_projection, .. } => {
                levels_projection.quantity(tenant_id, variant_id)
            }
            AppServices::Persistent { levels_projection, .. } => {
                levels_projection.quantity(tenant_id, variant_id)
            }
        }
    }

    pub fn users_get(&self, tenant_id: TenantId, user_id: &UserId) -> Option<UserReadModel> {
        match self {
            AppServices::InMemory { users_projection, .. } => users_projection.get(tenant_id, user_id),
            AppServices::Persistent { users_projection, .. } => users_projection.get(tenant_id, user_id),
        }
    }

    pub fn users_list(&self, tenant_id: TenantId) -> Vec<UserReadModel> {
        match self {
            AppServices::InMemory { users_projection, .. } => users_projection.list(tenant_id),
            AppServices::Persistent { users_projection, .. } => users_projection.list(tenant_id),
        }
    }

    pub fn users_effective_permissions<F>(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        role_permissions: F,
    ) -> Option<EffectivePermissions>
    where
        F: Fn(&str) -> Vec<String>,
    {
        match self {
            AppServices::InMemory { users_projection, .. } => {
                users_projection.effective_permissions(tenant_id, user_id, role_permissions)
            }
            AppServices::Persistent { users_projection, .. } => {
                users_projection.effective_permissions(tenant_id, user_id, role_permissions)
            }
        }
    }
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
