use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use stockroom_auth::Permission;
use stockroom_catalog::VariantId;
use stockroom_core::AggregateId;
use stockroom_stock::{
    DeleteRecord, OpenRecord, RestoreRecord, StockDirection, StockLine, StockRecord,
    StockRecordCommand, StockRecordId, SubmitRecord, UpdateDraft,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/records", post(open_record).get(list_records))
        .route(
            "/records/:id",
            get(get_record).put(update_draft).delete(delete_record),
        )
        .route("/records/:id/submit", post(submit_record))
        .route("/records/:id/restore", post(restore_record))
        .route("/levels", get(list_levels))
}

pub async fn open_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::OpenRecordRequest>,
) -> axum::response::Response {
    let direction = match errors::parse_direction(&body.direction) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let entry_date = match dto::parse_entry_date(body.entry_date.as_deref()) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    // Authorize before allocating a code so forbidden requests do not burn
    // sequence numbers.
    let guard = CmdAuth::<()> {
        inner: (),
        required: vec![Permission::new("stock.records.create")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &guard) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let code = match services.next_code(tenant.tenant_id(), direction, entry_date) {
        Ok(c) => c,
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    };

    let agg = AggregateId::new();
    let record_id = StockRecordId::new(agg);

    let cmd = StockRecordCommand::OpenRecord(OpenRecord {
        tenant_id: tenant.tenant_id(),
        record_id,
        direction,
        code: code.clone(),
        entry_date,
        note: body.note,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<StockRecord>(
        tenant.tenant_id(),
        agg,
        "stock.record",
        cmd,
        |_t, aggregate_id| StockRecord::empty(StockRecordId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "code": code.as_str(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn list_records(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Query(query): Query<dto::ListRecordsQuery>,
) -> axum::response::Response {
    let direction = match query.direction.as_deref() {
        Some(raw) => match errors::parse_direction(raw) {
            Ok(d) => Some(d),
            Err(resp) => return resp,
        },
        None => None,
    };

    let items = services
        .records_list(tenant.tenant_id(), query.include_deleted)
        .into_iter()
        .filter(|rm| query.status.as_deref().is_none_or(|s| rm.status == s))
        .filter(|rm| direction.is_none_or(|d| rm.direction == d))
        .map(dto::record_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid record id"),
    };
    match services.records_get(tenant.tenant_id(), &StockRecordId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::record_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "record not found"),
    }
}

pub async fn update_draft(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateDraftRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid record id"),
    };
    let entry_date = match dto::parse_entry_date(body.entry_date.as_deref()) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let mut lines = Vec::with_capacity(body.lines.len());
    for line in body.lines {
        let variant_id = match line.variant_id.parse::<Uuid>() {
            Ok(u) => VariantId::from(u),
            Err(_) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid variant id")
            }
        };
        lines.push(StockLine {
            variant_id,
            quantity: line.quantity,
        });
    }

    let cmd = StockRecordCommand::UpdateDraft(UpdateDraft {
        tenant_id: tenant.tenant_id(),
        record_id: StockRecordId::new(agg),
        entry_date,
        note: body.note,
        lines,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("stock.records.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<StockRecord>(
        tenant.tenant_id(),
        agg,
        "stock.record",
        cmd_auth.inner,
        |_t, aggregate_id| StockRecord::empty(StockRecordId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn submit_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid record id"),
    };
    let record_id = StockRecordId::new(agg);

    let cmd = StockRecordCommand::SubmitRecord(SubmitRecord {
        tenant_id: tenant.tenant_id(),
        record_id,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("stock.records.submit")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    // Availability check for stock-out: the aggregate only sees its own
    // stream, so on-hand quantities are checked against the levels read model.
    // The projection lags the store, so poll briefly; a record that never
    // shows up must not slip past the check.
    let mut record_rm = services.records_get(tenant.tenant_id(), &record_id);
    for _ in 0..50 {
        if record_rm.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        record_rm = services.records_get(tenant.tenant_id(), &record_id);
    }
    let Some(rm) = record_rm else {
        return errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            "record not yet visible, retry",
        );
    };
    if rm.direction == StockDirection::Out {
        for line in &rm.lines {
            let on_hand = services.level_quantity(tenant.tenant_id(), &line.variant_id);
            if on_hand < line.quantity {
                return errors::json_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invariant_violation",
                    format!(
                        "insufficient stock for variant {} (on hand {}, requested {})",
                        line.variant_id, on_hand, line.quantity
                    ),
                );
            }
        }
    }

    let committed = match services.dispatch::<StockRecord>(
        tenant.tenant_id(),
        agg,
        "stock.record",
        cmd_auth.inner,
        |_t, aggregate_id| StockRecord::empty(StockRecordId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn delete_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid record id"),
    };

    let cmd = StockRecordCommand::DeleteRecord(DeleteRecord {
        tenant_id: tenant.tenant_id(),
        record_id: StockRecordId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("stock.records.delete")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<StockRecord>(
        tenant.tenant_id(),
        agg,
        "stock.record",
        cmd_auth.inner,
        |_t, aggregate_id| StockRecord::empty(StockRecordId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn restore_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid record id"),
    };

    let cmd = StockRecordCommand::RestoreRecord(RestoreRecord {
        tenant_id: tenant.tenant_id(),
        record_id: StockRecordId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("stock.records.restore")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<StockRecord>(
        tenant.tenant_id(),
        agg,
        "stock.record",
        cmd_auth.inner,
        |_t, aggregate_id| StockRecord::empty(StockRecordId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn list_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .levels_list(tenant.tenant_id())
        .into_iter()
        .map(dto::level_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
