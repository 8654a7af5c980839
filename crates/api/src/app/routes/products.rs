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
use stockroom_catalog::{
    AddVariant, CreateProduct, DeleteProduct, Product, ProductCommand, ProductId, RemoveVariant,
    RestoreProduct, UpdateProduct, UpdateVariant, VariantId,
};
use stockroom_core::AggregateId;

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route(
            "/:id",
            get(get_product)
                .put(update_product)
                .delete(delete_product),
        )
        .route("/:id/restore", post(restore_product))
        .route("/:id/variants", post(add_variant))
        .route(
            "/:id/variants/:vid",
            axum::routing::put(update_variant).delete(remove_variant),
        )
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let sku = match dto::parse_sku(&body.sku) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let agg = AggregateId::new();
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        sku: sku.clone(),
        name: body.name,
        description: body.description,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.create")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    // Product SKUs are unique per tenant; the aggregate cannot see its
    // siblings, so the catalog read model is the arbiter.
    if services.catalog_get_by_sku(tenant.tenant_id(), sku.as_str()).is_some() {
        return errors::json_error(StatusCode::CONFLICT, "conflict", "sku already in use");
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Query(query): Query<dto::ListProductsQuery>,
) -> axum::response::Response {
    let items = services
        .catalog_list(tenant.tenant_id(), query.include_deleted)
        .into_iter()
        .map(dto::product_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    match services.catalog_get(tenant.tenant_id(), &ProductId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    let product_id = ProductId::new(agg);

    let sku = match dto::parse_sku(&body.sku) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::UpdateProduct(UpdateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        sku: sku.clone(),
        name: body.name,
        description: body.description,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    // Uniqueness check, excluding the product being updated.
    if let Some(existing) = services.catalog_get_by_sku(tenant.tenant_id(), sku.as_str()) {
        if existing.product_id != product_id {
            return errors::json_error(StatusCode::CONFLICT, "conflict", "sku already in use");
        }
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn delete_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let cmd = ProductCommand::DeleteProduct(DeleteProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.delete")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn restore_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let cmd = ProductCommand::RestoreProduct(RestoreProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.restore")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    // A soft-deleted product's SKU can be claimed while it is gone;
    // restoring must not resurrect a second live holder of that SKU.
    if let Some(rm) = services.catalog_get(tenant.tenant_id(), &ProductId::new(agg)) {
        if let Some(holder) = services.catalog_get_by_sku(tenant.tenant_id(), &rm.sku) {
            if holder.product_id != ProductId::new(agg) {
                return errors::json_error(StatusCode::CONFLICT, "conflict", "sku already in use");
            }
        }
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn add_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::VariantRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let sku = match dto::parse_sku(&body.sku) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let variant_id = VariantId::new();
    let cmd = ProductCommand::AddVariant(AddVariant {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        variant_id,
        sku,
        name: body.name,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "variant_id": variant_id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn update_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, vid)): Path<(String, String)>,
    Json(body): Json<dto::VariantRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    let variant_id: VariantId = match vid.parse::<Uuid>() {
        Ok(u) => VariantId::from(u),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid variant id"),
    };

    let sku = match dto::parse_sku(&body.sku) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::UpdateVariant(UpdateVariant {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        variant_id,
        sku,
        name: body.name,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}

pub async fn remove_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, vid)): Path<(String, String)>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    let variant_id: VariantId = match vid.parse::<Uuid>() {
        Ok(u) => VariantId::from(u),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid variant id"),
    };

    let cmd = ProductCommand::RemoveVariant(RemoveVariant {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        variant_id,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("catalog.products.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Product>(
        tenant.tenant_id(),
        agg,
        "catalog.product",
        cmd_auth.inner,
        |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (StatusCode::OK, Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()}))).into_response()
}
