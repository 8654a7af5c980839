use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;

use stockroom_catalog::Sku;
use stockroom_infra::projections::{ProductReadModel, StockLevelReadModel, StockRecordReadModel};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct VariantRequest {
    pub sku: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenRecordRequest {
    pub direction: String,
    /// `YYYY-MM-DD`; defaults to today (UTC) when omitted.
    pub entry_date: Option<String>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct StockLineRequest {
    pub variant_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDraftRequest {
    pub entry_date: Option<String>,
    #[serde(default)]
    pub note: String,
    pub lines: Vec<StockLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListRecordsQuery {
    pub status: Option<String>,
    pub direction: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_sku(raw: &str) -> Result<Sku, axum::response::Response> {
    Sku::parse(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_sku", e.to_string()))
}

pub fn parse_entry_date(raw: Option<&str>) -> Result<NaiveDate, axum::response::Response> {
    match raw {
        None => Ok(chrono::Utc::now().date_naive()),
        Some(s) => s.parse::<NaiveDate>().map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_entry_date",
                "entry_date must be YYYY-MM-DD",
            )
        }),
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn product_to_json(rm: ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "description": rm.description,
        "variants": rm.variants.into_iter().map(|v| serde_json::json!({
            "id": v.variant_id.to_string(),
            "sku": v.sku,
            "name": v.name,
        })).collect::<Vec<_>>(),
        "deleted_at": rm.deleted_at.map(|t| t.to_rfc3339()),
        "updated_at": rm.updated_at.to_rfc3339(),
    })
}

pub fn record_to_json(rm: StockRecordReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.record_id.to_string(),
        "code": rm.code,
        "direction": rm.direction.to_string(),
        "status": rm.status,
        "entry_date": rm.entry_date.to_string(),
        "note": rm.note,
        "lines": rm.lines.into_iter().map(|l| serde_json::json!({
            "variant_id": l.variant_id.to_string(),
            "quantity": l.quantity,
        })).collect::<Vec<_>>(),
        "deleted_at": rm.deleted_at.map(|t| t.to_rfc3339()),
        "created_at": rm.created_at.to_rfc3339(),
        "updated_at": rm.updated_at.to_rfc3339(),
    })
}

pub fn level_to_json(rm: StockLevelReadModel) -> serde_json::Value {
    serde_json::json!({
        "variant_id": rm.variant_id.to_string(),
        "product_id": rm.product_id.to_string(),
        "sku": rm.sku,
        "quantity": rm.quantity,
    })
}
