use axum::{routing::get, Router};

pub mod admin;
pub mod common;
pub mod products;
pub mod stock;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/products", products::router())
        .nest("/stock", stock::router())
        .nest("/admin", admin::router())
}
