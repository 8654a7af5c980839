//! Catalog domain module (event-sourced).
//!
//! Business rules for products and their variants, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;
pub mod sku;

pub use product::{
    AddVariant, CreateProduct, DeleteProduct, Product, ProductCommand, ProductCreated,
    ProductDeleted, ProductEvent, ProductId, ProductRestored, ProductUpdated, RemoveVariant,
    RestoreProduct, UpdateProduct, UpdateVariant, Variant, VariantAdded, VariantId,
    VariantRemoved, VariantUpdated,
};
pub use sku::Sku;
