use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Entity, TenantId};
use stockroom_events::Event;

use crate::sku::Sku;

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Variant identifier, unique within its product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(Uuid);

impl VariantId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VariantId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for VariantId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<VariantId> for Uuid {
    fn from(value: VariantId) -> Self {
        value.0
    }
}

/// Child entity: a sellable variation of a product (size, color, pack size).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub sku: Sku,
    pub name: String,
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Aggregate root: Product.
///
/// Holds the catalog identity (SKU, name, description) and its child
/// variants. Deletion is soft: a tombstone timestamp, reversible via restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: Option<Sku>,
    name: String,
    description: String,
    variants: Vec<Variant>,
    deleted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: None,
            name: String::new(),
            description: String::new(),
            variants: Vec::new(),
            deleted_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> Option<&Sku> {
        self.sku.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateProduct (SKU, name, description).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddVariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVariant {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: Sku,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateVariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVariant {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: Sku,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveVariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveVariant {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteProduct (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestoreProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdateProduct(UpdateProduct),
    AddVariant(AddVariant),
    UpdateVariant(UpdateVariant),
    RemoveVariant(RemoveVariant),
    DeleteProduct(DeleteProduct),
    RestoreProduct(RestoreProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAdded {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: Sku,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: Sku,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRemoved {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductDeleted (soft delete tombstone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeleted {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductRestored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRestored {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    VariantAdded(VariantAdded),
    VariantUpdated(VariantUpdated),
    VariantRemoved(VariantRemoved),
    ProductDeleted(ProductDeleted),
    ProductRestored(ProductRestored),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::ProductUpdated(_) => "catalog.product.updated",
            ProductEvent::VariantAdded(_) => "catalog.product.variant_added",
            ProductEvent::VariantUpdated(_) => "catalog.product.variant_updated",
            ProductEvent::VariantRemoved(_) => "catalog.product.variant_removed",
            ProductEvent::ProductDeleted(_) => "catalog.product.deleted",
            ProductEvent::ProductRestored(_) => "catalog.product.restored",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductUpdated(e) => e.occurred_at,
            ProductEvent::VariantAdded(e) => e.occurred_at,
            ProductEvent::VariantUpdated(e) => e.occurred_at,
            ProductEvent::VariantRemoved(e) => e.occurred_at,
            ProductEvent::ProductDeleted(e) => e.occurred_at,
            ProductEvent::ProductRestored(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = Some(e.sku.clone());
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.deleted_at = None;
                self.created = true;
            }
            ProductEvent::ProductUpdated(e) => {
                self.sku = Some(e.sku.clone());
                self.name = e.name.clone();
                self.description = e.description.clone();
            }
            ProductEvent::VariantAdded(e) => {
                self.variants.push(Variant {
                    id: e.variant_id,
                    sku: e.sku.clone(),
                    name: e.name.clone(),
                });
            }
            ProductEvent::VariantUpdated(e) => {
                if let Some(variant) = self.variants.iter_mut().find(|v| v.id == e.variant_id) {
                    variant.sku = e.sku.clone();
                    variant.name = e.name.clone();
                }
            }
            ProductEvent::VariantRemoved(e) => {
                self.variants.retain(|v| v.id != e.variant_id);
            }
            ProductEvent::ProductDeleted(e) => {
                self.deleted_at = Some(e.occurred_at);
            }
            ProductEvent::ProductRestored(_) => {
                self.deleted_at = None;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdateProduct(cmd) => self.handle_update(cmd),
            ProductCommand::AddVariant(cmd) => self.handle_add_variant(cmd),
            ProductCommand::UpdateVariant(cmd) => self.handle_update_variant(cmd),
            ProductCommand::RemoveVariant(cmd) => self.handle_remove_variant(cmd),
            ProductCommand::DeleteProduct(cmd) => self.handle_delete(cmd),
            ProductCommand::RestoreProduct(cmd) => self.handle_restore(cmd),
        }
    }
}

impl Product {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_not_deleted(&self) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::invariant("product is deleted"));
        }
        Ok(())
    }

    fn variant_sku_taken(&self, sku: &Sku, except: Option<VariantId>) -> bool {
        self.variants
            .iter()
            .any(|v| Some(v.id) != except && v.sku == *sku)
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        // Note: product SKU uniqueness per tenant cannot be checked here; the
        // aggregate cannot see its siblings. The service layer validates
        // against the catalog read model before dispatching.

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.clone(),
            name: cmd.name.trim().to_string(),
            description: cmd.description.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;
        self.ensure_not_deleted()?;

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![ProductEvent::ProductUpdated(ProductUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.clone(),
            name: cmd.name.trim().to_string(),
            description: cmd.description.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_variant(&self, cmd: &AddVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;
        self.ensure_not_deleted()?;

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("variant name cannot be empty"));
        }

        if self.variant(cmd.variant_id).is_some() {
            return Err(DomainError::conflict("variant already exists"));
        }

        if self.variant_sku_taken(&cmd.sku, None) {
            return Err(DomainError::conflict(format!(
                "variant SKU '{}' already used in this product",
                cmd.sku
            )));
        }

        Ok(vec![ProductEvent::VariantAdded(VariantAdded {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            sku: cmd.sku.clone(),
            name: cmd.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_variant(&self, cmd: &UpdateVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;
        self.ensure_not_deleted()?;

        if self.variant(cmd.variant_id).is_none() {
            return Err(DomainError::not_found());
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("variant name cannot be empty"));
        }

        if self.variant_sku_taken(&cmd.sku, Some(cmd.variant_id)) {
            return Err(DomainError::conflict(format!(
                "variant SKU '{}' already used in this product",
                cmd.sku
            )));
        }

        Ok(vec![ProductEvent::VariantUpdated(VariantUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            sku: cmd.sku.clone(),
            name: cmd.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_variant(&self, cmd: &RemoveVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;
        self.ensure_not_deleted()?;

        if self.variant(cmd.variant_id).is_none() {
            return Err(DomainError::not_found());
        }

        Ok(vec![ProductEvent::VariantRemoved(VariantRemoved {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.is_deleted() {
            return Err(DomainError::conflict("product is already deleted"));
        }

        Ok(vec![ProductEvent::ProductDeleted(ProductDeleted {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestoreProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if !self.is_deleted() {
            return Err(DomainError::conflict("product is not deleted"));
        }

        Ok(vec![ProductEvent::ProductRestored(ProductRestored {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::AggregateId;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn sku(raw: &str) -> Sku {
        Sku::parse(raw).unwrap()
    }

    fn created_product(tenant_id: TenantId, product_id: ProductId) -> Product {
        let mut product = Product::empty(product_id);
        let cmd = ProductCommand::CreateProduct(CreateProduct {
            tenant_id,
            product_id,
            sku: sku("WIDGET-01"),
            name: "Widget".to_string(),
            description: "A widget".to_string(),
            occurred_at: test_time(),
        });
        for event in product.handle(&cmd).unwrap() {
            product.apply(&event);
        }
        product
    }

    fn add_variant(product: &mut Product, variant_sku: &str, name: &str) -> VariantId {
        let variant_id = VariantId::new();
        let cmd = ProductCommand::AddVariant(AddVariant {
            tenant_id: product.tenant_id().unwrap(),
            product_id: product.id_typed(),
            variant_id,
            sku: sku(variant_sku),
            name: name.to_string(),
            occurred_at: test_time(),
        });
        for event in product.handle(&cmd).unwrap() {
            product.apply(&event);
        }
        variant_id
    }

    #[test]
    fn create_product_emits_product_created_event() {
        let product = Product::empty(test_product_id());
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let cmd = CreateProduct {
            tenant_id,
            product_id,
            sku: sku("WIDGET-01"),
            name: "Widget".to_string(),
            description: String::new(),
            occurred_at: test_time(),
        };

        let events = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ProductEvent::ProductCreated(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.product_id, product_id);
                assert_eq!(e.sku.as_str(), "WIDGET-01");
                assert_eq!(e.name, "Widget");
            }
            _ => panic!("Expected ProductCreated event"),
        }
    }

    #[test]
    fn create_product_rejects_empty_name() {
        let product = Product::empty(test_product_id());
        let cmd = CreateProduct {
            tenant_id: test_tenant_id(),
            product_id: test_product_id(),
            sku: sku("WIDGET-01"),
            name: "   ".to_string(),
            description: String::new(),
            occurred_at: test_time(),
        };

        let err = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_product_rejects_duplicate_creation() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id);

        let cmd = CreateProduct {
            tenant_id,
            product_id,
            sku: sku("OTHER-01"),
            name: "Other".to_string(),
            description: String::new(),
            occurred_at: test_time(),
        };

        let err = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn update_product_replaces_fields() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);

        let cmd = ProductCommand::UpdateProduct(UpdateProduct {
            tenant_id,
            product_id,
            sku: sku("WIDGET-02"),
            name: "Widget Mk2".to_string(),
            description: "Improved widget".to_string(),
            occurred_at: test_time(),
        });
        for event in product.handle(&cmd).unwrap() {
            product.apply(&event);
        }

        assert_eq!(product.sku().unwrap().as_str(), "WIDGET-02");
        assert_eq!(product.name(), "Widget Mk2");
        assert_eq!(product.description(), "Improved widget");
        assert_eq!(product.version(), 2);
    }

    #[test]
    fn add_variant_appends_child_entity() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);

        let variant_id = add_variant(&mut product, "WIDGET-01-RED", "Red");

        assert_eq!(product.variants().len(), 1);
        let variant = product.variant(variant_id).unwrap();
        assert_eq!(variant.sku.as_str(), "WIDGET-01-RED");
        assert_eq!(variant.name, "Red");
    }

    #[test]
    fn add_variant_rejects_duplicate_sku_within_product() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);
        add_variant(&mut product, "WIDGET-01-RED", "Red");

        let cmd = ProductCommand::AddVariant(AddVariant {
            tenant_id,
            product_id,
            variant_id: VariantId::new(),
            sku: sku("widget-01-red"), // normalizes to the same SKU
            name: "Crimson".to_string(),
            occurred_at: test_time(),
        });

        let err = product.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn update_variant_rejects_sku_collision_with_sibling() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);
        add_variant(&mut product, "WIDGET-01-RED", "Red");
        let blue = add_variant(&mut product, "WIDGET-01-BLUE", "Blue");

        let cmd = ProductCommand::UpdateVariant(UpdateVariant {
            tenant_id,
            product_id,
            variant_id: blue,
            sku: sku("WIDGET-01-RED"),
            name: "Blue".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd).unwrap_err(),
            DomainError::Conflict(_)
        ));

        // Keeping its own SKU is fine.
        let cmd = ProductCommand::UpdateVariant(UpdateVariant {
            tenant_id,
            product_id,
            variant_id: blue,
            sku: sku("WIDGET-01-BLUE"),
            name: "Navy".to_string(),
            occurred_at: test_time(),
        });
        let events = product.handle(&cmd).unwrap();
        for event in events {
            product.apply(&event);
        }
        assert_eq!(product.variant(blue).unwrap().name, "Navy");
    }

    #[test]
    fn update_variant_rejects_unknown_variant() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id);

        let cmd = ProductCommand::UpdateVariant(UpdateVariant {
            tenant_id,
            product_id,
            variant_id: VariantId::new(),
            sku: sku("X-1"),
            name: "X".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd).unwrap_err(),
            DomainError::NotFound
        ));
    }

    #[test]
    fn remove_variant_drops_child_entity() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);
        let red = add_variant(&mut product, "WIDGET-01-RED", "Red");
        add_variant(&mut product, "WIDGET-01-BLUE", "Blue");

        let cmd = ProductCommand::RemoveVariant(RemoveVariant {
            tenant_id,
            product_id,
            variant_id: red,
            occurred_at: test_time(),
        });
        for event in product.handle(&cmd).unwrap() {
            product.apply(&event);
        }

        assert_eq!(product.variants().len(), 1);
        assert!(product.variant(red).is_none());
    }

    #[test]
    fn delete_is_soft_and_restorable() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);
        add_variant(&mut product, "WIDGET-01-RED", "Red");

        let delete = ProductCommand::DeleteProduct(DeleteProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        for event in product.handle(&delete).unwrap() {
            product.apply(&event);
        }
        assert!(product.is_deleted());
        // Data survives the tombstone.
        assert_eq!(product.variants().len(), 1);
        assert_eq!(product.name(), "Widget");

        let restore = ProductCommand::RestoreProduct(RestoreProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        for event in product.handle(&restore).unwrap() {
            product.apply(&event);
        }
        assert!(!product.is_deleted());
        assert_eq!(product.variants().len(), 1);
    }

    #[test]
    fn deleted_product_rejects_mutations_except_restore() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);

        let delete = ProductCommand::DeleteProduct(DeleteProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        for event in product.handle(&delete).unwrap() {
            product.apply(&event);
        }

        let update = ProductCommand::UpdateProduct(UpdateProduct {
            tenant_id,
            product_id,
            sku: sku("WIDGET-01"),
            name: "Widget".to_string(),
            description: String::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&update).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));

        let add = ProductCommand::AddVariant(AddVariant {
            tenant_id,
            product_id,
            variant_id: VariantId::new(),
            sku: sku("WIDGET-01-RED"),
            name: "Red".to_string(),
            occurred_at: test_time(),
        });
        assert!(product.handle(&add).is_err());

        // Double delete is a conflict.
        let delete_again = ProductCommand::DeleteProduct(DeleteProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&delete_again).unwrap_err(),
            DomainError::Conflict(_)
        ));
    }

    #[test]
    fn restore_rejects_live_product() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id);

        let restore = ProductCommand::RestoreProduct(RestoreProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&restore).unwrap_err(),
            DomainError::Conflict(_)
        ));
    }

    #[test]
    fn mutations_reject_wrong_tenant() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id);

        let cmd = ProductCommand::DeleteProduct(DeleteProduct {
            tenant_id: test_tenant_id(),
            product_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));
    }

    #[test]
    fn mutations_reject_nonexistent_product() {
        let product = Product::empty(test_product_id());
        let cmd = ProductCommand::DeleteProduct(DeleteProduct {
            tenant_id: test_tenant_id(),
            product_id: test_product_id(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd).unwrap_err(),
            DomainError::NotFound
        ));
    }

    #[test]
    fn version_increments_on_apply() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id);
        assert_eq!(product.version(), 1);

        add_variant(&mut product, "WIDGET-01-RED", "Red");
        assert_eq!(product.version(), 2);

        let delete = ProductCommand::DeleteProduct(DeleteProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        for event in product.handle(&delete).unwrap() {
            product.apply(&event);
        }
        assert_eq!(product.version(), 3);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id);
        let before = product.clone();

        let cmd = ProductCommand::AddVariant(AddVariant {
            tenant_id,
            product_id,
            variant_id: VariantId::new(),
            sku: sku("WIDGET-01-RED"),
            name: "Red".to_string(),
            occurred_at: test_time(),
        });

        let events1 = product.handle(&cmd).unwrap();
        let events2 = product.handle(&cmd).unwrap();

        assert_eq!(product, before);
        assert_eq!(events1, events2);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn sku_strategy() -> impl Strategy<Value = String> {
            "[A-Z0-9][A-Z0-9._-]{0,30}"
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: apply is deterministic (same events = same final state).
            #[test]
            fn apply_is_deterministic(
                sku_raw in sku_strategy(),
                name in "[A-Za-z][A-Za-z0-9 ]{0,40}"
            ) {
                let tenant_id = test_tenant_id();
                let product_id = test_product_id();
                let variant_id = VariantId::new();

                let events = vec![
                    ProductEvent::ProductCreated(ProductCreated {
                        tenant_id,
                        product_id,
                        sku: Sku::parse(&sku_raw).unwrap(),
                        name: name.clone(),
                        description: String::new(),
                        occurred_at: Utc::now(),
                    }),
                    ProductEvent::VariantAdded(VariantAdded {
                        tenant_id,
                        product_id,
                        variant_id,
                        sku: Sku::parse(format!("{sku_raw}-V")).unwrap(),
                        name: name.clone(),
                        occurred_at: Utc::now(),
                    }),
                    ProductEvent::ProductDeleted(ProductDeleted {
                        tenant_id,
                        product_id,
                        occurred_at: Utc::now(),
                    }),
                ];

                let mut a = Product::empty(product_id);
                let mut b = Product::empty(product_id);
                for event in &events {
                    a.apply(event);
                    b.apply(event);
                }

                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.version(), 3);
                prop_assert!(a.is_deleted());
            }

            /// Property: delete then restore preserves product and variant data.
            #[test]
            fn soft_delete_roundtrip_preserves_state(
                sku_raw in sku_strategy(),
                name in "[A-Za-z][A-Za-z0-9 ]{0,40}",
                variant_count in 0usize..5
            ) {
                let tenant_id = test_tenant_id();
                let product_id = test_product_id();
                let mut product = Product::empty(product_id);

                let create = ProductCommand::CreateProduct(CreateProduct {
                    tenant_id,
                    product_id,
                    sku: Sku::parse(&sku_raw).unwrap(),
                    name: name.clone(),
                    description: String::new(),
                    occurred_at: Utc::now(),
                });
                for event in product.handle(&create).unwrap() {
                    product.apply(&event);
                }

                for i in 0..variant_count {
                    let add = ProductCommand::AddVariant(AddVariant {
                        tenant_id,
                        product_id,
                        variant_id: VariantId::new(),
                        sku: Sku::parse(format!("{sku_raw}-{i}")).unwrap(),
                        name: name.clone(),
                        occurred_at: Utc::now(),
                    });
                    for event in product.handle(&add).unwrap() {
                        product.apply(&event);
                    }
                }

                let before = product.clone();

                let delete = ProductCommand::DeleteProduct(DeleteProduct {
                    tenant_id,
                    product_id,
                    occurred_at: Utc::now(),
                });
                for event in product.handle(&delete).unwrap() {
                    product.apply(&event);
                }
                let restore = ProductCommand::RestoreProduct(RestoreProduct {
                    tenant_id,
                    product_id,
                    occurred_at: Utc::now(),
                });
                for event in product.handle(&restore).unwrap() {
                    product.apply(&event);
                }

                prop_assert_eq!(product.sku(), before.sku());
                prop_assert_eq!(product.name(), before.name());
                prop_assert_eq!(product.variants(), before.variants());
                prop_assert!(!product.is_deleted());
                prop_assert_eq!(product.version(), before.version() + 2);
            }

            /// Property: variant SKUs stay unique no matter the insertion order.
            #[test]
            fn variant_skus_stay_unique(
                sku_raw in sku_strategy(),
                dup_index in 0usize..4
            ) {
                let tenant_id = test_tenant_id();
                let product_id = test_product_id();
                let mut product = created_product(tenant_id, product_id);

                for i in 0..4usize {
                    let add = ProductCommand::AddVariant(AddVariant {
                        tenant_id,
                        product_id,
                        variant_id: VariantId::new(),
                        sku: Sku::parse(format!("{sku_raw}-{i}")).unwrap(),
                        name: "V".to_string(),
                        occurred_at: Utc::now(),
                    });
                    for event in product.handle(&add).unwrap() {
                        product.apply(&event);
                    }
                }

                // Re-adding any existing SKU must be rejected.
                let dup = ProductCommand::AddVariant(AddVariant {
                    tenant_id,
                    product_id,
                    variant_id: VariantId::new(),
                    sku: Sku::parse(format!("{sku_raw}-{dup_index}")).unwrap(),
                    name: "V".to_string(),
                    occurred_at: Utc::now(),
                });
                prop_assert!(product.handle(&dup).is_err());

                let mut skus: Vec<&str> =
                    product.variants().iter().map(|v| v.sku.as_str()).collect();
                skus.sort_unstable();
                skus.dedup();
                prop_assert_eq!(skus.len(), product.variants().len());
            }
        }
    }
}
