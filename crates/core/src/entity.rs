//! Entity trait: identity + continuity across state changes.
//!
//! Child entities that live inside an aggregate (product variants, stock
//! record lines) implement this rather than `AggregateRoot`.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
