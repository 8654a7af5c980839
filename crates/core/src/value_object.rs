//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (`Sku { "WID-01" }` equals any other `Sku { "WID-01" }`), unlike entities,
/// which are the same object only when their IDs match. To "modify" a value
/// object, construct a new one; construction is where validation lives, so a
/// value object that exists is always well-formed.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
