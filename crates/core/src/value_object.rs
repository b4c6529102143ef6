//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. In stockflow the
/// canonical one is the stock key `(tenant, location, product, batch)`: two
/// keys with the same parts address the same ledger stream and snapshot row.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
