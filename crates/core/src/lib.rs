//! `stockflow-core`: domain foundation building blocks.
//!
//! Identifiers, the domain error taxonomy and the aggregate contract shared by
//! every stockflow domain crate. Nothing in here performs IO.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, LocationId, ProductId, TenantId, UserId};
pub use value_object::ValueObject;
