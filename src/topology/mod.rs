//! Identifiers and index-space geometry shared by the nesting and boundary
//! tables.
//!
//! - [`domain`]: dense domain ids and ordered `(from, to)` pairs
//! - [`extents`]: inclusive logical boxes in a level's cell index space

pub mod domain;
pub mod extents;

pub use domain::{DomainId, DomainPair};
pub use extents::LogicalExtents;
