//! `DomainId` and `DomainPair`: strong handles for subdomains and directed
//! domain-to-domain relationships.
//!
//! Domain ids are global: unique across all domains on all processes, stable
//! for one ghosting pass, and not required to be contiguous.

use std::fmt;

/// Global identifier of one domain (patch) of a decomposed mesh.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct DomainId(u32);

impl DomainId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        DomainId(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Index form for table lookups.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for DomainId {
    fn from(raw: u32) -> Self {
        DomainId(raw)
    }
}

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DomainId").field(&self.0).finish()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed `(from, to)` pair: `from` gives data to `to`.
///
/// Ordering is lexicographic on `(from, to)`, which is the canonical order in
/// which per-pair payloads are applied.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct DomainPair {
    pub from: DomainId,
    pub to: DomainId,
}

impl DomainPair {
    #[inline]
    pub const fn new(from: DomainId, to: DomainId) -> Self {
        Self { from, to }
    }

    /// The same pair seen from the other side.
    #[inline]
    pub const fn reversed(self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

impl fmt::Display for DomainPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Shorthand used by tests and setup code.
#[inline]
pub fn did(raw: u32) -> DomainId {
    DomainId::new(raw)
}
