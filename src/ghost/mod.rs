//! Ghost classification: flag codes, structured AMR classification and
//! unstructured ownership resolution.
//!
//! Imperfect input never aborts classification. Cells that are only partly
//! covered by finer patches, and boundaries where a one-cell-deep node layer
//! cannot be guaranteed, are reported through [`Coverage`] instead.

pub mod amr;
pub mod flags;
pub mod ownership;

pub use flags::{GHOST_NODES, GHOST_ZONES, GhostNodeType, GhostZoneType};
pub use ownership::{OwnershipEntry, PointOwnership};

use crate::topology::domain::{DomainId, DomainPair};

/// One non-fatal coverage problem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartialCoverage {
    /// Structured cells of `domain` partly covered by a present finer patch.
    /// They are kept real.
    PartiallyRefinedCells { domain: DomainId, cells: usize },
    /// Neighbour pairs whose shared boundary has no given cells in one or
    /// both directions, so the ghost node layer may be less than a cell deep.
    NonRobustGhostNodes { pairs: Vec<DomainPair> },
}

/// Outcome of a classification pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Coverage {
    #[default]
    Complete,
    Partial(Vec<PartialCoverage>),
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        matches!(self, Coverage::Complete)
    }

    pub fn push(&mut self, issue: PartialCoverage) {
        match self {
            Coverage::Complete => *self = Coverage::Partial(vec![issue]),
            Coverage::Partial(v) => v.push(issue),
        }
    }

    pub fn merge(&mut self, other: Coverage) {
        if let Coverage::Partial(v) = other {
            for issue in v {
                self.push(issue);
            }
        }
    }

    pub fn issues(&self) -> &[PartialCoverage] {
        match self {
            Coverage::Complete => &[],
            Coverage::Partial(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::domain::did;

    #[test]
    fn push_and_merge() {
        let mut c = Coverage::default();
        assert!(c.is_complete());
        c.merge(Coverage::Complete);
        assert!(c.is_complete());
        c.push(PartialCoverage::PartiallyRefinedCells {
            domain: did(3),
            cells: 2,
        });
        let mut other = Coverage::Complete;
        other.push(PartialCoverage::NonRobustGhostNodes {
            pairs: vec![DomainPair::new(did(0), did(1))],
        });
        c.merge(other);
        assert_eq!(c.issues().len(), 2);
        assert!(!c.is_complete());
    }
}
