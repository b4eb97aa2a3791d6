//! Ownership of the local points of one unstructured domain.
//!
//! [`PointOwnership`] records, per local point, the domain that owns it and
//! whether it is therefore a ghost here. When several domains claim a point,
//! the lowest domain id wins, which keeps the result independent of traversal
//! order and of how domains are spread over processes.

use crate::mesh_error::GhostError;
use crate::topology::domain::DomainId;

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OwnershipEntry {
    pub owner: DomainId,
    pub is_ghost: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PointOwnership {
    domain: DomainId,
    entries: Vec<OwnershipEntry>,
}

impl PointOwnership {
    /// Every point claimed by `domain` itself.
    pub fn all_owned(domain: DomainId, len: usize) -> Self {
        Self {
            domain,
            entries: vec![
                OwnershipEntry {
                    owner: domain,
                    is_ghost: false,
                };
                len
            ],
        }
    }

    fn slot(&mut self, point: usize) -> Result<&mut OwnershipEntry, GhostError> {
        let len = self.entries.len();
        self.entries
            .get_mut(point)
            .ok_or(GhostError::IndexOutOfRange { index: point, len })
    }

    /// Overwrite the owner of `point`.
    pub fn set(&mut self, point: usize, owner: DomainId) -> Result<(), GhostError> {
        let me = self.domain;
        *self.slot(point)? = OwnershipEntry {
            owner,
            is_ghost: owner != me,
        };
        Ok(())
    }

    /// Record a claim on `point`, keeping the smallest claimant.
    pub fn set_owner_min(&mut self, point: usize, claimant: DomainId) -> Result<(), GhostError> {
        let me = self.domain;
        let slot = self.slot(point)?;
        let owner = slot.owner.min(claimant);
        *slot = OwnershipEntry {
            owner,
            is_ghost: owner != me,
        };
        Ok(())
    }

    pub fn ghost_points(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.is_ghost.then_some(idx))
    }

    /// Write `bit` into `flags` for every ghost point.
    pub fn apply_to(&self, flags: &mut [u8], bit: u8) -> usize {
        let mut n = 0;
        for idx in self.ghost_points() {
            if let Some(f) = flags.get_mut(idx) {
                *f |= bit;
                n += 1;
            }
        }
        n
    }
}
