//! Static AMR nesting table.
//!
//! Records, per refinement level, the ratio from the next-coarser level and
//! the physical cell size, and per domain its level, logical extents and child
//! domains. Extents of a domain are given at its own level's resolution in the
//! frame of a uniformly refined level-0 mesh, so a child at level `L + 1`
//! nests in its parent once the parent's extents are refined by the ratio of
//! level `L + 1`.
//!
//! The table is immutable during ghosting passes; the only interior
//! mutability is the per-domain child bounding-box cache.

use crate::debug_invariants::DebugInvariants;
use crate::mesh::Mesh;
use crate::mesh_error::GhostError;
use crate::topology::domain::DomainId;
use crate::topology::extents::LogicalExtents;
use once_cell::sync::OnceCell;
use std::collections::{BTreeSet, HashSet};

/// Per-level metadata.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelInfo {
    /// Ratio from level `L - 1` to `L`, one entry per axis.
    pub ratio: Vec<i64>,
    /// Physical cell size at this level, one entry per axis.
    pub cell_size: Vec<f64>,
}

/// Placement of one domain.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DomainNestingInfo {
    pub level: usize,
    pub children: Vec<DomainId>,
    pub extents: LogicalExtents,
}

/// Nesting table for a structured AMR hierarchy.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StructuredDomainNesting {
    dims: usize,
    levels: Vec<LevelInfo>,
    domains: Vec<Option<DomainNestingInfo>>,
    #[serde(skip)]
    child_bbox: Vec<OnceCell<Option<LogicalExtents>>>,
}

impl StructuredDomainNesting {
    /// Empty table for `num_domains` domains on `num_levels` levels in `dims`
    /// dimensions. Ratios default to 1 and cell sizes to 0.
    pub fn new(num_domains: usize, num_levels: usize, dims: usize) -> Result<Self, GhostError> {
        if dims == 0 || dims > 3 {
            return Err(GhostError::DimensionMismatch {
                expected: 3,
                got: dims,
            });
        }
        Ok(Self {
            dims,
            levels: vec![
                LevelInfo {
                    ratio: vec![1; dims],
                    cell_size: vec![0.0; dims],
                };
                num_levels
            ],
            domains: vec![None; num_domains],
            child_bbox: (0..num_domains).map(|_| OnceCell::new()).collect(),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn num_domains(&self) -> usize {
        self.domains.len()
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn check_level(&self, level: usize) -> Result<(), GhostError> {
        if level < self.levels.len() {
            Ok(())
        } else {
            Err(GhostError::LevelOutOfRange {
                level,
                num_levels: self.levels.len(),
            })
        }
    }

    fn check_domain(&self, domain: DomainId) -> Result<(), GhostError> {
        if domain.index() < self.domains.len() {
            Ok(())
        } else {
            Err(GhostError::DomainOutOfRange {
                domain,
                num_domains: self.domains.len(),
            })
        }
    }

    fn check_dims(&self, got: usize) -> Result<(), GhostError> {
        if got == self.dims {
            Ok(())
        } else {
            Err(GhostError::DimensionMismatch {
                expected: self.dims,
                got,
            })
        }
    }

    fn reset_caches(&mut self) {
        self.child_bbox = (0..self.domains.len()).map(|_| OnceCell::new()).collect();
    }

    pub fn set_level_refinement_ratio(
        &mut self,
        level: usize,
        ratio: &[i64],
    ) -> Result<(), GhostError> {
        self.check_level(level)?;
        self.check_dims(ratio.len())?;
        if ratio.iter().any(|&r| r <= 0) {
            return Err(GhostError::InvalidRefinementRatio {
                level,
                ratio: ratio.to_vec(),
            });
        }
        self.levels[level].ratio = ratio.to_vec();
        self.reset_caches();
        Ok(())
    }

    pub fn level_refinement_ratio(&self, level: usize) -> Result<&[i64], GhostError> {
        self.check_level(level)?;
        Ok(&self.levels[level].ratio)
    }

    /// Record the physical cell size exactly as the reader computed it.
    pub fn set_level_cell_size(&mut self, level: usize, size: &[f64]) -> Result<(), GhostError> {
        self.check_level(level)?;
        self.check_dims(size.len())?;
        self.levels[level].cell_size = size.to_vec();
        Ok(())
    }

    pub fn level_cell_size(&self, level: usize) -> Result<&[f64], GhostError> {
        self.check_level(level)?;
        Ok(&self.levels[level].cell_size)
    }

    /// Record one domain's placement. Nothing is stored if any argument is
    /// invalid.
    pub fn set_domain_info(
        &mut self,
        domain: DomainId,
        level: usize,
        children: &[DomainId],
        logical_extents: &[i64],
    ) -> Result<(), GhostError> {
        self.check_domain(domain)?;
        self.check_level(level)?;
        let extents = LogicalExtents::from_slice(self.dims, logical_extents)?;
        for &child in children {
            self.check_domain(child)?;
            if child == domain {
                return Err(GhostError::SelfNeighbor(domain));
            }
        }
        self.domains[domain.index()] = Some(DomainNestingInfo {
            level,
            children: children.to_vec(),
            extents,
        });
        self.reset_caches();
        Ok(())
    }

    pub fn domain_info(&self, domain: DomainId) -> Result<&DomainNestingInfo, GhostError> {
        self.check_domain(domain)?;
        self.domains[domain.index()]
            .as_ref()
            .ok_or(GhostError::UnknownDomain(domain))
    }

    pub fn domain_level(&self, domain: DomainId) -> Result<usize, GhostError> {
        Ok(self.domain_info(domain)?.level)
    }

    pub fn domain_extents(&self, domain: DomainId) -> Result<LogicalExtents, GhostError> {
        Ok(self.domain_info(domain)?.extents)
    }

    pub fn domain_children(&self, domain: DomainId) -> Result<&[DomainId], GhostError> {
        Ok(&self.domain_info(domain)?.children)
    }

    /// Ratio from `domain`'s level to its children's level.
    fn child_ratio(&self, domain: DomainId) -> Result<&[i64], GhostError> {
        let level = self.domain_level(domain)?;
        self.level_refinement_ratio(level + 1)
    }

    fn compute_child_bbox_uncached(
        &self,
        domain: DomainId,
    ) -> Result<Option<LogicalExtents>, GhostError> {
        let info = self.domain_info(domain)?;
        if info.children.is_empty() {
            return Ok(None);
        }
        let parent_fine = info.extents.refine(self.child_ratio(domain)?);
        let mut union: Option<LogicalExtents> = None;
        for &child in &info.children {
            let ext = self.domain_extents(child)?;
            union = Some(match union {
                Some(u) => u.union(&ext),
                None => ext,
            });
        }
        Ok(union.and_then(|u| u.intersect(&parent_fine)))
    }

    /// Union of `domain`'s children's extents, at the children's resolution,
    /// clipped to the parent's refined extents. `None` for leaves.
    pub fn compute_child_bounding_box(
        &self,
        domain: DomainId,
    ) -> Result<Option<LogicalExtents>, GhostError> {
        self.check_domain(domain)?;
        match self.child_bbox.get(domain.index()) {
            Some(cell) => cell
                .get_or_try_init(|| self.compute_child_bbox_uncached(domain))
                .copied(),
            None => self.compute_child_bbox_uncached(domain),
        }
    }

    /// For each child of `domain` whose extents overlap the parent-space range
    /// `ijk_range`, the overlapping part at the child's resolution.
    pub fn children_for_logical_range(
        &self,
        domain: DomainId,
        ijk_range: &[i64],
    ) -> Result<Vec<(DomainId, LogicalExtents)>, GhostError> {
        let query = LogicalExtents::from_slice(self.dims, ijk_range)?;
        self.children_for_extents(domain, &query)
    }

    pub(crate) fn children_for_extents(
        &self,
        domain: DomainId,
        query: &LogicalExtents,
    ) -> Result<Vec<(DomainId, LogicalExtents)>, GhostError> {
        let info = self.domain_info(domain)?;
        if info.children.is_empty() || query.is_empty() {
            return Ok(Vec::new());
        }
        let query_fine = query.refine(self.child_ratio(domain)?);
        match self.compute_child_bounding_box(domain)? {
            Some(bbox) if bbox.intersects(&query_fine) => {}
            _ => return Ok(Vec::new()),
        }
        let mut out = Vec::new();
        for &child in &info.children {
            let ext = self.domain_extents(child)?;
            if let Some(overlap) = query_fine.intersect(&ext) {
                out.push((child, overlap));
            }
        }
        Ok(out)
    }

    /// Descendants of `domain` that are selected, where the selection is
    /// `{ domain_list[i] : lookup_mask[i] }`. Unselected intermediate domains
    /// are walked through. Result is sorted and deduplicated.
    pub fn selected_descendants(
        &self,
        domain_list: &[DomainId],
        domain: DomainId,
        lookup_mask: &[bool],
    ) -> Result<Vec<DomainId>, GhostError> {
        if domain_list.len() != lookup_mask.len() {
            return Err(GhostError::ArrayCountMismatch {
                domains: domain_list.len(),
                payloads: lookup_mask.len(),
            });
        }
        let selected: HashSet<DomainId> = domain_list
            .iter()
            .zip(lookup_mask)
            .filter_map(|(&d, &on)| on.then_some(d))
            .collect();
        let mut out = BTreeSet::new();
        let mut visited = HashSet::from([domain]);
        let mut stack = vec![domain];
        while let Some(d) = stack.pop() {
            for &child in self.domain_children(d)? {
                if !visited.insert(child) {
                    continue;
                }
                if selected.contains(&child) {
                    out.insert(child);
                }
                stack.push(child);
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Check that a structured mesh still has the dimensions recorded for it.
    pub fn confirm_mesh(&self, domain: DomainId, mesh: &Mesh) -> Result<(), GhostError> {
        let ext = self.domain_extents(domain)?;
        let expected = ext.num_cells();
        if mesh.num_cells() != expected {
            return Err(GhostError::TopologyMismatch {
                domain,
                reason: format!(
                    "mesh has {} cells, extents {:?} imply {expected}",
                    mesh.num_cells(),
                    ext.to_vec()
                ),
            });
        }
        Ok(())
    }
}

impl DebugInvariants for StructuredDomainNesting {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "StructuredDomainNesting");
    }

    /// Children sit one level below their parent and inside its refined extents.
    fn validate_invariants(&self) -> Result<(), GhostError> {
        if let Some(level0) = self.levels.first() {
            if level0.ratio.iter().any(|&r| r != 1) {
                log::debug!("level 0 carries ratio {:?}; it is ignored", level0.ratio);
            }
        }
        for (idx, info) in self.domains.iter().enumerate() {
            let Some(info) = info else { continue };
            let parent = DomainId::new(idx as u32);
            if info.children.is_empty() {
                continue;
            }
            let parent_fine = info.extents.refine(self.child_ratio(parent)?);
            for &child in &info.children {
                let child_info = self.domain_info(child)?;
                if child_info.level != info.level + 1 {
                    return Err(GhostError::TopologyMismatch {
                        domain: child,
                        reason: format!(
                            "child of {parent} is on level {}, expected {}",
                            child_info.level,
                            info.level + 1
                        ),
                    });
                }
                if !parent_fine.contains(&child_info.extents) {
                    return Err(GhostError::TopologyMismatch {
                        domain: child,
                        reason: format!(
                            "extents {:?} not nested in parent {parent} refined to {:?}",
                            child_info.extents.to_vec(),
                            parent_fine.to_vec()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::domain::did;

    /// Level 0: one 10^3 block. Level 1 (ratio 2): one child over parent cells 2..=5.
    fn two_level() -> StructuredDomainNesting {
        let mut n = StructuredDomainNesting::new(2, 2, 3).unwrap();
        n.set_level_refinement_ratio(1, &[2, 2, 2]).unwrap();
        n.set_level_cell_size(0, &[1.0, 1.0, 1.0]).unwrap();
        n.set_level_cell_size(1, &[0.5, 0.5, 0.5]).unwrap();
        n.set_domain_info(did(0), 0, &[did(1)], &[0, 9, 0, 9, 0, 9])
            .unwrap();
        n.set_domain_info(did(1), 1, &[], &[4, 11, 4, 11, 4, 11])
            .unwrap();
        n
    }

    #[test]
    fn level_queries_are_bounds_checked() {
        let n = two_level();
        assert_eq!(n.level_refinement_ratio(1).unwrap(), &[2, 2, 2]);
        assert_eq!(n.level_cell_size(1).unwrap(), &[0.5, 0.5, 0.5]);
        assert!(matches!(
            n.level_refinement_ratio(2),
            Err(GhostError::LevelOutOfRange {
                level: 2,
                num_levels: 2
            })
        ));
        assert_eq!((n.num_domains(), n.num_levels()), (2, 2));
    }

    #[test]
    fn bad_setup_records_nothing() {
        let mut n = two_level();
        let before = n.domain_info(did(1)).unwrap().clone();
        assert!(n.set_domain_info(did(1), 1, &[did(7)], &[0, 1, 0, 1, 0, 1]).is_err());
        assert!(n.set_domain_info(did(1), 1, &[], &[0, 1]).is_err());
        assert_eq!(n.domain_info(did(1)).unwrap(), &before);
        assert!(matches!(
            n.set_level_refinement_ratio(1, &[2, 0, 2]),
            Err(GhostError::InvalidRefinementRatio { .. })
        ));
    }

    #[test]
    fn child_bbox_is_cached_union() {
        let n = two_level();
        let bbox = n.compute_child_bounding_box(did(0)).unwrap().unwrap();
        assert_eq!(bbox.to_vec(), vec![4, 11, 4, 11, 4, 11]);
        assert!(n.child_bbox[0].get().is_some());
        assert_eq!(n.compute_child_bounding_box(did(1)).unwrap(), None);
    }

    #[test]
    fn range_query_returns_overlap_in_child_resolution() {
        let n = two_level();
        let hits = n
            .children_for_logical_range(did(0), &[0, 3, 0, 3, 0, 3])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, did(1));
        assert_eq!(hits[0].1.to_vec(), vec![4, 7, 4, 7, 4, 7]);

        let miss = n
            .children_for_logical_range(did(0), &[6, 9, 0, 9, 0, 9])
            .unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn descendants_follow_selection() {
        let mut n = StructuredDomainNesting::new(4, 3, 2).unwrap();
        n.set_level_refinement_ratio(1, &[2, 2]).unwrap();
        n.set_level_refinement_ratio(2, &[2, 2]).unwrap();
        n.set_domain_info(did(0), 0, &[did(1), did(2)], &[0, 3, 0, 3]).unwrap();
        n.set_domain_info(did(1), 1, &[did(3)], &[0, 3, 0, 3]).unwrap();
        n.set_domain_info(did(2), 1, &[], &[4, 7, 4, 7]).unwrap();
        n.set_domain_info(did(3), 2, &[], &[0, 3, 0, 3]).unwrap();
        n.validate_invariants().unwrap();

        let list = [did(0), did(1), did(2), did(3)];
        let all = n
            .selected_descendants(&list, did(0), &[true, true, true, true])
            .unwrap();
        assert_eq!(all, vec![did(1), did(2), did(3)]);
        // domain 1 not loaded: its child 3 still counts
        let some = n
            .selected_descendants(&list, did(0), &[true, false, false, true])
            .unwrap();
        assert_eq!(some, vec![did(3)]);
    }

    #[test]
    fn invariants_catch_escaped_child() {
        let mut n = two_level();
        n.set_domain_info(did(1), 1, &[], &[18, 21, 4, 11, 4, 11]).unwrap();
        assert!(matches!(
            n.validate_invariants(),
            Err(GhostError::TopologyMismatch { .. })
        ));
    }

    #[test]
    fn confirm_mesh_checks_cell_count() {
        let n = two_level();
        assert!(n.confirm_mesh(did(1), &Mesh::structured([8, 8, 8])).is_ok());
        let err = n.confirm_mesh(did(1), &Mesh::structured([8, 8, 7])).unwrap_err();
        assert!(err.is_topology_mismatch());
    }
}
