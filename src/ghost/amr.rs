//! Ghost-zone classification for structured AMR patches.
//!
//! A coarse cell is ghost (`RefinedZoneInAmrGrid`) when finer patches present
//! in the working set cover all of its sub-cells. Present patches are found
//! among all descendants, so a level-2 patch counts even when its level-1
//! parent is not loaded. Coverage is decided per touched coarse cell at the
//! finest level involved; cells inside a single patch are settled without
//! visiting their sub-cells.

use crate::ghost::flags::{GhostZoneType, with_ghost_zones};
use crate::ghost::{Coverage, PartialCoverage};
use crate::mesh::Mesh;
use crate::mesh_error::GhostError;
use crate::nesting::structured::StructuredDomainNesting;
use crate::topology::domain::DomainId;
use crate::topology::extents::{LogicalExtents, MAX_DIMS};
use std::collections::{BTreeMap, HashSet};

/// Per-axis product of the ratios taking level `from` cells to level `to`.
fn ratio_between(
    nesting: &StructuredDomainNesting,
    from: usize,
    to: usize,
) -> Result<[i64; MAX_DIMS], GhostError> {
    let mut out = [1; MAX_DIMS];
    for level in from + 1..=to {
        for (axis, &r) in nesting.level_refinement_ratio(level)?.iter().enumerate() {
            out[axis] *= r;
        }
    }
    Ok(out)
}

/// Present patches below one coarse domain, all at the deepest level any of
/// them lives on. `ratio` maps the coarse domain's cells to that level.
struct FinePatches {
    ratio: [i64; MAX_DIMS],
    boxes: Vec<LogicalExtents>,
}

fn present_patches(
    nesting: &StructuredDomainNesting,
    domain: DomainId,
    extents: &LogicalExtents,
    present: &HashSet<DomainId>,
) -> Result<Option<FinePatches>, GhostError> {
    if nesting.compute_child_bounding_box(domain)?.is_none() {
        return Ok(None);
    }
    let loaded: Vec<DomainId> = present.iter().copied().collect();
    let mask = vec![true; loaded.len()];
    let level = nesting.domain_level(domain)?;

    let mut hits = Vec::new();
    for patch in nesting.selected_descendants(&loaded, domain, &mask)? {
        let patch_level = nesting.domain_level(patch)?;
        let query = extents.refine(&ratio_between(nesting, level, patch_level)?);
        if let Some(overlap) = nesting.domain_extents(patch)?.intersect(&query) {
            log::trace!(
                "domain {domain}: patch {patch} (level {patch_level}) overlaps {:?}",
                overlap.to_vec()
            );
            hits.push((patch_level, overlap));
        }
    }
    let Some(deepest) = hits.iter().map(|&(l, _)| l).max() else {
        return Ok(None);
    };
    let mut boxes = Vec::with_capacity(hits.len());
    for (patch_level, overlap) in hits {
        boxes.push(overlap.refine(&ratio_between(nesting, patch_level, deepest)?));
    }
    Ok(Some(FinePatches {
        ratio: ratio_between(nesting, level, deepest)?,
        boxes,
    }))
}

/// Whether the union of `boxes` holds every index of `cell`. Overlapping
/// boxes count each sub-cell once.
fn union_covers<'a>(
    cell: &LogicalExtents,
    boxes: impl IntoIterator<Item = &'a LogicalExtents>,
) -> bool {
    let mut seen = vec![false; cell.num_cells()];
    for b in boxes {
        if b.contains(cell) {
            return true;
        }
        if let Some(part) = cell.intersect(b) {
            for ijk in part.indices() {
                seen[cell.linear_index(ijk)] = true;
            }
        }
    }
    seen.iter().all(|&s| s)
}

/// Touched coarse cells of `extents`, by linear index, and whether each is
/// fully covered.
fn classify_cells(extents: &LogicalExtents, patches: &FinePatches) -> BTreeMap<usize, bool> {
    let mut touching: BTreeMap<usize, ([i64; MAX_DIMS], Vec<usize>)> = BTreeMap::new();
    for (b, fine) in patches.boxes.iter().enumerate() {
        let Some(coarse) = fine.coarsen(&patches.ratio).intersect(extents) else {
            continue;
        };
        for ijk in coarse.indices() {
            touching
                .entry(extents.linear_index(ijk))
                .or_insert_with(|| (ijk, Vec::new()))
                .1
                .push(b);
        }
    }
    touching
        .into_iter()
        .map(|(cell, (ijk, boxes))| {
            let fine = LogicalExtents::new(extents.dims(), ijk, ijk).refine(&patches.ratio);
            (cell, union_covers(&fine, boxes.iter().map(|&b| &patches.boxes[b])))
        })
        .collect()
}

/// Flag cells of `domain` covered by present finer patches. The ghost array is
/// created on every domain, so all domains carry it even when nothing is
/// covered. Partially covered cells stay real and are reported.
pub fn mark_refined_zones(
    nesting: &StructuredDomainNesting,
    domain: DomainId,
    mesh: &mut Mesh,
    present: &HashSet<DomainId>,
) -> Result<Option<PartialCoverage>, GhostError> {
    nesting.confirm_mesh(domain, mesh)?;
    let extents = nesting.domain_extents(domain)?;
    let patches = present_patches(nesting, domain, &extents, present)?;
    let cells = match patches {
        Some(patches) => classify_cells(&extents, &patches),
        None => BTreeMap::new(),
    };

    let bit = GhostZoneType::RefinedZoneInAmrGrid.bit();
    let (ghosted, partial) = with_ghost_zones(mesh, |flags| {
        let (mut ghosted, mut partial) = (0usize, 0usize);
        for (cell, full) in cells {
            if full {
                if let Some(f) = flags.get_mut(cell) {
                    *f |= bit;
                }
                ghosted += 1;
            } else {
                partial += 1;
            }
        }
        (ghosted, partial)
    });
    log::debug!("domain {domain}: {ghosted} refined zones flagged, {partial} partial");
    if partial > 0 {
        log::warn!(
            "domain {domain}: {partial} cells only partially covered by finer patches; kept as real"
        );
        return Ok(Some(PartialCoverage::PartiallyRefinedCells {
            domain,
            cells: partial,
        }));
    }
    Ok(None)
}

/// Run [`mark_refined_zones`] over every local domain.
pub fn apply_amr_ghosts(
    nesting: &StructuredDomainNesting,
    domains: &[DomainId],
    meshes: &mut [Mesh],
    all_domains: &[DomainId],
) -> Result<Coverage, GhostError> {
    if domains.len() != meshes.len() {
        return Err(GhostError::ArrayCountMismatch {
            domains: domains.len(),
            payloads: meshes.len(),
        });
    }
    let present: HashSet<DomainId> = all_domains.iter().copied().collect();
    let mut coverage = Coverage::default();
    for (&domain, mesh) in domains.iter().zip(meshes.iter_mut()) {
        if let Some(p) = mark_refined_zones(nesting, domain, mesh, &present)? {
            coverage.push(p);
        }
    }
    Ok(coverage)
}
