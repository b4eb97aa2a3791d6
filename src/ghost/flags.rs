//! Ghost flag codes and the reserved auxiliary array names.
//!
//! A ghost array holds one `u8` per cell (or point); zero means real. Each
//! reason for being ghost is a distinct bit so several reasons can be ORed
//! together.

use crate::mesh::{ArrayValues, DataArray, Mesh};
use std::collections::BTreeMap;

/// Per-cell ghost flags.
pub const GHOST_ZONES: &str = "avtGhostZones";
/// Per-point ghost flags.
pub const GHOST_NODES: &str = "avtGhostNodes";
/// Per-point `(origin domain, origin local id)`, 2-component i32.
pub const ORIGINAL_NODE_NUMBERS: &str = "avtOriginalNodeNumbers";
/// Per-cell `(origin domain, origin local id)`, 2-component i32.
pub const ORIGINAL_CELL_NUMBERS: &str = "avtOriginalCellNumbers";

/// Why a cell is ghost.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GhostZoneType {
    /// Copy of a cell owned by a neighbouring domain.
    DuplicatedZoneInternalToProblem = 0,
    EnhancedConnectivityZone = 1,
    /// Covered by a finer patch.
    RefinedZoneInAmrGrid = 2,
    ZoneExteriorToProblem = 3,
    /// Outside the requested material set.
    ZoneNotApplicableToProblem = 4,
}

impl GhostZoneType {
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Why a point is ghost.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GhostNodeType {
    /// Copy of a point owned by another domain.
    DuplicatedNode = 0,
    NodeNotApplicableToProblem = 1,
}

impl GhostNodeType {
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[inline]
pub fn has_zone_flag(value: u8, ty: GhostZoneType) -> bool {
    value & ty.bit() != 0
}

#[inline]
pub fn has_node_flag(value: u8, ty: GhostNodeType) -> bool {
    value & ty.bit() != 0
}

/// Take `name` out of `data` as single-component u8 flags of length `len`,
/// run `f` on them and put them back. Anything else under that name is
/// replaced by zeroed flags.
fn update_u8_array<R>(
    data: &mut BTreeMap<String, DataArray>,
    name: &str,
    len: usize,
    f: impl FnOnce(&mut [u8]) -> R,
) -> R {
    let taken = data
        .remove(name)
        .map(|a| (a.components(), a.tag(), a.into_values()));
    let mut flags = match taken {
        Some((1, _, ArrayValues::U8(v))) => v,
        Some((components, tag, _)) => {
            log::warn!(
                "replacing {}x{components} array {name:?} with u8 ghost flags",
                tag.name()
            );
            Vec::new()
        }
        None => Vec::new(),
    };
    flags.resize(len, 0);
    let out = f(&mut flags);
    data.insert(name.to_string(), DataArray::new(1, flags));
    out
}

/// Run `f` on the mesh's cell ghost flags, created zeroed and sized to the
/// cell count if needed.
pub fn with_ghost_zones<R>(mesh: &mut Mesh, f: impl FnOnce(&mut [u8]) -> R) -> R {
    let n = mesh.num_cells();
    update_u8_array(&mut mesh.cell_data, GHOST_ZONES, n, f)
}

/// Run `f` on the mesh's point ghost flags, created zeroed and sized to the
/// point count if needed.
pub fn with_ghost_nodes<R>(mesh: &mut Mesh, f: impl FnOnce(&mut [u8]) -> R) -> R {
    let n = mesh.num_points();
    update_u8_array(&mut mesh.point_data, GHOST_NODES, n, f)
}

/// Count of nonzero entries in a ghost array, if present.
pub fn count_ghosts(array: Option<&DataArray>) -> usize {
    array
        .and_then(|a| a.as_slice::<u8>())
        .map_or(0, |v| v.iter().filter(|&&g| g != 0).count())
}
