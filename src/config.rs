//! Runtime options for a ghosting pass.

use crate::algs::communicator::CommTag;

/// Kind of ghost data requested by the pipeline.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum GhostDataType {
    /// A layer of duplicated neighbour cells (`avtGhostZones`).
    #[default]
    ZoneData,
    /// Flags on shared points only (`avtGhostNodes`); no cells move.
    NodeData,
    None,
}

/// Options for [`GhostApplication`](crate::application::GhostApplication).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GhostConfig {
    pub ghost_type: GhostDataType,
    /// Give every shared point exactly one real owner (the lowest domain id).
    pub clean_ownership: bool,
    /// First tag of the communication epochs used by each execution.
    pub base_tag: CommTag,
    /// Turn a non-robust ghost node layer into an error.
    pub require_robust_nodes: bool,
    /// Exchange every named point array of the meshes along with the mesh.
    pub exchange_point_data: bool,
    /// Exchange every named cell array of the meshes along with the mesh.
    pub exchange_cell_data: bool,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            ghost_type: GhostDataType::ZoneData,
            clean_ownership: true,
            base_tag: CommTag::default(),
            require_robust_nodes: false,
            exchange_point_data: true,
            exchange_cell_data: true,
        }
    }
}
