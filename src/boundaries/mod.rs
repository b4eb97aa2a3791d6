//! Boundary exchange between domains that share points.
//!
//! [`BoundaryExchanger`] is selected once when the topology is built and kept
//! with the topology cache. `Unstructured` uses declared given cells,
//! `PointDecomposed` derives them from shared points, and `None` is for data
//! without cross-domain boundaries: its exchanges return the inputs
//! unchanged.

pub mod point;
pub mod transport;
pub mod unstructured;

pub use point::PointDecomposedBoundaries;
pub use transport::{DomainProcessorMap, Segment, TAGS_PER_EXCHANGE};
pub use unstructured::{GivenElements, UnstructuredDomainBoundaries};

use crate::algs::communicator::{CommTag, Communicator};
use crate::config::GhostDataType;
use crate::mesh::{DataArray, Material, Mesh, MixedVariable};
use crate::mesh_error::GhostError;
use crate::topology::domain::{DomainId, DomainPair};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub enum BoundaryExchanger {
    Unstructured(UnstructuredDomainBoundaries),
    PointDecomposed(PointDecomposedBoundaries),
    #[default]
    None,
}

impl BoundaryExchanger {
    /// The underlying tables, if any.
    pub fn boundaries(&self) -> Option<&UnstructuredDomainBoundaries> {
        match self {
            BoundaryExchanger::Unstructured(b) => Some(b),
            BoundaryExchanger::PointDecomposed(p) => Some(p.boundaries()),
            BoundaryExchanger::None => None,
        }
    }

    pub fn boundaries_mut(&mut self) -> Option<&mut UnstructuredDomainBoundaries> {
        match self {
            BoundaryExchanger::Unstructured(b) => Some(b),
            BoundaryExchanger::PointDecomposed(p) => Some(p.boundaries_mut()),
            BoundaryExchanger::None => None,
        }
    }

    pub fn num_domains(&self) -> Option<usize> {
        self.boundaries().map(UnstructuredDomainBoundaries::num_domains)
    }

    pub fn requires_communication(&self, ghost_type: GhostDataType) -> bool {
        self.boundaries()
            .is_some_and(|b| b.requires_communication(ghost_type))
    }

    /// Topology-build step. Derives given cells for point-decomposed data and
    /// records mesh shapes for later confirmation.
    pub fn prepare(&mut self, domains: &[DomainId], meshes: &[Mesh]) -> Result<(), GhostError> {
        if let Some(b) = self.boundaries_mut() {
            for (&d, m) in domains.iter().zip(meshes) {
                b.record_mesh_shape(d, m.shape());
            }
        }
        if let BoundaryExchanger::PointDecomposed(p) = self {
            p.derive_given_cells(domains, meshes)?;
        }
        Ok(())
    }

    pub fn confirm_mesh(&self, domains: &[DomainId], meshes: &[Mesh]) -> Result<(), GhostError> {
        match self.boundaries() {
            Some(b) => b.confirm_mesh(domains, meshes),
            None => Ok(()),
        }
    }

    pub fn exchange_mesh<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        meshes: &[Mesh],
    ) -> Result<Vec<Mesh>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_mesh(comm, tag, domains, meshes),
            None => Ok(meshes.to_vec()),
        }
    }

    pub fn exchange_scalar<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        is_point_data: bool,
        arrays: &[DataArray],
    ) -> Result<Vec<DataArray>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_scalar(comm, tag, domains, is_point_data, arrays),
            None => Ok(arrays.to_vec()),
        }
    }

    pub fn exchange_vector<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        is_point_data: bool,
        arrays: &[DataArray],
    ) -> Result<Vec<DataArray>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_vector(comm, tag, domains, is_point_data, arrays),
            None => Ok(arrays.to_vec()),
        }
    }

    pub fn exchange_material<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_material(comm, tag, domains, materials),
            None => Ok(materials.to_vec()),
        }
    }

    pub fn exchange_mixed_materials<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_mixed_materials(comm, tag, domains, materials),
            None => Ok(materials.to_vec()),
        }
    }

    pub fn exchange_clean_materials<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_clean_materials(comm, tag, domains, materials),
            None => Ok(materials.to_vec()),
        }
    }

    pub fn exchange_mix_var<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
        vars: &[MixedVariable],
    ) -> Result<Vec<MixedVariable>, GhostError> {
        match self.boundaries() {
            Some(b) => b.exchange_mix_var(comm, tag, domains, materials, vars),
            None => Ok(vars.to_vec()),
        }
    }

    /// Flag ghost nodes; `None` boundaries have nothing to flag and are
    /// trivially robust.
    pub fn create_ghost_nodes(
        &self,
        domains: &[DomainId],
        meshes: &mut [Mesh],
        all_domains: &[DomainId],
        clean_ownership: bool,
    ) -> Result<bool, GhostError> {
        match self.boundaries() {
            Some(b) => b.create_ghost_nodes_with(domains, meshes, all_domains, clean_ownership),
            None => Ok(true),
        }
    }

    pub fn non_robust_pairs(&self, all_domains: &[DomainId]) -> Vec<DomainPair> {
        self.boundaries()
            .map(|b| b.non_robust_pairs(all_domains))
            .unwrap_or_default()
    }
}
