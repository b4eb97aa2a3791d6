//! Boundaries for point-decomposed data.
//!
//! Readers of point-decomposed data only know which points two domains share.
//! The cells to transmit are derived from the local meshes: every cell of
//! `from` touching a point shared with `to` is given to `to`, together with
//! its points that are not already shared.

use crate::boundaries::unstructured::{GivenElements, UnstructuredDomainBoundaries};
use crate::mesh::Mesh;
use crate::mesh_error::GhostError;
use crate::topology::domain::{DomainId, DomainPair};
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct PointDecomposedBoundaries {
    inner: UnstructuredDomainBoundaries,
    derived: BTreeSet<DomainId>,
}

impl PointDecomposedBoundaries {
    pub fn new(num_domains: usize) -> Self {
        Self {
            inner: UnstructuredDomainBoundaries::with_shared_pairs(num_domains),
            derived: BTreeSet::new(),
        }
    }

    pub fn set_total_number_of_domains(&mut self, n: usize) -> Result<(), GhostError> {
        self.inner.set_total_number_of_domains(n)
    }

    pub fn set_shared_points(
        &mut self,
        a: DomainId,
        b: DomainId,
        points_in_a: &[usize],
        points_in_b: &[usize],
    ) -> Result<(), GhostError> {
        self.inner.set_shared_points(a, b, points_in_a, points_in_b)?;
        self.derived.remove(&a);
        self.derived.remove(&b);
        Ok(())
    }

    /// Whether given cells were derived for `domain`.
    pub fn is_derived(&self, domain: DomainId) -> bool {
        self.derived.contains(&domain)
    }

    /// Derive the given cells and points of every local domain from its mesh.
    /// Only pairs whose sender is local are filled in; receivers learn the
    /// counts from the payloads.
    pub fn derive_given_cells(
        &mut self,
        domains: &[DomainId],
        meshes: &[Mesh],
    ) -> Result<(), GhostError> {
        self.inner.confirm_mesh(domains, meshes)?;
        let mut derived = Vec::new();
        for (&d, mesh) in domains.iter().zip(meshes) {
            let mut point_cells: HashMap<usize, Vec<usize>> = HashMap::new();
            for (c, cell) in mesh.cells().iter().enumerate() {
                for &p in &cell.points {
                    point_cells.entry(p).or_default().push(c);
                }
            }
            for nb in self.inner.neighbors(d) {
                let Some(shared) = self.inner.shared_points(d, nb) else {
                    continue;
                };
                let cells: BTreeSet<usize> = shared
                    .keys()
                    .filter_map(|p| point_cells.get(p))
                    .flatten()
                    .copied()
                    .collect();
                let points: BTreeSet<usize> = cells
                    .iter()
                    .flat_map(|&c| mesh.cells()[c].points.iter().copied())
                    .filter(|p| !shared.contains_key(p))
                    .collect();
                log::trace!(
                    "derived {}: {} cells, {} points",
                    DomainPair::new(d, nb),
                    cells.len(),
                    points.len()
                );
                derived.push((
                    DomainPair::new(d, nb),
                    GivenElements {
                        cells: cells.into_iter().collect(),
                        points: points.into_iter().collect(),
                    },
                ));
            }
        }
        let given = self.inner.given_mut();
        for (pair, elements) in derived {
            given.insert(pair, elements);
        }
        self.derived.extend(domains.iter().copied());
        log::debug!("derived given cells for {} domains", domains.len());
        Ok(())
    }

    pub fn boundaries(&self) -> &UnstructuredDomainBoundaries {
        &self.inner
    }

    pub fn boundaries_mut(&mut self) -> &mut UnstructuredDomainBoundaries {
        &mut self.inner
    }
}
