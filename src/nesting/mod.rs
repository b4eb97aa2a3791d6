//! Domain nesting: the structural relationship between domains.
//!
//! [`Nesting`] is chosen once when the topology is built. Structured AMR data
//! uses a [`StructuredDomainNesting`] table; single-level or non-AMR data uses
//! [`Nesting::Trivial`], which never produces ghost zones.

pub mod structured;

pub use structured::{DomainNestingInfo, LevelInfo, StructuredDomainNesting};

use crate::ghost::Coverage;
use crate::ghost::amr::apply_amr_ghosts;
use crate::mesh::Mesh;
use crate::mesh_error::GhostError;
use crate::topology::domain::DomainId;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Nesting {
    Structured(StructuredDomainNesting),
    Trivial { num_domains: usize },
}

impl Nesting {
    pub fn num_domains(&self) -> usize {
        match self {
            Nesting::Structured(n) => n.num_domains(),
            Nesting::Trivial { num_domains } => *num_domains,
        }
    }

    pub fn num_levels(&self) -> usize {
        match self {
            Nesting::Structured(n) => n.num_levels(),
            Nesting::Trivial { .. } => 1,
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredDomainNesting> {
        match self {
            Nesting::Structured(n) => Some(n),
            Nesting::Trivial { .. } => None,
        }
    }

    /// Flag cells of the local `meshes` covered by finer patches present in
    /// `all_domains`. Returns whether any ghost data was produced.
    ///
    /// With fewer than two domains in the working set nothing can overlap and
    /// the meshes are left untouched.
    pub fn apply_ghost(
        &self,
        domains: &[DomainId],
        meshes: &mut [Mesh],
        all_domains: &[DomainId],
    ) -> Result<(bool, Coverage), GhostError> {
        match self {
            Nesting::Trivial { .. } => Ok((false, Coverage::Complete)),
            Nesting::Structured(_) if all_domains.len() < 2 => {
                log::debug!("single-domain working set; no AMR ghost zones");
                Ok((false, Coverage::Complete))
            }
            Nesting::Structured(n) => {
                let coverage = apply_amr_ghosts(n, domains, meshes, all_domains)?;
                Ok((true, coverage))
            }
        }
    }

    /// Check every local mesh against the recorded extents.
    pub fn confirm_mesh(&self, domains: &[DomainId], meshes: &[Mesh]) -> Result<(), GhostError> {
        if domains.len() != meshes.len() {
            return Err(GhostError::ArrayCountMismatch {
                domains: domains.len(),
                payloads: meshes.len(),
            });
        }
        match self {
            Nesting::Trivial { num_domains } => {
                for &d in domains {
                    if d.index() >= *num_domains {
                        return Err(GhostError::DomainOutOfRange {
                            domain: d,
                            num_domains: *num_domains,
                        });
                    }
                }
                Ok(())
            }
            Nesting::Structured(n) => domains
                .iter()
                .zip(meshes)
                .try_for_each(|(&d, m)| n.confirm_mesh(d, m)),
        }
    }
}
