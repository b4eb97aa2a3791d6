#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-ghosts
//!
//! mesh-ghosts synthesises ghost data for domain-decomposed meshes. A dataset
//! split into domains is given one layer of neighbour information so that
//! per-domain processing (gradients, contours, smoothing) sees seamless
//! boundaries and duplicate cells can be suppressed downstream.
//!
//! Two families of decomposition are handled:
//! - **Structured AMR**: [`nesting::StructuredDomainNesting`] records the
//!   refinement hierarchy; coarse cells covered by a present finer patch are
//!   flagged `RefinedZoneInAmrGrid` in `avtGhostZones`.
//! - **Unstructured**: [`boundaries::UnstructuredDomainBoundaries`] records the
//!   points two domains share and the cells each gives the other. Exchanging
//!   those grows every mesh by one layer of `DuplicatedZoneInternal` cells,
//!   and ownership resolution flags duplicated points in `avtGhostNodes`.
//!
//! ## Communication
//!
//! All cross-process traffic goes through the
//! [`Communicator`](algs::communicator::Communicator) trait. [`NoComm`] runs
//! every domain in one process; `RayonComm` simulates several ranks with
//! threads for tests; `MpiComm` (feature `mpi-support`) is the real thing.
//! Results are identical regardless of how domains are spread over ranks.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-ghosts = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! [`application::GhostApplication`] ties the pieces together: it caches the
//! topology, runs the per-execution exchanges and reports partial coverage.
//!
//! [`NoComm`]: algs::communicator::NoComm

pub mod algs;
pub mod application;
pub mod boundaries;
pub mod config;
pub mod debug_invariants;
pub mod ghost;
pub mod mesh;
pub mod mesh_error;
pub mod nesting;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::application::{
        GhostApplication, GhostOutcome, GhostState, GhostTopology, TopologySource,
    };
    pub use crate::boundaries::{
        BoundaryExchanger, PointDecomposedBoundaries, UnstructuredDomainBoundaries,
    };
    pub use crate::config::{GhostConfig, GhostDataType};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::ghost::{
        Coverage, GHOST_NODES, GHOST_ZONES, GhostNodeType, GhostZoneType, PartialCoverage,
        PointOwnership,
    };
    pub use crate::mesh::{Cell, CellType, DataArray, Material, Mesh, MixedVariable};
    pub use crate::mesh_error::{GhostError, GhostResult};
    pub use crate::nesting::{Nesting, StructuredDomainNesting};
    pub use crate::topology::domain::{DomainId, DomainPair};
    pub use crate::topology::extents::LogicalExtents;
}
