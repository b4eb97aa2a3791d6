//! GhostError: unified error type for mesh-ghosts public APIs
//!
//! Variants fall into three groups. Configuration errors come from malformed
//! setup calls and are reported at the call that detected them, before any
//! state is recorded. Topology errors mean a mesh no longer matches the tables
//! built from it. Communication errors are transport failures; they are fatal
//! to the current execution and never retried.

use crate::topology::domain::DomainId;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type GhostResult<T> = Result<T, GhostError>;

/// Unified error type for mesh-ghosts operations.
#[derive(Debug, Error)]
pub enum GhostError {
    // ----- configuration -------------------------------------------------
    /// A refinement level outside `[0, num_levels)` was used.
    #[error("Refinement level {level} out of range (num_levels = {num_levels})")]
    LevelOutOfRange { level: usize, num_levels: usize },
    /// A domain id outside `[0, num_domains)` was used.
    #[error("Domain {domain} out of range (num_domains = {num_domains})")]
    DomainOutOfRange { domain: DomainId, num_domains: usize },
    /// The domain was never described during setup.
    #[error("Domain {0} has no recorded nesting or boundary information")]
    UnknownDomain(DomainId),
    /// `set_shared_points` received arrays of different length.
    #[error("Shared point arrays for {a}<->{b} differ in length ({len_a} vs {len_b})")]
    SharedPointLengthMismatch {
        a: DomainId,
        b: DomainId,
        len_a: usize,
        len_b: usize,
    },
    /// Logical extents had the wrong number of entries for the table's dimension.
    #[error("Expected {expected} logical extent values, got {got}")]
    ExtentsLengthMismatch { expected: usize, got: usize },
    /// A per-level ratio or cell size had the wrong number of entries.
    #[error("Expected {expected} values for a {expected}-dimensional table, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Refinement ratios must be strictly positive.
    #[error("Invalid refinement ratio {ratio:?} at level {level}")]
    InvalidRefinementRatio { level: usize, ratio: Vec<i64> },
    /// A domain was declared as its own neighbour.
    #[error("Domain {0} cannot share points with or give cells to itself")]
    SelfNeighbor(DomainId),
    /// Domain list and per-domain payload list have different lengths.
    #[error("Got {domains} domain ids but {payloads} payloads")]
    ArrayCountMismatch { domains: usize, payloads: usize },
    /// Arrays exchanged under one name disagree on component count.
    #[error("Array component mismatch: expected {expected}, got {got}")]
    ComponentMismatch { expected: usize, got: usize },
    /// Arrays exchanged under one name disagree on element type.
    #[error("Array element type mismatch: expected {expected}, got {got}")]
    ArrayTypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
    /// A given cell references a point that is neither shared nor given.
    #[error("Cell {cell} given by {from} to {to} references point {point} which is neither shared nor given")]
    UnresolvedCellPoint {
        from: DomainId,
        to: DomainId,
        cell: usize,
        point: usize,
    },

    /// A point, cell or tuple index past the end of its container.
    #[error("Index {index} out of range (len = {len})")]
    IndexOutOfRange { index: usize, len: usize },

    // ----- topology ------------------------------------------------------
    /// A mesh does not match the shape assumed when the tables were built.
    #[error("Topology mismatch on domain {domain}: {reason}")]
    TopologyMismatch { domain: DomainId, reason: String },

    // ----- communication -------------------------------------------------
    /// Transport-level failure talking to `neighbor`.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received payload could not be decoded.
    #[error("Malformed payload for {from}->{to}: {reason}")]
    MalformedPayload {
        from: DomainId,
        to: DomainId,
        reason: String,
    },

    // ----- application ---------------------------------------------------
    /// A per-execution stage failed; wraps the underlying error.
    #[error("Ghost exchange failed during {stage}: {source}")]
    ExchangeFailed {
        stage: String,
        #[source]
        source: Box<GhostError>,
    },
    /// A per-execution call was made before the topology was built.
    #[error("No ghost topology available for {0}")]
    NotReady(String),
    /// Robust ghost nodes were required but could not be produced.
    #[error("Ghost node layer is not robust: {0}")]
    NonRobustGhostNodes(String),
    /// An array some domain carries is absent from other domains.
    #[error("Array {name:?} is missing on some domains of rank(s) {ranks:?}")]
    MissingArray { name: String, ranks: Vec<usize> },
}

impl GhostError {
    /// True for errors that indicate the mesh changed underneath the tables.
    pub fn is_topology_mismatch(&self) -> bool {
        match self {
            GhostError::TopologyMismatch { .. } => true,
            GhostError::ExchangeFailed { source, .. } => source.is_topology_mismatch(),
            _ => false,
        }
    }

    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        GhostError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
