//! Structural self-checks for the topology tables.
//!
//! Readers fill the nesting and boundary tables piecemeal, so a table can be
//! individually valid per call and still inconsistent as a whole (a child
//! that does not nest, a shared map that disagrees with its reverse).
//! `validate_invariants` finds those; the topology build runs it once before
//! the tables are cached.

use crate::mesh_error::GhostError;

pub trait DebugInvariants {
    /// Panic on a broken invariant in debug builds, or in release builds with
    /// `check-invariants` / `strict-invariants`.
    fn debug_assert_invariants(&self);
    /// First broken invariant, as an error.
    fn validate_invariants(&self) -> Result<(), GhostError>;
}

/// Panic with `$ctx` if `$expr` is an `Err` and invariant checking is on.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[ghost tables] ", $($ctx)*, ": {}"), e);
        }
    };
}
