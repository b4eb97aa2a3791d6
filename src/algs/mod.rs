//! Communication plumbing: the communicator abstraction, the wire format and
//! the two-stage peer exchange built on them.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, RayonComm};
pub use exchange::{all_gather_variable_length, gather_variable_length};
