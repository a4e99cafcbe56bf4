//! Per-connection state machines for both roles.
pub mod io;
pub mod issuer;
pub mod solver;

pub use io::{EnvelopeStream, RECV_BUFFER_SIZE};
pub use issuer::{run_issuer, IssuerContext};
pub use solver::{run_solver, SolverContext};
