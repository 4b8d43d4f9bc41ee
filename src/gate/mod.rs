//! TCP admission gate.
//!
//! A minimal front door that throttles connecting peers by address and
//! answers each connection with a JSON verdict line.

mod server;
mod verdict;

pub use server::{BoundGate, GateServer};
pub use verdict::Verdict;
