//! Hardware side of the bench: driver error type, reachability probe and a
//! simulated bench for running without devices.
pub mod error;
pub mod probe;
pub mod sim;

pub use error::HwError;
pub use probe::{PortProbe, Reachability};
pub use sim::{SimParams, SimulatedBench};
