//! Git access for branchwise.

pub mod client;
pub mod command;
pub mod scratch;

pub use client::RepositoryGateway;
pub use scratch::{ScratchClone, SimulationOutcome};
