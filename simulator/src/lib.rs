#![doc = include_str!("../readme.md")]

pub mod cluster;
pub mod config;
pub mod error;
pub mod host;
pub mod provisioner;
pub mod scheduler;
pub mod simulation;
pub mod workflow;

pub use cluster::VmCluster;
pub use error::SchedulingError;
pub use scheduler::DpdsScheduler;
pub use simulation::{EnsembleSchedulingSimulation, RunReport};
pub use workflow::{Ensemble, WorkflowDefinition};
