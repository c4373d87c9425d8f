//! dtwin-provision: Provisioning workflow for a digital twins instance.
//!
//! Registers a model if it is missing, upserts a fixed set of sample twins,
//! links them with relationships, and runs a query, printing progress to
//! standard output. Remote failures are printed and the workflow moves on.

pub mod config;
pub mod console;
pub mod error;
pub mod provisioner;
pub mod relationship;

pub use config::{ProvisionConfig, Settings};
pub use console::Console;
pub use error::ProvisionError;
pub use provisioner::{connect, ModelOutcome, Provisioner, RunSummary};
