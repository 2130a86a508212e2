//! Operator tooling for the sharded cache.
//!
//! Provides commands for:
//! - Running the router together with the health monitor
//! - Running a backend cache node
//! - Inspecting stats and nodes, evicting nodes and issuing cache commands
//!   from the router's console

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
