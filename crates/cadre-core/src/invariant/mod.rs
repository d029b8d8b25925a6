//! Command execution used for baseline capture and verification commands.

pub mod runner;

pub use runner::{run_command, CommandResult, CommandSpec};
