//! Subcommand implementations.

pub mod consume;
pub mod history;
pub mod send;
pub mod status;
