//! Subcommand implementations.

pub mod add;
pub mod list;
