//! Subcommand implementations.

pub mod jobs;
pub mod serve;
