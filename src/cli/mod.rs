//! CLI layer for doctrans.
//!
//! Provides the command-line interface using clap, with commands for
//! initializing state, ingesting and chunking documents, running
//! translations, and inspecting jobs and quota usage.

pub mod commands;
pub mod parser;

pub use commands::execute;
pub use parser::{Cli, Commands};
