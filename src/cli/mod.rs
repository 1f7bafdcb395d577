//! CLI module for ducky - command-line flags and terminal output.

pub mod commands;
pub mod table;

pub use commands::{Cli, Mode};
