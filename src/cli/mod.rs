//! Command-line interface for inspecting and exercising a store.
//!
//! Provides:
//! - stats: store-wide summary
//! - partitions: per-partition counts and last indexes
//! - read: print the chunks of one partition
//! - append: write one chunk
//! - tail: follow the global log

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command};
pub use errors::{CliError, CliResult};
