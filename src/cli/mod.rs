//! Command-line interface for termbench.
//!
//! Provides commands for running the benchmark, listing tasks, and
//! writing the built-in sample tasks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
