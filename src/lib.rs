//! termbench: Terminal task benchmark for autonomous agents.
//!
//! This library evaluates an agent against terminal tasks. Each task runs
//! as one episode inside a disposable Docker sandbox: the orchestrator
//! relays commands between the participant agent and the sandbox, a
//! verification script decides the outcome, and the harness aggregates
//! episodes into a benchmark report.

// Core modules
pub mod cli;
pub mod episode;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod participant;
pub mod report;
pub mod sandbox;
pub mod task;
pub mod verify;

// Re-export commonly used error types
pub use error::{ProtocolError, SandboxError, TaskError, VerificationError};
