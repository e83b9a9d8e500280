//! Per-assignment execution environments.
//!
//! An assignment is a named environment for one language (Python virtual
//! environment, npm package directory, or C++ build tree). Submitted source
//! is run inside it under a wall-clock budget and comes back as an
//! [`ExecutionResult`].

pub mod config;
pub mod error;
pub mod http_server;
pub mod install;
pub mod language;
pub mod manager;
pub mod process;
pub mod provision;
pub mod runner;
pub mod state;
pub mod store;

pub use config::{Config, Toolchain};
pub use error::{EngineError, Result};
pub use language::Language;
pub use manager::{CreatedAssignment, EnvironmentManager};
pub use runner::ExecutionResult;
pub use store::AssignmentSummary;
