//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock budget for running submitted code (and for compiling it).
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Default budget for a single environment-creation or package-install command.
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 300;

/// External executables the backends shell out to.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Interpreter used to create virtual environments.
    pub python: String,
    pub node: String,
    pub npm: String,
    pub cxx: String,
    pub cxx_std: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            python: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            node: "node".to_string(),
            npm: if cfg!(windows) { "npm.cmd" } else { "npm" }.to_string(),
            cxx: "g++".to_string(),
            cxx_std: "-std=c++17".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// One subdirectory per assignment lives here.
    pub base_dir: PathBuf,
    /// Where temporary source files are materialized.
    pub scratch_dir: PathBuf,
    pub exec_timeout: Duration,
    pub compile_timeout: Duration,
    pub install_timeout: Duration,
    pub toolchain: Toolchain,
}

impl Config {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("environments"),
            scratch_dir: std::env::temp_dir(),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            compile_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            install_timeout: Duration::from_secs(DEFAULT_INSTALL_TIMEOUT_SECS),
            toolchain: Toolchain::default(),
        }
    }
}
