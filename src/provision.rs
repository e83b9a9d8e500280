//! Per-language environment scaffolds.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::install::{self, InstallReport};
use crate::language::Language;
use crate::process::{self, RunConfig, RunOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const VENV_DIR: &str = "venv";
pub const NODE_MODULES_DIR: &str = "node_modules";
pub const PACKAGE_MANIFEST: &str = "package.json";
pub const CPP_SRC_DIR: &str = "src";
pub const CPP_BUILD_DIR: &str = "build";
pub const CPP_MAIN_SOURCE: &str = "main.cpp";
pub const CPP_PROGRAM: &str = "program";

const CMAKE_LISTS: &str = "\
cmake_minimum_required(VERSION 3.10)
project(CppAssignment)

set(CMAKE_CXX_STANDARD 17)
set(CMAKE_CXX_STANDARD_REQUIRED ON)

add_executable(program src/main.cpp)
";

/// Path of an executable inside the assignment's virtual environment.
pub fn venv_executable(env_dir: &Path, name: &str) -> PathBuf {
    if cfg!(windows) {
        env_dir.join(VENV_DIR).join("Scripts").join(format!("{}.exe", name))
    } else {
        env_dir.join(VENV_DIR).join("bin").join(name)
    }
}

pub fn cpp_source_path(env_dir: &Path) -> PathBuf {
    env_dir.join(CPP_SRC_DIR).join(CPP_MAIN_SOURCE)
}

pub fn cpp_program_path(env_dir: &Path) -> PathBuf {
    let name = if cfg!(windows) {
        format!("{}.exe", CPP_PROGRAM)
    } else {
        CPP_PROGRAM.to_string()
    };
    env_dir.join(name)
}

/// Build the scaffold for `language` inside `env_dir` and install its
/// requirements. Only a scaffold failure is an error; package failures end up
/// in the returned report.
pub async fn provision(
    language: Language,
    env_dir: &Path,
    requirements: &[String],
    config: &Config,
) -> Result<InstallReport> {
    match language {
        Language::Python => provision_python(env_dir, requirements, config).await,
        Language::Javascript => provision_javascript(env_dir, requirements, config).await,
        Language::Cpp => provision_cpp(env_dir),
    }
}

async fn provision_python(env_dir: &Path, requirements: &[String], config: &Config) -> Result<InstallReport> {
    let venv_dir = env_dir.join(VENV_DIR);
    let create = RunConfig::new(&config.toolchain.python, config.install_timeout)
        .args(["-m", "venv"])
        .arg(&venv_dir);

    match process::run(&create).await {
        Ok(RunOutcome::Completed(result)) if result.success() => {}
        Ok(RunOutcome::Completed(result)) => {
            return Err(EngineError::Provision(format!(
                "virtual environment creation failed: {}",
                result.stderr.trim()
            )))
        }
        Ok(RunOutcome::TimedOut) => {
            return Err(EngineError::Provision(
                "virtual environment creation timed out".to_string(),
            ))
        }
        Err(e) => {
            return Err(EngineError::Provision(format!(
                "could not run {}: {}",
                config.toolchain.python, e
            )))
        }
    }
    info!(venv = %venv_dir.display(), "Created Python virtual environment");

    let python = venv_executable(env_dir, "python");
    Ok(install::install_python(&python, requirements, config.install_timeout).await)
}

async fn provision_javascript(env_dir: &Path, requirements: &[String], config: &Config) -> Result<InstallReport> {
    fs::create_dir_all(env_dir.join(NODE_MODULES_DIR))?;

    let name = env_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let manifest = serde_json::json!({
        "name": name,
        "version": "1.0.0",
        "description": "Assignment environment",
        "dependencies": {},
    });
    let manifest = serde_json::to_string_pretty(&manifest)
        .map_err(|e| EngineError::Provision(e.to_string()))?;
    fs::write(env_dir.join(PACKAGE_MANIFEST), manifest)?;

    Ok(install::install_javascript(&config.toolchain.npm, env_dir, requirements, config.install_timeout).await)
}

fn provision_cpp(env_dir: &Path) -> Result<InstallReport> {
    fs::create_dir_all(env_dir.join(CPP_SRC_DIR))?;
    fs::create_dir_all(env_dir.join(CPP_BUILD_DIR))?;
    fs::write(env_dir.join("CMakeLists.txt"), CMAKE_LISTS)?;
    info!(env_dir = %env_dir.display(), "Created C++ environment with CMake configuration");
    Ok(InstallReport::default())
}
