//! Best-effort dependency installation.
//!
//! Every requirement is installed independently. A package that cannot be
//! installed is recorded in the [`InstallReport`] and logged, but never fails
//! the assignment it belongs to.

use crate::process::{self, RunConfig, RunOutcome};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Version constraint operators stripped by the last pip fallback.
const VERSION_OPERATORS: [&str; 3] = ["==", ">=", "<="];

/// Extra pip flags for the fallback steps: no local cache, no version check.
const UNCACHED_FLAGS: [&str; 2] = ["--no-cache-dir", "--disable-pip-version-check"];

/// Commonly misnamed npm packages and their registry names.
const NPM_NAME_CORRECTIONS: &[(&str, &str)] = &[
    ("tensorflow-js", "@tensorflow/tfjs"),
    ("three.js", "three"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One step of the pip fallback chain, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipStrategy {
    /// The exact specifier, preferring wheels.
    Exact,
    /// Same specifier without the local cache or version checks.
    NoCache,
    /// Bare package name with the version constraint dropped.
    Unpinned,
}

impl PipStrategy {
    pub const CHAIN: [PipStrategy; 3] = [PipStrategy::Exact, PipStrategy::NoCache, PipStrategy::Unpinned];

    /// pip arguments for this step, or `None` when the step does not apply.
    pub fn pip_args(&self, requirement: &str) -> Option<Vec<String>> {
        let (flags, target): (&[&str], String) = match self {
            PipStrategy::Exact => (&[], requirement.to_string()),
            PipStrategy::NoCache => (&UNCACHED_FLAGS, requirement.to_string()),
            PipStrategy::Unpinned => (&UNCACHED_FLAGS, strip_version(requirement)?),
        };
        let mut args: Vec<String> = ["install", "--prefer-binary"]
            .iter()
            .chain(flags)
            .map(|s| s.to_string())
            .collect();
        args.push(target);
        Some(args)
    }
}

/// Package name without its version constraint, if it had one.
pub fn strip_version(requirement: &str) -> Option<String> {
    let cut = VERSION_OPERATORS
        .iter()
        .filter_map(|op| requirement.find(op))
        .min()?;
    let bare = requirement[..cut].trim();
    (!bare.is_empty()).then(|| bare.to_string())
}

pub fn correct_npm_name(package: &str) -> &str {
    NPM_NAME_CORRECTIONS
        .iter()
        .find(|(wrong, _)| *wrong == package)
        .map(|(_, right)| *right)
        .unwrap_or(package)
}

/// Install Python requirements with `<python> -m pip`, walking the fallback
/// chain per requirement.
pub async fn install_python(python: &Path, requirements: &[String], timeout: Duration) -> InstallReport {
    let mut report = InstallReport::default();
    if requirements.is_empty() {
        return report;
    }

    let upgrade = RunConfig::new(python, timeout).args(["-m", "pip", "install", "--upgrade", "pip"]);
    if !attempt(&upgrade).await {
        warn!("Could not upgrade pip, continuing with installation");
    }

    for requirement in requirements {
        let mut installed = false;
        for strategy in PipStrategy::CHAIN {
            let Some(args) = strategy.pip_args(requirement) else {
                continue;
            };
            let config = RunConfig::new(python, timeout).args(["-m", "pip"]).args(&args);
            if attempt(&config).await {
                info!(package = %requirement, ?strategy, "Installed Python requirement");
                installed = true;
                break;
            }
            warn!(package = %requirement, ?strategy, "pip install attempt failed");
        }
        if installed {
            report.installed.push(requirement.clone());
        } else {
            report.failed.push(requirement.clone());
        }
    }

    if report.is_complete() {
        info!(requirements = ?report.installed, "Installed all Python requirements");
    } else {
        warn!(failed = ?report.failed, "Could not install some requirements");
    }
    report
}

/// Install npm packages one at a time into `env_dir`, preferring the local
/// cache and skipping funding/audit requests.
pub async fn install_javascript(
    npm: &str,
    env_dir: &Path,
    requirements: &[String],
    timeout: Duration,
) -> InstallReport {
    let mut report = InstallReport::default();

    for requirement in requirements {
        let package = correct_npm_name(requirement);
        if package != requirement {
            info!(from = %requirement, to = %package, "Corrected package name");
        }
        let config = RunConfig::new(npm, timeout)
            .args(["install", "--prefer-offline", "--no-fund", "--no-audit", "--prefix"])
            .arg(env_dir)
            .arg(package)
            .cwd(env_dir);
        if attempt(&config).await {
            info!(package, "Installed JavaScript package");
            report.installed.push(package.to_string());
        } else {
            warn!(package, "Failed to install JavaScript package");
            report.failed.push(package.to_string());
        }
    }

    if !report.is_complete() {
        warn!(failed = ?report.failed, "Could not install some packages");
    }
    report
}

/// Run an install command; true only on a zero exit within the budget.
async fn attempt(config: &RunConfig) -> bool {
    match process::run(config).await {
        Ok(RunOutcome::Completed(result)) if result.success() => true,
        Ok(RunOutcome::Completed(result)) => {
            warn!(exit = ?result.exit_code, stderr = %result.stderr.trim(), "Install command failed");
            false
        }
        Ok(RunOutcome::TimedOut) => false,
        Err(e) => {
            warn!(program = ?config.program, error = %e, "Could not start install command");
            false
        }
    }
}
