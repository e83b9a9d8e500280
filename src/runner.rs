//! Executes submitted source inside an assignment's environment.
//!
//! Every path through [`CodeRunner::run`] yields an [`ExecutionResult`]: code
//! failures, timeouts, compile errors and infrastructure errors all land in
//! its `error` text.

use crate::config::Config;
use crate::language::Language;
use crate::process::{self, RunConfig, RunOutcome};
use crate::provision::{cpp_program_path, cpp_source_path, venv_executable, CPP_BUILD_DIR, NODE_MODULES_DIR};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::{Builder, TempPath};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub error: String,
    /// Seconds, rounded to milliseconds.
    pub execution_time: f64,
}

impl ExecutionResult {
    fn completed(stdout: String, stderr: String, elapsed: Duration) -> Self {
        Self {
            output: stdout,
            error: stderr,
            execution_time: round_secs(elapsed),
        }
    }

    fn timed_out(language: Language, budget: Duration) -> Self {
        let prefix = match language {
            Language::Python => "Execution".to_string(),
            other => format!("{} execution", other.display_name()),
        };
        Self {
            output: String::new(),
            error: format!("{} timed out after {} seconds", prefix, budget.as_secs()),
            execution_time: round_secs(budget),
        }
    }

    pub fn infrastructure(message: String) -> Self {
        Self {
            output: String::new(),
            error: message,
            execution_time: 0.0,
        }
    }
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Source file that lives for exactly one execution and is deleted on drop.
struct TempSource {
    path: TempPath,
}

impl TempSource {
    fn create(dir: &Path, language: Language, code: &str) -> std::io::Result<Self> {
        let mut file = Builder::new()
            .prefix("submission-")
            .suffix(language.source_suffix())
            .tempfile_in(dir)?;
        file.write_all(code.as_bytes())?;
        file.flush()?;
        // Closes the handle so the interpreter can open it on every platform.
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct CodeRunner {
    config: Arc<Config>,
}

impl CodeRunner {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Run `code` in the environment at `env_dir`.
    pub async fn run(&self, language: Language, env_dir: &Path, code: &str) -> ExecutionResult {
        let result = match language {
            Language::Python => self.run_python(env_dir, code).await,
            Language::Javascript => self.run_javascript(env_dir, code).await,
            Language::Cpp => self.run_cpp(env_dir, code).await,
        };
        result.unwrap_or_else(|e| {
            error!(%language, error = %e, "Execution infrastructure error");
            ExecutionResult::infrastructure(format!("{} execution error: {}", language.display_name(), e))
        })
    }

    async fn run_python(&self, env_dir: &Path, code: &str) -> std::io::Result<ExecutionResult> {
        let source = TempSource::create(&self.config.scratch_dir, Language::Python, code)?;
        let python = venv_executable(env_dir, "python");
        let config = RunConfig::new(&python, self.config.exec_timeout).arg(source.path());
        self.run_interpreted(Language::Python, &config).await
    }

    async fn run_javascript(&self, env_dir: &Path, code: &str) -> std::io::Result<ExecutionResult> {
        let source = TempSource::create(&self.config.scratch_dir, Language::Javascript, code)?;
        let node_path = prepend_search_path(&env_dir.join(NODE_MODULES_DIR), std::env::var_os("NODE_PATH"))?;
        info!(node_path = ?node_path, "Setting NODE_PATH");
        let config = RunConfig::new(&self.config.toolchain.node, self.config.exec_timeout)
            .arg(source.path())
            .env("NODE_PATH", node_path)
            .cwd(env_dir);
        self.run_interpreted(Language::Javascript, &config).await
    }

    async fn run_interpreted(&self, language: Language, config: &RunConfig) -> std::io::Result<ExecutionResult> {
        Ok(match process::run(config).await? {
            RunOutcome::Completed(result) => ExecutionResult::completed(result.stdout, result.stderr, result.elapsed),
            RunOutcome::TimedOut => ExecutionResult::timed_out(language, config.timeout),
        })
    }

    async fn run_cpp(&self, env_dir: &Path, code: &str) -> std::io::Result<ExecutionResult> {
        let source = cpp_source_path(env_dir);
        if let Some(src_dir) = source.parent() {
            fs::create_dir_all(src_dir)?;
        }
        fs::write(&source, code)?;

        let start = Instant::now();
        let program = cpp_program_path(env_dir);
        // Link into build/ first; the program binary only changes on success.
        let build_dir = env_dir.join(CPP_BUILD_DIR);
        fs::create_dir_all(&build_dir)?;
        let staged = build_dir.join(program.file_name().unwrap_or_default());
        let compile = RunConfig::new(&self.config.toolchain.cxx, self.config.compile_timeout)
            .arg(&self.config.toolchain.cxx_std)
            .arg(&source)
            .arg("-o")
            .arg(&staged);

        let compiled = process::run(&compile).await?;
        match compiled {
            RunOutcome::Completed(result) if result.success() => fs::rename(&staged, &program)?,
            RunOutcome::Completed(result) => {
                let _ = fs::remove_file(&staged);
                return Ok(ExecutionResult {
                    output: String::new(),
                    error: format!("Compilation failed:\n{}", result.stderr),
                    execution_time: round_secs(start.elapsed()),
                });
            }
            RunOutcome::TimedOut => {
                let _ = fs::remove_file(&staged);
                return Ok(ExecutionResult::timed_out(Language::Cpp, compile.timeout));
            }
        }

        let run = RunConfig::new(&program, self.config.exec_timeout).cwd(env_dir);
        Ok(match process::run(&run).await? {
            RunOutcome::Completed(result) => ExecutionResult::completed(result.stdout, result.stderr, start.elapsed()),
            RunOutcome::TimedOut => ExecutionResult::timed_out(Language::Cpp, run.timeout),
        })
    }
}

/// `dir` followed by any existing search path entries.
fn prepend_search_path(dir: &Path, existing: Option<OsString>) -> std::io::Result<OsString> {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = existing {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}
