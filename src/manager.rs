//! Assignment lifecycle: create, execute, delete, list.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::language::Language;
use crate::provision;
use crate::runner::{CodeRunner, ExecutionResult};
use crate::store::{is_valid_name, AssignmentMetadata, AssignmentStore, AssignmentSummary};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Returned by [`EnvironmentManager::create`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedAssignment {
    pub name: String,
    pub language: Language,
    pub requirements: Vec<String>,
    /// Requirements that could not be installed. Informational only.
    #[serde(skip)]
    pub failed_requirements: Vec<String>,
}

pub struct EnvironmentManager {
    config: Arc<Config>,
    store: AssignmentStore,
    runner: CodeRunner,
    /// Per-name locks: create/delete exclusive, execute shared (exclusive for C++).
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl EnvironmentManager {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let store = AssignmentStore::new(config.base_dir.clone());
        store.init()?;
        Ok(Self {
            runner: CodeRunner::new(config.clone()),
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &AssignmentStore {
        &self.store
    }

    async fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Create (or replace) an assignment environment.
    pub async fn create(&self, name: &str, language: &str, requirements: Vec<String>) -> Result<CreatedAssignment> {
        if !is_valid_name(name) {
            return Err(EngineError::Validation(
                "Assignment name must be alphanumeric with underscores".to_string(),
            ));
        }
        let language: Language = language.parse()?;

        let lock = self.lock_for(name).await;
        let _guard = lock.write().await;

        let env_dir = self.store.env_dir(name);
        if env_dir.exists() {
            info!(assignment = %name, "Assignment already exists - deleting previous data");
            fs::remove_dir_all(&env_dir).map_err(|e| {
                error!(assignment = %name, error = %e, "Failed to delete existing assignment");
                e
            })?;
        }

        let outcome = self.build(name, language, &requirements).await;
        match outcome {
            Ok(failed_requirements) => {
                info!(assignment = %name, %language, "Created assignment");
                Ok(CreatedAssignment {
                    name: name.to_string(),
                    language,
                    requirements,
                    failed_requirements,
                })
            }
            Err(e) => {
                error!(assignment = %name, error = %e, "Error creating assignment, rolling back");
                if env_dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&env_dir) {
                        warn!(assignment = %name, error = %cleanup, "Rollback left a partial environment");
                    }
                }
                Err(e)
            }
        }
    }

    async fn build(&self, name: &str, language: Language, requirements: &[String]) -> Result<Vec<String>> {
        let env_dir = self.store.env_dir(name);
        fs::create_dir_all(&env_dir)?;
        self.store
            .save(name, &AssignmentMetadata::new(language, requirements.to_vec()))?;

        let report = provision::provision(language, &env_dir, requirements, &self.config).await?;
        if !report.is_complete() {
            warn!(assignment = %name, failed = ?report.failed, "Some requirements could not be installed");
        }
        Ok(report.failed)
    }

    /// Run submitted code. Only an unknown assignment is an error; every other
    /// failure is reported inside the result.
    pub async fn execute(&self, name: &str, code: &str) -> Result<ExecutionResult> {
        if !self.store.exists(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }

        let lock = self.lock_for(name).await;
        let shared = lock.clone().read_owned().await;

        // Deleted while we waited for the lock.
        if !self.store.exists(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        let mut metadata = match self.metadata_for_run(name) {
            Ok(metadata) => metadata,
            Err(result) => return Ok(result),
        };

        // C++ builds into the environment's own src/main.cpp and program
        // binary, so its runs on one assignment are serialized.
        let _exclusive = if metadata.language == Language::Cpp {
            drop(shared);
            let guard = lock.write_owned().await;
            if !self.store.exists(name) {
                return Err(EngineError::NotFound(name.to_string()));
            }
            metadata = match self.metadata_for_run(name) {
                Ok(metadata) => metadata,
                Err(result) => return Ok(result),
            };
            Some(guard)
        } else {
            None
        };

        let env_dir = self.store.env_dir(name);
        let result = self.runner.run(metadata.language, &env_dir, code).await;
        info!(
            assignment = %name,
            language = %metadata.language,
            execution_time = result.execution_time,
            "Executed submission"
        );
        Ok(result)
    }

    /// Metadata needed to run, or the result explaining why it is unusable.
    fn metadata_for_run(&self, name: &str) -> std::result::Result<AssignmentMetadata, ExecutionResult> {
        match self.store.load(name) {
            Ok(metadata) => Ok(metadata),
            Err(EngineError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                error!(assignment = %name, "Assignment metadata not found");
                Err(ExecutionResult::infrastructure(format!(
                    "Assignment metadata not found: {}",
                    e
                )))
            }
            Err(e) => {
                error!(assignment = %name, error = %e, "Unreadable assignment metadata");
                Err(ExecutionResult::infrastructure(e.to_string()))
            }
        }
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        if !self.store.exists(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        let lock = self.lock_for(name).await;
        let outcome = {
            let _guard = lock.write().await;
            self.store.remove(name)
        };
        drop(lock);
        self.prune_lock(name).await;

        outcome?;
        info!(assignment = %name, "Deleted assignment");
        Ok(())
    }

    /// Forget the lock of `name` unless someone else still holds or awaits it.
    async fn prune_lock(&self, name: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(name);
        }
    }

    pub fn list(&self) -> Result<Vec<AssignmentSummary>> {
        self.store.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{METADATA_FILE, UNKNOWN};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(root: &Path) -> EnvironmentManager {
        let scratch = root.join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let mut config = Config::new(root.join("environments"));
        config.scratch_dir = scratch;
        EnvironmentManager::new(config).unwrap()
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn rejects_invalid_names_without_side_effects() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        for name in ["bad-name", "../escape", "", "with space", "a/b"] {
            let err = manager.create(name, "cpp", vec![]).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{name}");
        }
        assert_eq!(entries(manager.store().base_dir()), 0);
    }

    #[tokio::test]
    async fn rejects_unsupported_language() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        let err = manager.create("hw1", "haskell", vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(!manager.store().env_dir("hw1").exists());
    }

    #[tokio::test]
    async fn create_replaces_existing_assignment() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());

        let env_dir = manager.store().env_dir("hw1");
        fs::create_dir_all(&env_dir).unwrap();
        fs::write(env_dir.join("leftover.txt"), "old").unwrap();
        manager
            .store()
            .save("hw1", &AssignmentMetadata::new(Language::Python, vec!["numpy".into()]))
            .unwrap();

        let created = manager.create("hw1", "CPP", vec!["boost".into()]).await.unwrap();
        assert_eq!(created.language, Language::Cpp);
        assert_eq!(created.requirements, ["boost"]);

        assert!(!env_dir.join("leftover.txt").exists());
        let metadata = manager.store().load("hw1").unwrap();
        assert_eq!(metadata.language, Language::Cpp);
        assert_eq!(metadata.requirements, ["boost"]);
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_scaffold_rolls_back() {
        let root = TempDir::new().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let mut config = Config::new(root.path().join("environments"));
        config.scratch_dir = scratch;
        config.toolchain.python = "no-such-python-xyz".to_string();
        let manager = EnvironmentManager::new(config).unwrap();

        let err = manager.create("py1", "python", vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::Provision(_)));
        assert!(!manager.store().env_dir("py1").exists());
    }

    #[tokio::test]
    async fn execute_unknown_assignment_is_not_found() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        let scratch = root.path().join("scratch");

        for name in ["ghost", "../scratch"] {
            let err = manager.execute(name, "print(1)").await.unwrap_err();
            assert!(matches!(err, EngineError::NotFound(_)));
        }
        assert_eq!(entries(manager.store().base_dir()), 0);
        assert_eq!(entries(&scratch), 0);
    }

    #[tokio::test]
    async fn delete_removes_from_listing_and_execution() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        manager.create("hw2", "cpp", vec![]).await.unwrap();
        assert_eq!(manager.list().unwrap()[0].name, "hw2");

        manager.delete("hw2").await.unwrap();
        assert!(manager.list().unwrap().is_empty());
        assert!(matches!(
            manager.execute("hw2", "int main(){}").await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(manager.delete("hw2").await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_metadata_is_folded_into_result() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        manager.create("hw3", "cpp", vec![]).await.unwrap();
        manager.create("hw4", "cpp", vec![]).await.unwrap();
        let metadata = manager.store().env_dir("hw3").join(METADATA_FILE);
        fs::write(&metadata, "{{{").unwrap();

        let result = manager.execute("hw3", "int main(){}").await.unwrap();
        assert!(result.output.is_empty());
        assert!(result.error.starts_with("Invalid assignment metadata"));
        assert_eq!(result.execution_time, 0.0);

        fs::remove_file(&metadata).unwrap();
        let result = manager.execute("hw3", "int main(){}").await.unwrap();
        assert!(result.error.starts_with("Assignment metadata not found"));

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].language, UNKNOWN);
        assert_eq!(listed[1].language, "cpp");
    }

    async fn has_tool(program: &str) -> bool {
        tokio::process::Command::new(program)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn cpp_compile_error_and_success() {
        if !has_tool("g++").await {
            return;
        }
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        manager.create("a3", "cpp", vec![]).await.unwrap();
        let program = provision::cpp_program_path(&manager.store().env_dir("a3"));

        let result = manager.execute("a3", "int main( { return 0 }").await.unwrap();
        assert!(result.output.is_empty());
        assert!(result.error.starts_with("Compilation failed:"));
        assert!(result.error.len() > "Compilation failed:\n".len());
        assert!(!program.exists());

        let code = "#include <iostream>\nint main() { std::cout << 6 * 7 << std::endl; }\n";
        let result = manager.execute("a3", code).await.unwrap();
        assert_eq!(result.output, "42\n");
        assert_eq!(result.error, "");
        let built_at = fs::metadata(&program).unwrap().modified().unwrap();

        // A broken submission leaves the last good binary untouched.
        let result = manager.execute("a3", "int main() { return }").await.unwrap();
        assert!(result.error.starts_with("Compilation failed:"));
        assert_eq!(fs::metadata(&program).unwrap().modified().unwrap(), built_at);
        let result = manager.execute("a3", "int missing();\nint main() { return missing(); }\n").await.unwrap();
        assert!(result.error.starts_with("Compilation failed:"));
        assert_eq!(fs::metadata(&program).unwrap().modified().unwrap(), built_at);
        let rerun = std::process::Command::new(&program).output().unwrap();
        assert_eq!(String::from_utf8_lossy(&rerun.stdout), "42\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cpp_runs_see_their_own_output() {
        if !has_tool("g++").await {
            return;
        }
        let root = TempDir::new().unwrap();
        let manager = Arc::new(manager(root.path()));
        manager.create("c1", "cpp", vec![]).await.unwrap();

        let handles: Vec<_> = (0..6)
            .map(|value| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let code = format!(
                        "#include <iostream>\nint main() {{ std::cout << {} << std::endl; }}\n",
                        value
                    );
                    (value, manager.execute("c1", &code).await.unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (value, result) = handle.await.unwrap();
            assert_eq!(result.output, format!("{}\n", value), "error: {}", result.error);
            assert_eq!(result.error, "");
        }
    }

    /// Python assignment whose venv was never built; runs fail fast without a toolchain.
    fn bare_python_assignment(manager: &EnvironmentManager, name: &str) {
        fs::create_dir_all(manager.store().env_dir(name)).unwrap();
        manager
            .store()
            .save(name, &AssignmentMetadata::new(Language::Python, vec![]))
            .unwrap();
    }

    #[tokio::test]
    async fn execute_waits_for_exclusive_holder_of_same_name() {
        let root = TempDir::new().unwrap();
        let manager = Arc::new(manager(root.path()));
        bare_python_assignment(&manager, "busy");
        bare_python_assignment(&manager, "idle");

        // Same lock create and delete hold while they rebuild or remove.
        let lock = manager.lock_for("busy").await;
        let guard = lock.write().await;

        let waiting = tokio::spawn({
            let manager = manager.clone();
            async move { manager.execute("busy", "print(1)").await }
        });

        // Other names do not contend.
        let other = tokio::time::timeout(Duration::from_secs(5), manager.execute("idle", "print(1)"))
            .await
            .expect("execute on another name blocked")
            .unwrap();
        assert!(other.error.starts_with("Python execution error:"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());

        // Simulate a delete completing while the execute waits.
        manager.store().remove("busy").unwrap();
        drop(guard);
        let outcome = waiting.await.unwrap();
        assert!(matches!(outcome, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_releases_name_lock() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        manager.create("gone", "cpp", vec![]).await.unwrap();
        manager.create("kept", "cpp", vec![]).await.unwrap();

        manager.delete("gone").await.unwrap();
        let locks = manager.locks.lock().await;
        assert!(!locks.contains_key("gone"));
        assert!(locks.contains_key("kept"));
    }

    #[tokio::test]
    async fn python_runs_and_times_out() {
        if !has_tool("python3").await {
            return;
        }
        let root = TempDir::new().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let mut config = Config::new(root.path().join("environments"));
        config.scratch_dir = scratch.clone();
        config.exec_timeout = Duration::from_secs(2);
        let manager = EnvironmentManager::new(config).unwrap();

        // Hosts without the venv module cannot provision python at all.
        if manager.create("a1", "python", vec![]).await.is_err() {
            return;
        }

        let result = manager.execute("a1", "print(1+1)").await.unwrap();
        assert_eq!(result.output, "2\n");
        assert_eq!(result.error, "");
        assert!(result.execution_time < 2.0);
        assert_eq!(entries(&scratch), 0);

        let result = manager.execute("a1", "while True:\n    pass\n").await.unwrap();
        assert_eq!(result.output, "");
        assert!(result.error.contains("timed out"));
        assert_eq!(result.execution_time, 2.0);
        assert_eq!(entries(&scratch), 0);
    }

    #[tokio::test]
    async fn javascript_resolves_installed_package() {
        if !has_tool("node").await || !has_tool("npm").await {
            return;
        }
        let root = TempDir::new().unwrap();
        let manager = manager(root.path());
        let created = manager.create("a4", "javascript", vec!["lodash".into()]).await.unwrap();
        // No registry access on this host.
        if !created.failed_requirements.is_empty() {
            return;
        }

        let code = "const _ = require('lodash'); console.log(_.sum([1, 2, 3, 4]));";
        let result = manager.execute("a4", code).await.unwrap();
        assert_eq!(result.output.trim(), "10");
        assert_eq!(entries(&root.path().join("scratch")), 0);
    }
}
