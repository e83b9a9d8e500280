//! assignrun - per-assignment code execution service.
//!
//! Usage:
//!   assignrun serve [--port 8000]            # Start HTTP server
//!   assignrun list                           # List assignments
//!   assignrun exec <assignment> <file>       # Run a source file once

use assignrun::http_server;
use assignrun::state::AppState;
use assignrun::{Config, EngineError, EnvironmentManager, Toolchain};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "assignrun")]
#[command(about = "Per-assignment code execution environments with HTTP API")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding one environment per assignment
    #[arg(long, env = "ASSIGNRUN_BASE_DIR", default_value = "environments")]
    base_dir: PathBuf,

    /// Directory for temporary source files (defaults to the system temp dir)
    #[arg(long, env = "ASSIGNRUN_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Run-phase time limit in seconds
    #[arg(long, env = "ASSIGNRUN_EXEC_TIMEOUT", default_value = "30")]
    exec_timeout: u64,

    /// Compile-phase time limit in seconds
    #[arg(long, env = "ASSIGNRUN_COMPILE_TIMEOUT", default_value = "30")]
    compile_timeout: u64,

    /// Time limit in seconds for each environment or package install command
    #[arg(long, env = "ASSIGNRUN_INSTALL_TIMEOUT", default_value = "300")]
    install_timeout: u64,

    /// Interpreter used to create Python virtual environments
    #[arg(long, env = "ASSIGNRUN_PYTHON")]
    python: Option<String>,

    #[arg(long, env = "ASSIGNRUN_NODE")]
    node: Option<String>,

    #[arg(long, env = "ASSIGNRUN_NPM")]
    npm: Option<String>,

    /// C++ compiler
    #[arg(long, env = "ASSIGNRUN_CXX")]
    cxx: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,
    },
    /// List known assignments
    List,
    /// Execute a source file in an assignment's environment
    Exec {
        assignment: String,
        file: PathBuf,
    },
}

impl Args {
    fn config(&self) -> Config {
        let defaults = Toolchain::default();
        let mut config = Config::new(&self.base_dir);
        if let Some(scratch_dir) = &self.scratch_dir {
            config.scratch_dir = scratch_dir.clone();
        }
        config.exec_timeout = Duration::from_secs(self.exec_timeout);
        config.compile_timeout = Duration::from_secs(self.compile_timeout);
        config.install_timeout = Duration::from_secs(self.install_timeout);
        config.toolchain = Toolchain {
            python: self.python.clone().unwrap_or(defaults.python),
            node: self.node.clone().unwrap_or(defaults.node),
            npm: self.npm.clone().unwrap_or(defaults.npm),
            cxx: self.cxx.clone().unwrap_or(defaults.cxx),
            cxx_std: defaults.cxx_std,
        };
        config
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let manager = match EnvironmentManager::new(args.config()) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Error: cannot initialise {}: {}", args.base_dir.display(), e);
            exit(1);
        }
    };

    match args.command {
        Commands::Serve { port } => {
            if let Err(e) = http_server::run_server(port, AppState::new(manager)).await {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
        Commands::List => match manager.list() {
            Ok(assignments) => {
                for a in assignments {
                    println!("{}\t{}\t{}", a.name, a.language, a.created_at);
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        },
        Commands::Exec { assignment, file } => {
            let code = match std::fs::read_to_string(&file) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: read {}: {}", file.display(), e);
                    exit(1);
                }
            };
            match manager.execute(&assignment, &code).await {
                Ok(result) => match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        exit(1);
                    }
                },
                Err(EngineError::NotFound(name)) => {
                    eprintln!("Error: assignment '{}' not found", name);
                    exit(2);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            }
        }
    }
}
