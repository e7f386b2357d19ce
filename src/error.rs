//! Unified error type hierarchy for Packer Pro
//!
//! One enum per layer: AnalyzerError, ResolverError, PlanError, BuildError,
//! ConfigError and OrchestratorError, plus AppError for the command line edge.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Static import analysis errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("Cannot read source file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Syntax error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
}

/// Package query and installation errors.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("{operation} timed out after {}s", timeout.as_secs())]
    Timeout { operation: String, timeout: Duration },

    #[error("Installing {package} failed: {reason}")]
    InstallFailed { package: String, reason: String },

    #[error("Failed to launch interpreter: {0}")]
    ProcessLaunch(String),

    #[error("IO error during package resolution: {0}")]
    IoError(#[from] io::Error),
}

/// Build plan synthesis errors.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Target script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("Cannot create output directory {path}: {reason}")]
    OutputDir { path: PathBuf, reason: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),
}

/// Build process execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Failed to launch build process: {0}")]
    ProcessLaunch(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Build cancelled by user")]
    BuildCancelled,

    #[error("A build process is already running")]
    AlreadyRunning,
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid TOML in lookup tables: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Errors surfaced by the orchestration layer.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Another operation is already in progress")]
    Busy,

    #[error("Dependency analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Package resolution failed: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Build plan failed: {0}")]
    Plan(#[from] PlanError),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("Operation aborted: {0}")]
    Aborted(String),
}

/// Global error type for the command line front end.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Interpreter or backend command failed
    #[error("Command '{cmd}' failed: {reason}")]
    OsCommand { cmd: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Build error: {0}")]
    Build(String),
}

impl AppError {
    /// Get a user-facing error message suitable for terminal display
    pub fn user_message(&self) -> String {
        match self {
            AppError::OsCommand { cmd, reason } => {
                format!("Failed to execute '{}': {}", cmd, reason)
            }
            AppError::Io(msg) => format!("File operation failed: {}", msg),
            AppError::Settings(msg) => format!("Settings error: {}", msg),
            AppError::InvalidInput(msg) => format!("Invalid input: {}", msg),
            AppError::Build(msg) => format!("Packaging did not complete: {}", msg),
        }
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Settings(e.to_string())
    }
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        AppError::Build(e.to_string())
    }
}
