//! Packer Pro
//!
//! Turns a Python script into a standalone native executable by driving
//! PyInstaller or Nuitka, after making sure the script's third-party imports
//! are installed in the target interpreter.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Build configuration and dependency types
//! - **config**: Persisted settings and the compiled-in lookup tables
//! - **deps**: Import analysis and package resolution against an interpreter
//! - **toolchain**: C compiler and UPX discovery
//! - **plan**: Backend command line synthesis
//! - **orchestrator**: Phase state machine, workers and process supervision
//! - **system**: Interpreter discovery and bounded subprocess helpers
//! - **log_collector**: Decoupled on-disk logging
//! - **cli**: Command line front end

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod deps;
pub mod system;
pub mod toolchain;

pub mod plan;

// Robust, decoupled logging system
pub mod log_collector;

// Build coordination and async state management
pub mod orchestrator;

pub mod cli;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    AnalyzerError, AppError, BuildError, ConfigError, OrchestratorError, PlanError, ResolverError,
};

pub use models::{
    Backend, BuildConfiguration, CompilerPreference, CompressionMode, Dependency, DependencyStatus,
};

pub use config::{tables::LookupTables, PackerSettings, SettingsManager};

pub use deps::{DependencyAnalyzer, PackageResolver};

pub use toolchain::{ToolchainDescriptor, ToolchainDetector};

pub use plan::{BuildPlan, BuildPlanner};

pub use orchestrator::{
    BuildEvent, BuildOrchestrator, BuildOutcome, BuildPhaseState, BuildSession, DependencyDecision,
    OrchestrationState, ProcessSupervisor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
