//! Build plan synthesis.
//!
//! Turns a `BuildConfiguration` plus a `ToolchainDescriptor` into the exact
//! argument vector and environment overlay for one backend invocation.
//! The only side effect is creating the output directory; the same inputs
//! always give the same plan.

pub mod nuitka;
pub mod pyinstaller;

use crate::deps::DependencyAnalyzer;
use crate::error::PlanError;
use crate::models::{Backend, BuildConfiguration};
use crate::system::process::command_line;
use crate::toolchain::ToolchainDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment changes applied on top of the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverlay {
    /// Directories placed in front of PATH, in order
    pub path_prepend: Vec<PathBuf>,
    pub vars: BTreeMap<String, String>,
}

impl EnvironmentOverlay {
    pub fn is_empty(&self) -> bool {
        self.path_prepend.is_empty() && self.vars.is_empty()
    }

    /// Add a directory to the front-of-PATH list once.
    pub fn prepend_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.path_prepend.contains(&dir) {
            self.path_prepend.push(dir);
        }
    }

    /// New PATH value built from `current`, or `None` when nothing is prepended.
    pub fn path_value(&self, current: Option<OsString>) -> Option<OsString> {
        if self.path_prepend.is_empty() {
            return None;
        }
        let existing: Vec<PathBuf> = current
            .as_deref()
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default();
        let joined = self.path_prepend.iter().cloned().chain(existing);
        match std::env::join_paths(joined) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("[Plan] Cannot extend PATH: {}", e);
                None
            }
        }
    }

    /// Apply the overlay to a command that inherits the current environment.
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        if let Some(path) = self.path_value(std::env::var_os("PATH")) {
            cmd.env("PATH", path);
        }
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
    }
}

/// Complete recipe for one backend invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub backend: Backend,
    /// Interpreter that runs the backend module
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: EnvironmentOverlay,
    pub output_dir: PathBuf,
    /// Glob patterns, relative to `output_dir`, of partial artifacts removed on cancel
    pub intermediates: Vec<String>,
    /// Where the finished executable is expected to appear
    pub expected_artifact: PathBuf,
    /// Advisory messages for the log (degraded options and the like)
    pub notes: Vec<String>,
}

impl BuildPlan {
    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

/// Backend argument grammar shared by both backends.
pub(crate) struct PlanContext<'a> {
    pub config: &'a BuildConfiguration,
    pub toolchain: &'a ToolchainDescriptor,
    /// Result of the import scan; `None` when it could not run
    pub imports: Option<&'a BTreeSet<String>>,
    pub heavy_modules: &'a [String],
}

impl PlanContext<'_> {
    /// Heavy modules the script never imports, when trimming is enabled.
    pub fn trimmed_modules(&self) -> Vec<String> {
        match (self.config.trim_imports, self.imports) {
            (true, Some(imports)) => self
                .heavy_modules
                .iter()
                .filter(|m| !imports.contains(m.as_str()))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Synthesizes plans; holds the analyzer used for the import scan.
#[derive(Debug, Clone)]
pub struct BuildPlanner {
    analyzer: DependencyAnalyzer,
}

impl BuildPlanner {
    pub fn new(analyzer: DependencyAnalyzer) -> Self {
        BuildPlanner { analyzer }
    }

    /// Produce the plan for `config` on a host described by `toolchain`.
    pub fn synthesize(
        &self,
        config: &BuildConfiguration,
        toolchain: &ToolchainDescriptor,
    ) -> Result<BuildPlan, PlanError> {
        if !config.script.is_file() {
            return Err(PlanError::ScriptNotFound(config.script.clone()));
        }
        if config.jobs == 0 {
            return Err(PlanError::InvalidConfig("jobs must be at least 1".to_string()));
        }
        if let Some(ref icon) = config.icon {
            if !icon.is_file() {
                return Err(PlanError::InvalidConfig(format!(
                    "icon file not found: {}",
                    icon.display()
                )));
            }
        }

        std::fs::create_dir_all(&config.output_dir).map_err(|e| PlanError::OutputDir {
            path: config.output_dir.clone(),
            reason: e.to_string(),
        })?;

        let mut notes = Vec::new();
        let imports = match self.analyzer.imported_modules(&config.script) {
            Ok(imports) => Some(imports),
            Err(e) => {
                notes.push(format!(
                    "Import scan failed ({}); using default plugin set without trimming",
                    e
                ));
                None
            }
        };

        let ctx = PlanContext {
            config,
            toolchain,
            imports: imports.as_ref(),
            heavy_modules: self.analyzer.tables().heavy_modules(),
        };
        let tables = self.analyzer.tables();

        let mut plan = match config.backend {
            Backend::PyInstaller => pyinstaller::plan(&ctx),
            Backend::Nuitka => nuitka::plan(&ctx, tables),
        };
        notes.append(&mut plan.notes);
        plan.notes = notes;
        Ok(plan)
    }
}

/// Working directory for the backend: the script's directory.
pub(crate) fn script_dir(script: &Path) -> PathBuf {
    script
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
