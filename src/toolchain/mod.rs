//! Native toolchain capability report.
//!
//! A `ToolchainDescriptor` is recomputed on demand by [`ToolchainDetector`]
//! and never persisted.

pub mod detector;

pub use detector::{default_tools_root, ToolchainDetector, TOOLS_DIR_ENV};

use crate::models::CompilerPreference;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Operating system family of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostPlatform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else if cfg!(target_os = "macos") {
            HostPlatform::MacOs
        } else if cfg!(target_os = "linux") {
            HostPlatform::Linux
        } else {
            HostPlatform::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolchainKind {
    MinGw64,
    Gcc,
    Clang,
    Msvc,
}

impl fmt::Display for ToolchainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolchainKind::MinGw64 => write!(f, "MinGW-w64"),
            ToolchainKind::Gcc => write!(f, "GCC"),
            ToolchainKind::Clang => write!(f, "Clang"),
            ToolchainKind::Msvc => write!(f, "MSVC"),
        }
    }
}

/// Where a toolchain was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolchainOrigin {
    Bundled,
    SystemPath,
    Installer,
}

/// One detected compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilerToolchain {
    pub kind: ToolchainKind,
    pub origin: ToolchainOrigin,
    /// Directory to put on PATH for the backend, when applicable
    pub bin_dir: Option<PathBuf>,
    pub executable: Option<PathBuf>,
}

impl CompilerToolchain {
    /// Best path to show for this toolchain.
    pub fn location(&self) -> &Path {
        self.bin_dir
            .as_deref()
            .or(self.executable.as_deref())
            .unwrap_or_else(|| Path::new("<installer>"))
    }
}

/// Everything the build planner needs to know about the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainDescriptor {
    pub platform: HostPlatform,
    /// In probe order: bundled, PATH, installer
    pub compilers: Vec<CompilerToolchain>,
    /// Directory containing the UPX executable
    pub upx_dir: Option<PathBuf>,
}

impl ToolchainDescriptor {
    /// A descriptor with nothing detected.
    pub fn empty(platform: HostPlatform) -> Self {
        ToolchainDescriptor {
            platform,
            compilers: Vec::new(),
            upx_dir: None,
        }
    }

    pub fn has_compiler(&self) -> bool {
        !self.compilers.is_empty()
    }

    pub fn upx_available(&self) -> bool {
        self.upx_dir.is_some()
    }

    pub fn bundled(&self) -> Option<&CompilerToolchain> {
        self.compilers
            .iter()
            .find(|c| c.origin == ToolchainOrigin::Bundled)
    }

    /// Toolchain matching the user's preference. `Auto` takes the first
    /// detected one, which is the bundled compiler when present.
    pub fn select(&self, preference: CompilerPreference) -> Option<&CompilerToolchain> {
        match preference {
            CompilerPreference::Auto => self.compilers.first(),
            CompilerPreference::MinGw64 => self
                .compilers
                .iter()
                .find(|c| matches!(c.kind, ToolchainKind::MinGw64 | ToolchainKind::Gcc)),
            CompilerPreference::Msvc => self.compilers.iter().find(|c| c.kind == ToolchainKind::Msvc),
            CompilerPreference::Clang => self.compilers.iter().find(|c| c.kind == ToolchainKind::Clang),
        }
    }
}
