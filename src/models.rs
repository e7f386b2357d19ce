//! Core data types for Packer Pro.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory created next to the target script when no output directory is given.
pub const DEFAULT_OUTPUT_DIR_NAME: &str = "dist_output";

/// Packaging engine driven by the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    PyInstaller,
    Nuitka,
}

impl Backend {
    /// Module name the interpreter must be able to import for this backend.
    pub fn module_name(&self) -> &'static str {
        match self {
            Backend::PyInstaller => "PyInstaller",
            Backend::Nuitka => "nuitka",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::PyInstaller => write!(f, "PyInstaller"),
            Backend::Nuitka => write!(f, "Nuitka"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pyinstaller" => Ok(Backend::PyInstaller),
            "nuitka" => Ok(Backend::Nuitka),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::PyInstaller
    }
}

/// Compression applied to the produced executable.
///
/// "Inner" is the backend's own onefile payload compression (Nuitka only);
/// "outer" is UPX applied to the binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompressionMode {
    /// Index 0: backend compression plus UPX
    DoubleLayer,
    /// Index 1: backend compression only
    InnerOnly,
    /// Index 2: UPX only
    OuterOnly,
    /// Index 3: no compression at all
    None,
}

impl<'de> Deserialize<'de> for CompressionMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CompressionModeVisitor;

        impl<'de> Visitor<'de> for CompressionModeVisitor {
            type Value = CompressionMode;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a compression index (0-3) or mode name")
            }

            fn visit_u64<E>(self, value: u64) -> Result<CompressionMode, E>
            where
                E: de::Error,
            {
                CompressionMode::from_index(value as usize).ok_or_else(|| {
                    de::Error::invalid_value(de::Unexpected::Unsigned(value), &self)
                })
            }

            fn visit_i64<E>(self, value: i64) -> Result<CompressionMode, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::invalid_value(de::Unexpected::Signed(value), &self));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<CompressionMode, E>
            where
                E: de::Error,
            {
                value.parse::<CompressionMode>().map_err(|_| {
                    de::Error::unknown_variant(value, &["double", "inner", "outer", "none"])
                })
            }
        }

        deserializer.deserialize_any(CompressionModeVisitor)
    }
}

impl CompressionMode {
    /// Convert to the numeric index used by saved settings
    pub fn to_index(&self) -> usize {
        match self {
            CompressionMode::DoubleLayer => 0,
            CompressionMode::InnerOnly => 1,
            CompressionMode::OuterOnly => 2,
            CompressionMode::None => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(CompressionMode::DoubleLayer),
            1 => Some(CompressionMode::InnerOnly),
            2 => Some(CompressionMode::OuterOnly),
            3 => Some(CompressionMode::None),
            _ => None,
        }
    }

    /// Whether UPX should be applied when it is available.
    pub fn wants_upx(&self) -> bool {
        matches!(self, CompressionMode::DoubleLayer | CompressionMode::OuterOnly)
    }

    /// Whether the backend's own payload compression stays enabled.
    pub fn wants_inner(&self) -> bool {
        matches!(self, CompressionMode::DoubleLayer | CompressionMode::InnerOnly)
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMode::DoubleLayer => write!(f, "double"),
            CompressionMode::InnerOnly => write!(f, "inner"),
            CompressionMode::OuterOnly => write!(f, "outer"),
            CompressionMode::None => write!(f, "none"),
        }
    }
}

impl FromStr for CompressionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "double" | "doublelayer" | "0" => Ok(CompressionMode::DoubleLayer),
            "inner" | "inneronly" | "1" => Ok(CompressionMode::InnerOnly),
            "outer" | "outeronly" | "upx" | "2" => Ok(CompressionMode::OuterOnly),
            "none" | "3" => Ok(CompressionMode::None),
            _ => Err(format!("Unknown compression mode: {}", s)),
        }
    }
}

impl Default for CompressionMode {
    fn default() -> Self {
        CompressionMode::DoubleLayer
    }
}

/// Native compiler the user prefers for Nuitka builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerPreference {
    Auto,
    MinGw64,
    Msvc,
    Clang,
}

impl fmt::Display for CompilerPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerPreference::Auto => write!(f, "auto"),
            CompilerPreference::MinGw64 => write!(f, "mingw64"),
            CompilerPreference::Msvc => write!(f, "msvc"),
            CompilerPreference::Clang => write!(f, "clang"),
        }
    }
}

impl FromStr for CompilerPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(CompilerPreference::Auto),
            "mingw" | "mingw64" | "gcc" => Ok(CompilerPreference::MinGw64),
            "msvc" => Ok(CompilerPreference::Msvc),
            "clang" => Ok(CompilerPreference::Clang),
            _ => Err(format!("Unknown compiler preference: {}", s)),
        }
    }
}

impl Default for CompilerPreference {
    fn default() -> Self {
        CompilerPreference::Auto
    }
}

/// Resolution status of one third-party import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyStatus {
    Installed,
    Missing,
    /// The probe timed out; treated as missing by callers
    Unknown,
}

impl DependencyStatus {
    pub fn is_missing(&self) -> bool {
        !matches!(self, DependencyStatus::Installed)
    }
}

/// A third-party import and the package that provides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Top-level module name as written in the import statement
    pub module: String,
    /// Installable package identifier
    pub package: String,
    pub status: DependencyStatus,
}

/// Immutable snapshot of everything one build needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub script: PathBuf,
    pub output_dir: PathBuf,
    pub interpreter: PathBuf,
    pub icon: Option<PathBuf>,
    /// Keep a console window attached to the produced executable
    pub console: bool,
    pub compression: CompressionMode,
    pub backend: Backend,
    pub compiler: CompilerPreference,
    /// Parallel compilation jobs handed to the backend
    pub jobs: usize,
    /// Use the import scan to pick plugins and exclude unused heavy modules
    pub trim_imports: bool,
    pub auto_check_dependencies: bool,
    /// Alternative package index used for installs
    pub index_url: Option<String>,
}

impl BuildConfiguration {
    /// Create a configuration with defaults for everything but the script and interpreter.
    pub fn new(script: impl Into<PathBuf>, interpreter: impl Into<PathBuf>) -> Self {
        let script = script.into();
        let output_dir = default_output_dir(&script);
        BuildConfiguration {
            script,
            output_dir,
            interpreter: interpreter.into(),
            icon: None,
            console: true,
            compression: CompressionMode::default(),
            backend: Backend::default(),
            compiler: CompilerPreference::default(),
            jobs: num_cpus::get(),
            trim_imports: false,
            auto_check_dependencies: true,
            index_url: None,
        }
    }

    /// File stem of the target script, used to name backend artifacts.
    pub fn script_stem(&self) -> String {
        self.script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string())
    }
}

/// `<script_dir>/dist_output`
pub fn default_output_dir(script: &Path) -> PathBuf {
    script
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_OUTPUT_DIR_NAME)
}
