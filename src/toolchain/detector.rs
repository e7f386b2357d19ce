//! Host probes for native compilers and the UPX compressor.
//!
//! Probe order for compilers:
//! 1. Bundled MinGW under `<tools>/mingw64/mingw64/bin` or `<tools>/mingw64/bin`
//! 2. `gcc`, then `clang` on the search path
//! 3. MSVC through a developer prompt environment, or `vswhere.exe` reporting an
//!    installation with the C++ tools workload (Windows only)
//!
//! UPX is searched recursively under `<tools>` first, then on the search path.
//! Every probe is best effort: absence is a valid answer and nothing here fails.

use super::{CompilerToolchain, HostPlatform, ToolchainDescriptor, ToolchainKind, ToolchainOrigin};
use crate::system::process::{base_command, run_captured};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Environment variable overriding the bundled tools root.
pub const TOOLS_DIR_ENV: &str = "PACKER_TOOLS_DIR";

const MINGW_BIN_CANDIDATES: [&str; 2] = ["mingw64/mingw64/bin", "mingw64/bin"];
const UPX_SEARCH_DEPTH: usize = 4;
const VSWHERE_TIMEOUT: Duration = Duration::from_secs(10);
const MSVC_COMPONENT: &str = "Microsoft.VisualStudio.Component.VC.Tools.x86.x64";

/// `$PACKER_TOOLS_DIR`, else `tools/` next to the running executable, else `./tools`.
pub fn default_tools_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(TOOLS_DIR_ENV) {
        return PathBuf::from(dir);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("tools")))
        .unwrap_or_else(|| PathBuf::from("tools"))
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

/// Capability probe for one host.
#[derive(Debug, Clone)]
pub struct ToolchainDetector {
    tools_root: PathBuf,
    /// Search path for PATH probes; `None` uses the process PATH
    search_path: Option<OsString>,
    platform: HostPlatform,
}

impl ToolchainDetector {
    pub fn new(tools_root: impl Into<PathBuf>) -> Self {
        ToolchainDetector {
            tools_root: tools_root.into(),
            search_path: None,
            platform: HostPlatform::current(),
        }
    }

    /// Detector rooted at [`default_tools_root`].
    pub fn from_env() -> Self {
        Self::new(default_tools_root())
    }

    /// Restrict PATH probes to `path` (same syntax as the PATH variable).
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn tools_root(&self) -> &Path {
        &self.tools_root
    }

    /// Run every probe and collect the findings.
    pub async fn detect(&self) -> ToolchainDescriptor {
        let local = self.clone();
        let mut descriptor = tokio::task::spawn_blocking(move || ToolchainDescriptor {
            platform: local.platform,
            compilers: local.local_compilers(),
            upx_dir: local.find_upx(),
        })
        .await
        .unwrap_or_else(|e| {
            log::warn!("[Toolchain] Filesystem probes did not complete: {}", e);
            ToolchainDescriptor::empty(self.platform)
        });

        if let Some(msvc) = self.probe_msvc().await {
            log::info!("[Toolchain] MSVC installation detected");
            descriptor.compilers.push(msvc);
        }
        if !descriptor.has_compiler() {
            log::warn!("[Toolchain] No native compiler detected; the backend may download or fail");
        }
        match descriptor.upx_dir {
            Some(ref dir) => log::info!("[Toolchain] UPX available in {}", dir.display()),
            None => log::info!("[Toolchain] UPX not found; outer compression disabled"),
        }
        descriptor
    }

    /// Bundled MinGW, then compilers on the search path.
    fn local_compilers(&self) -> Vec<CompilerToolchain> {
        let mut compilers = Vec::new();

        if let Some(mingw) = self.probe_bundled_mingw() {
            log::info!("[Toolchain] Bundled MinGW found at {}", mingw.location().display());
            compilers.push(mingw);
        }
        for found in self.probe_path_compilers() {
            log::info!("[Toolchain] {} found on PATH at {}", found.kind, found.location().display());
            compilers.push(found);
        }
        compilers
    }

    fn probe_bundled_mingw(&self) -> Option<CompilerToolchain> {
        MINGW_BIN_CANDIDATES
            .iter()
            .map(|rel| self.tools_root.join(rel))
            .find(|dir| dir.is_dir())
            .map(|bin_dir| {
                let gcc = bin_dir.join(exe_name("gcc"));
                CompilerToolchain {
                    kind: ToolchainKind::MinGw64,
                    origin: ToolchainOrigin::Bundled,
                    executable: gcc.is_file().then_some(gcc),
                    bin_dir: Some(bin_dir),
                }
            })
    }

    fn which(&self, name: &str) -> Option<PathBuf> {
        match self.search_path {
            Some(ref path) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(name, Some(path), cwd).ok()
            }
            None => which::which(name).ok(),
        }
    }

    fn probe_path_compilers(&self) -> Vec<CompilerToolchain> {
        let gcc_kind = if self.platform == HostPlatform::Windows {
            ToolchainKind::MinGw64
        } else {
            ToolchainKind::Gcc
        };

        [("gcc", gcc_kind), ("clang", ToolchainKind::Clang)]
            .into_iter()
            .filter_map(|(name, kind)| {
                self.which(name).map(|exe| CompilerToolchain {
                    kind,
                    origin: ToolchainOrigin::SystemPath,
                    bin_dir: exe.parent().map(Path::to_path_buf),
                    executable: Some(exe),
                })
            })
            .collect()
    }

    async fn probe_msvc(&self) -> Option<CompilerToolchain> {
        if self.platform != HostPlatform::Windows {
            return None;
        }

        if let Some(dir) = std::env::var_os("VCINSTALLDIR") {
            return Some(CompilerToolchain {
                kind: ToolchainKind::Msvc,
                origin: ToolchainOrigin::Installer,
                bin_dir: None,
                executable: Some(PathBuf::from(dir)),
            });
        }

        let vswhere = std::env::var_os("ProgramFiles(x86)")
            .map(PathBuf::from)
            .map(|p| p.join("Microsoft Visual Studio/Installer/vswhere.exe"))
            .filter(|p| p.is_file())?;

        // The installer ships vswhere even without any C++ workload.
        let install_dir = msvc_installation(&vswhere, VSWHERE_TIMEOUT).await?;
        Some(CompilerToolchain {
            kind: ToolchainKind::Msvc,
            origin: ToolchainOrigin::Installer,
            bin_dir: None,
            executable: Some(install_dir),
        })
    }

    /// Directory holding a UPX executable.
    pub fn find_upx(&self) -> Option<PathBuf> {
        if self.tools_root.is_dir() {
            let bundled = WalkDir::new(&self.tools_root)
                .max_depth(UPX_SEARCH_DEPTH)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .find(|e| {
                    let name = e.file_name().to_string_lossy().to_lowercase();
                    name == "upx.exe" || name == "upx"
                })
                .and_then(|e| e.path().parent().map(Path::to_path_buf));
            if bundled.is_some() {
                return bundled;
            }
        }
        self.which("upx")
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    }
}

/// Installation directory of the newest Visual Studio with the C++ tools, per `vswhere`.
async fn msvc_installation(vswhere: &Path, timeout: Duration) -> Option<PathBuf> {
    let mut cmd = base_command(vswhere);
    cmd.args([
        "-latest",
        "-requires",
        MSVC_COMPONENT,
        "-property",
        "installationPath",
    ]);

    match run_captured(cmd, timeout, "vswhere").await {
        Ok(out) if out.success() => out
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from),
        Ok(out) => {
            log::debug!("[Toolchain] vswhere exited with {:?}", out.code);
            None
        }
        Err(e) => {
            log::debug!("[Toolchain] vswhere query failed: {}", e);
            None
        }
    }
}
