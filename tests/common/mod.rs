//! Shared fixtures: a scripted stand-in for a Python interpreter.
//!
//! The fake answers `--version`, the stdlib probe, `-c "import X"`,
//! `-m pip list`, `-m pip install` and `-m PyInstaller` from plain text
//! files in its state directory, so tests can shape the environment.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// How the fake PyInstaller behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Succeed,
    /// Print to stderr and exit with this code
    Fail(i32),
    /// Keep printing forever
    Hang,
}

#[cfg(unix)]
const FAKE_PYTHON: &str = r##"#!/bin/sh
STATE="__STATE__"
case "$1" in
  --version)
    echo "Python 3.12.1"
    exit 0;;
  -c)
    case "$2" in
      *stdlib_module_names*)
        printf 'os\nsys\njson\nsubprocess\n'
        exit 0;;
      "import "*)
        mod="${2#import }"
        if [ -f "$STATE/probe_delay" ]; then sleep "$(cat "$STATE/probe_delay")"; fi
        grep -qxF "$mod" "$STATE/importable" && exit 0
        echo "ModuleNotFoundError: No module named '$mod'" >&2
        exit 1;;
    esac
    exit 1;;
  -m)
    case "$2" in
      pip)
        case "$3" in
          list)
            cat "$STATE/installed"
            exit 0;;
          install)
            for last in "$@"; do :; done
            echo "$last" >> "$STATE/install_log"
            if [ -f "$STATE/install_delay" ]; then sleep "$(cat "$STATE/install_delay")"; fi
            if grep -qxF "$last" "$STATE/fail_install"; then
              echo "ERROR: No matching distribution found for $last" >&2
              exit 1
            fi
            echo "Collecting $last"
            echo "Successfully installed $last-1.0"
            echo "$last==1.0" >> "$STATE/installed"
            exit 0;;
        esac
        exit 1;;
      PyInstaller)
        shift 2
        script=""; dist=""; work=""
        while [ $# -gt 0 ]; do
          case "$1" in
            -F) script="$2"; shift;;
            --distpath) dist="$2"; shift;;
            --workpath) work="$2"; shift;;
          esac
          shift
        done
        name=$(basename "$script" .py)
        echo "123 INFO: PyInstaller: 6.3.0"
        mkdir -p "$work/$name"
        echo "# spec" > "$dist/$name.spec"
        echo "456 INFO: Analyzing $script"
        mode=$(cat "$STATE/build_mode")
        case "$mode" in
          hang)
            while true; do echo "INFO: still analyzing"; sleep 0.1; done;;
          fail*)
            echo "ERROR: build exploded" >&2
            exit "${mode#fail }";;
        esac
        echo "789 INFO: Building EXE from EXE-00.toc"
        echo "binary" > "$dist/$name"
        echo "790 INFO: Building EXE from EXE-00.toc completed successfully."
        exit 0;;
    esac
    exit 1;;
esac
exit 1
"##;

/// A fake interpreter plus a project directory holding the target script.
pub struct FakePython {
    pub dir: TempDir,
    pub interpreter: PathBuf,
    pub state: PathBuf,
    pub project: PathBuf,
}

impl FakePython {
    /// Interpreter where only PyInstaller is importable and nothing is installed.
    #[cfg(unix)]
    pub fn new() -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let project = dir.path().join("project");
        fs::create_dir_all(&state).unwrap();
        fs::create_dir_all(&project).unwrap();

        for name in ["installed", "importable", "fail_install", "install_log"] {
            fs::write(state.join(name), "").unwrap();
        }
        fs::write(state.join("importable"), "PyInstaller\n").unwrap();
        fs::write(state.join("build_mode"), "succeed").unwrap();

        let interpreter = dir.path().join("python");
        let body = FAKE_PYTHON.replace("__STATE__", &state.to_string_lossy());
        fs::write(&interpreter, body).unwrap();
        fs::set_permissions(&interpreter, fs::Permissions::from_mode(0o755)).unwrap();

        FakePython {
            dir,
            interpreter,
            state,
            project,
        }
    }

    /// Mark distributions as installed (as `pip list` reports them).
    pub fn installed(self, packages: &[&str]) -> Self {
        let lines: String = packages.iter().map(|p| format!("{}==1.0\n", p)).collect();
        fs::write(self.state.join("installed"), lines).unwrap();
        self
    }

    /// Modules `-c "import X"` succeeds for.
    pub fn importable(self, modules: &[&str]) -> Self {
        let lines: String = modules.iter().map(|m| format!("{}\n", m)).collect();
        fs::write(self.state.join("importable"), lines).unwrap();
        self
    }

    pub fn failing_installs(self, packages: &[&str]) -> Self {
        let lines: String = packages.iter().map(|p| format!("{}\n", p)).collect();
        fs::write(self.state.join("fail_install"), lines).unwrap();
        self
    }

    pub fn install_delay(self, seconds: u32) -> Self {
        fs::write(self.state.join("install_delay"), seconds.to_string()).unwrap();
        self
    }

    pub fn probe_delay(self, seconds: u32) -> Self {
        fs::write(self.state.join("probe_delay"), seconds.to_string()).unwrap();
        self
    }

    pub fn build_mode(self, mode: BuildMode) -> Self {
        let text = match mode {
            BuildMode::Succeed => "succeed".to_string(),
            BuildMode::Fail(code) => format!("fail {}", code),
            BuildMode::Hang => "hang".to_string(),
        };
        fs::write(self.state.join("build_mode"), text).unwrap();
        self
    }

    /// Write the target script into the project directory.
    pub fn script(&self, name: &str, source: &str) -> PathBuf {
        let path = self.project.join(name);
        fs::write(&path, source).unwrap();
        path
    }

    /// Packages `pip install` was asked for, in order.
    pub fn install_log(&self) -> Vec<String> {
        read_lines(&self.state.join("install_log"))
    }

    pub fn installed_lines(&self) -> Vec<String> {
        read_lines(&self.state.join("installed"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
