//! Target interpreter discovery and probing.

use super::process::{base_command, run_captured};
use crate::error::ResolverError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Virtual environment directory names searched next to the script, in order.
pub const VENV_DIR_NAMES: [&str; 3] = ["venv", ".venv", "env"];

static MODULE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("Invalid module name regex")
});

const STDLIB_PROBE: &str = "import sys\n\
names = set(getattr(sys, 'stdlib_module_names', ())) | set(sys.builtin_module_names)\n\
print('\\n'.join(sorted(names)))";

/// Interpreter path inside a virtual environment root.
pub fn venv_interpreter(venv_root: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_root.join("Scripts").join("python.exe")
    } else {
        venv_root.join("bin").join("python")
    }
}

/// Interpreter of a virtual environment sitting next to `script`, if any.
pub fn discover_venv_interpreter(script: &Path) -> Option<PathBuf> {
    let dir = script.parent().filter(|p| !p.as_os_str().is_empty())?;
    VENV_DIR_NAMES
        .iter()
        .map(|name| venv_interpreter(&dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// The host's default interpreter found on PATH.
pub fn default_interpreter() -> Option<PathBuf> {
    ["python3", "python"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Explicit choice first, then a local venv, then PATH.
pub fn resolve_interpreter(script: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(found) = discover_venv_interpreter(script) {
        log::info!("[Interpreter] Using virtual environment at {}", found.display());
        return Some(found);
    }
    default_interpreter()
}

/// Whether `name` is a syntactically valid dotted module path.
pub fn is_valid_module_name(name: &str) -> bool {
    MODULE_NAME_REGEX.is_match(name)
}

/// `python --version` text, or a placeholder when the probe fails.
pub async fn python_version(interpreter: &Path, timeout: Duration) -> String {
    let mut cmd = base_command(interpreter);
    cmd.arg("--version");
    match run_captured(cmd, timeout, "python --version").await {
        Ok(out) if out.success() => {
            // Python 2 printed the version on stderr
            let text = if out.stdout.trim().is_empty() {
                out.stderr
            } else {
                out.stdout
            };
            text.trim().to_string()
        }
        Ok(_) => "unknown".to_string(),
        Err(ResolverError::Timeout { .. }) => "timed out".to_string(),
        Err(_) => "unknown".to_string(),
    }
}

/// Run `import <module>` in a throwaway interpreter process.
pub async fn probe_import(
    interpreter: &Path,
    module: &str,
    timeout: Duration,
) -> Result<bool, ResolverError> {
    if !is_valid_module_name(module) {
        return Ok(false);
    }
    let mut cmd = base_command(interpreter);
    cmd.arg("-c").arg(format!("import {}", module));
    let out = run_captured(cmd, timeout, &format!("import {}", module)).await?;
    Ok(out.success())
}

/// Module names the interpreter itself reports as part of the standard library.
pub async fn probe_stdlib_names(
    interpreter: &Path,
    timeout: Duration,
) -> Result<Vec<String>, ResolverError> {
    let mut cmd = base_command(interpreter);
    cmd.arg("-c").arg(STDLIB_PROBE);
    let out = run_captured(cmd, timeout, "stdlib probe").await?;
    if !out.success() {
        return Err(ResolverError::ProcessLaunch(format!(
            "stdlib probe exited with {:?}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_validation() {
        assert!(is_valid_module_name("numpy"));
        assert!(is_valid_module_name("PyQt6.QtWidgets"));
        assert!(is_valid_module_name("_thread"));
        assert!(!is_valid_module_name("os; import shutil"));
        assert!(!is_valid_module_name("9lives"));
        assert!(!is_valid_module_name(""));
    }

    #[test]
    fn test_discover_venv_prefers_venv_order() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.py");
        std::fs::write(&script, "print('hi')\n").unwrap();
        assert_eq!(discover_venv_interpreter(&script), None);

        let dot_venv = venv_interpreter(&dir.path().join(".venv"));
        std::fs::create_dir_all(dot_venv.parent().unwrap()).unwrap();
        std::fs::write(&dot_venv, "").unwrap();
        assert_eq!(discover_venv_interpreter(&script), Some(dot_venv.clone()));

        let venv = venv_interpreter(&dir.path().join("venv"));
        std::fs::create_dir_all(venv.parent().unwrap()).unwrap();
        std::fs::write(&venv, "").unwrap();
        assert_eq!(discover_venv_interpreter(&script), Some(venv));
    }

    #[test]
    fn test_explicit_interpreter_wins() {
        let chosen = resolve_interpreter(
            Path::new("/srv/app/main.py"),
            Some(Path::new("/opt/python/bin/python3")),
        );
        assert_eq!(chosen, Some(PathBuf::from("/opt/python/bin/python3")));
    }

    #[tokio::test]
    async fn test_invalid_module_never_probed() {
        let ok = probe_import(
            Path::new("/nonexistent/python"),
            "os; import shutil",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_version_of_missing_interpreter_is_unknown() {
        let version = python_version(Path::new("/nonexistent/python"), Duration::from_secs(1)).await;
        assert_eq!(version, "unknown");
    }
}
