use packer_pro::toolchain::{
    CompilerToolchain, HostPlatform, ToolchainDescriptor, ToolchainKind, ToolchainOrigin,
};
use packer_pro::{
    Backend, BuildConfiguration, BuildPlanner, CompilerPreference, CompressionMode,
    DependencyAnalyzer, LookupTables, PlanError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn planner() -> BuildPlanner {
    BuildPlanner::new(DependencyAnalyzer::new(Arc::new(
        LookupTables::builtin().unwrap(),
    )))
}

fn project(source: &str) -> (TempDir, BuildConfiguration) {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("app.py");
    std::fs::write(&script, source).unwrap();
    let mut config = BuildConfiguration::new(&script, "/opt/py/bin/python3");
    config.jobs = 4;
    (dir, config)
}

fn linux_host(upx: Option<&str>) -> ToolchainDescriptor {
    ToolchainDescriptor {
        platform: HostPlatform::Linux,
        compilers: vec![CompilerToolchain {
            kind: ToolchainKind::Gcc,
            origin: ToolchainOrigin::SystemPath,
            bin_dir: Some(PathBuf::from("/usr/bin")),
            executable: Some(PathBuf::from("/usr/bin/gcc")),
        }],
        upx_dir: upx.map(PathBuf::from),
    }
}

fn windows_host() -> ToolchainDescriptor {
    ToolchainDescriptor {
        platform: HostPlatform::Windows,
        compilers: vec![CompilerToolchain {
            kind: ToolchainKind::MinGw64,
            origin: ToolchainOrigin::Bundled,
            bin_dir: Some(PathBuf::from("C:/packer/tools/mingw64/bin")),
            executable: None,
        }],
        upx_dir: Some(PathBuf::from("C:/packer/tools/upx")),
    }
}

fn has(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[test]
fn test_pyinstaller_layout() {
    let (dir, mut config) = project("import requests\n");
    config.console = false;
    let plan = planner().synthesize(&config, &linux_host(Some("/opt/upx"))).unwrap();

    let out = dir.path().join("dist_output");
    assert_eq!(plan.backend, Backend::PyInstaller);
    assert_eq!(plan.program, PathBuf::from("/opt/py/bin/python3"));
    assert_eq!(&plan.args[..4], &["-m", "PyInstaller", "-F", &*config.script.to_string_lossy()]);
    assert!(has(&plan.args, "-w"));
    assert!(has(&plan.args, "--noconfirm"));
    assert!(plan.args.windows(2).any(|w| w[0] == "--upx-dir" && w[1] == "/opt/upx"));
    assert!(!plan.args.iter().any(|a| a.starts_with("--jobs")));
    assert_eq!(plan.working_dir, dir.path());
    assert_eq!(plan.expected_artifact, out.join("app"));
    assert!(out.is_dir());
}

#[test]
fn test_pyinstaller_without_compression_skips_upx() {
    let (_dir, mut config) = project("print('hi')\n");
    config.compression = CompressionMode::None;
    let plan = planner().synthesize(&config, &linux_host(Some("/opt/upx"))).unwrap();

    assert!(!has(&plan.args, "--upx-dir"));
    assert!(has(&plan.args, "--noupx"));
    assert!(plan.notes.is_empty());
}

#[test]
fn test_missing_upx_degrades_with_note() {
    let (_dir, config) = project("print('hi')\n");
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();

    assert!(has(&plan.args, "--noupx"));
    assert!(plan.notes.iter().any(|n| n.contains("UPX not found")));
}

#[test]
fn test_same_inputs_same_plan() {
    let (_dir, config) = project("import numpy\nimport tkinter\n");
    let host = linux_host(Some("/opt/upx"));
    let first = planner().synthesize(&config, &host).unwrap();
    let second = planner().synthesize(&config, &host).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_nuitka_compression_modes() {
    let (_dir, mut config) = project("print('hi')\n");
    config.backend = Backend::Nuitka;
    let host = linux_host(Some("/opt/upx"));

    config.compression = CompressionMode::DoubleLayer;
    let plan = planner().synthesize(&config, &host).unwrap();
    assert!(has(&plan.args, "--enable-plugin=upx"));
    assert!(!has(&plan.args, "--onefile-no-compression"));
    assert!(plan.env.path_prepend.contains(&PathBuf::from("/opt/upx")));

    config.compression = CompressionMode::InnerOnly;
    let plan = planner().synthesize(&config, &host).unwrap();
    assert!(has(&plan.args, "--disable-plugin=upx"));
    assert!(!has(&plan.args, "--onefile-no-compression"));

    config.compression = CompressionMode::OuterOnly;
    let plan = planner().synthesize(&config, &host).unwrap();
    assert!(has(&plan.args, "--enable-plugin=upx"));
    assert!(has(&plan.args, "--onefile-no-compression"));

    config.compression = CompressionMode::None;
    let plan = planner().synthesize(&config, &host).unwrap();
    assert!(has(&plan.args, "--disable-plugin=upx"));
    assert!(has(&plan.args, "--onefile-no-compression"));
}

#[test]
fn test_nuitka_core_flags() {
    let (dir, mut config) = project("import PySide6\nimport PyQt6\nimport tkinter\n");
    config.backend = Backend::Nuitka;
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();

    assert_eq!(&plan.args[..4], &["-m", "nuitka", "--standalone", "--onefile"]);
    assert!(has(&plan.args, "--jobs=4"));
    assert!(has(&plan.args, "--enable-plugin=pyqt6"));
    assert!(!has(&plan.args, "--enable-plugin=pyside6"));
    assert!(has(&plan.args, "--enable-plugin=tk-inter"));
    assert!(has(&plan.args, "--assume-yes-for-downloads"));
    assert_eq!(
        plan.args.last().map(String::as_str),
        Some(&*config.script.to_string_lossy())
    );
    assert_eq!(
        plan.expected_artifact,
        dir.path().join("dist_output").join("app.bin")
    );
}

#[test]
fn test_nuitka_bundled_mingw_on_windows() {
    let (_dir, mut config) = project("print('hi')\n");
    config.backend = Backend::Nuitka;
    config.console = false;
    config.compiler = CompilerPreference::Auto;
    let plan = planner().synthesize(&config, &windows_host()).unwrap();

    assert!(has(&plan.args, "--mingw64"));
    assert!(has(&plan.args, "--windows-console-mode=disable"));
    assert_eq!(
        plan.env.path_prepend.first(),
        Some(&PathBuf::from("C:/packer/tools/mingw64/bin"))
    );
    assert!(plan.expected_artifact.to_string_lossy().ends_with("app.exe"));
}

#[test]
fn test_requested_compiler_missing_keeps_flag_with_note() {
    let (_dir, mut config) = project("print('hi')\n");
    config.backend = Backend::Nuitka;
    config.compiler = CompilerPreference::Clang;
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();

    assert!(has(&plan.args, "--clang"));
    assert!(plan.notes.iter().any(|n| n.contains("No clang compiler detected")));
}

#[test]
fn test_trimming_excludes_unused_heavy_modules() {
    let (_dir, mut config) = project("import tkinter\n");
    config.trim_imports = true;
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();

    let excluded: Vec<&str> = plan
        .args
        .windows(2)
        .filter(|w| w[0] == "--exclude-module")
        .map(|w| w[1].as_str())
        .collect();
    assert!(excluded.contains(&"PyQt5"));
    assert!(excluded.contains(&"IPython"));
    assert!(!excluded.contains(&"tkinter"));

    config.backend = Backend::Nuitka;
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();
    assert!(has(&plan.args, "--nofollow-import-to=PySide6"));
    assert!(!has(&plan.args, "--nofollow-import-to=tkinter"));
}

#[test]
fn test_trimming_keeps_imported_stdlib_entries() {
    let (_dir, mut config) = project("import unittest\n");
    config.trim_imports = true;
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();

    let excluded: Vec<&str> = plan
        .args
        .windows(2)
        .filter(|w| w[0] == "--exclude-module")
        .map(|w| w[1].as_str())
        .collect();
    assert!(!excluded.contains(&"unittest"));
    assert!(excluded.contains(&"pydoc"));
    assert!(excluded.contains(&"tkinter"));
}

#[test]
fn test_no_trimming_unless_enabled() {
    let (_dir, config) = project("print('hi')\n");
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();
    assert!(!has(&plan.args, "--exclude-module"));
}

#[test]
fn test_unparseable_script_uses_fallback_plugins() {
    let (_dir, mut config) = project("def broken(:\n");
    config.backend = Backend::Nuitka;
    config.trim_imports = true;
    let plan = planner().synthesize(&config, &linux_host(None)).unwrap();

    assert!(has(&plan.args, "--enable-plugin=pyqt6"));
    assert!(has(&plan.args, "--enable-plugin=tk-inter"));
    assert!(!plan.args.iter().any(|a| a.starts_with("--nofollow-import-to")));
    assert!(plan.notes.iter().any(|n| n.starts_with("Import scan failed")));
}

#[test]
fn test_missing_script_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = BuildConfiguration::new(dir.path().join("nope.py"), "/usr/bin/python3");
    assert!(matches!(
        planner().synthesize(&config, &linux_host(None)),
        Err(PlanError::ScriptNotFound(_))
    ));
}

#[test]
fn test_missing_icon_rejected() {
    let (dir, mut config) = project("print('hi')\n");
    config.icon = Some(dir.path().join("missing.ico"));
    assert!(matches!(
        planner().synthesize(&config, &linux_host(None)),
        Err(PlanError::InvalidConfig(_))
    ));
}
