//! Nuitka command grammar.
//!
//! ```text
//! python -m nuitka --standalone --onefile <plugins> --assume-yes-for-downloads
//!        --remove-output --output-dir=<out> --jobs=<n> [compiler] [console]
//!        [icon] <compression> [--nofollow-import-to=<m>]... <script>
//! ```

use super::{path_arg, script_dir, BuildPlan, EnvironmentOverlay, PlanContext};
use crate::config::tables::LookupTables;
use crate::models::{Backend, CompilerPreference};
use crate::toolchain::{HostPlatform, ToolchainKind, ToolchainOrigin};

/// Qt bindings in the order a plugin is chosen when several are imported.
const QT_PRIORITY: [&str; 4] = ["PyQt6", "PySide6", "PyQt5", "PySide2"];
const QT_PLUGIN_SET: &str = "sensible,styles,platforms";

/// Plugin flags used when the import scan is unavailable.
fn fallback_plugin_args() -> Vec<String> {
    vec![
        "--enable-plugin=pyqt6".into(),
        format!("--include-qt-plugins={}", QT_PLUGIN_SET),
        "--include-package=PyQt6".into(),
        "--enable-plugin=tk-inter".into(),
    ]
}

fn plugin_args(ctx: &PlanContext<'_>, tables: &LookupTables) -> Vec<String> {
    let Some(imports) = ctx.imports else {
        return fallback_plugin_args();
    };

    let mut args = Vec::new();
    if let Some(qt) = QT_PRIORITY.iter().find(|qt| imports.contains(**qt)) {
        if let Some(plugin) = tables.gui_plugin_for(qt) {
            args.push(format!("--enable-plugin={}", plugin));
            args.push(format!("--include-qt-plugins={}", QT_PLUGIN_SET));
            args.push(format!("--include-package={}", qt));
        }
    }
    if imports.contains("tkinter") {
        if let Some(plugin) = tables.gui_plugin_for("tkinter") {
            args.push(format!("--enable-plugin={}", plugin));
        }
    }
    args
}

/// Compiler selection flag, plus the directory to put on PATH for it.
fn compiler_args(
    ctx: &PlanContext<'_>,
    overlay: &mut EnvironmentOverlay,
    notes: &mut Vec<String>,
) -> Vec<String> {
    let preference = ctx.config.compiler;
    let platform = ctx.toolchain.platform;

    match ctx.toolchain.select(preference) {
        Some(found) => {
            if matches!(found.origin, ToolchainOrigin::Bundled | ToolchainOrigin::SystemPath) {
                if let Some(ref dir) = found.bin_dir {
                    overlay.prepend_path(dir);
                }
            }
            match found.kind {
                ToolchainKind::MinGw64 if platform == HostPlatform::Windows => vec!["--mingw64".into()],
                ToolchainKind::MinGw64 | ToolchainKind::Gcc => Vec::new(),
                ToolchainKind::Clang => vec!["--clang".into()],
                ToolchainKind::Msvc => vec!["--msvc=latest".into()],
            }
        }
        None => {
            notes.push(format!(
                "No {} compiler detected; Nuitka will try to provide one",
                preference
            ));
            match preference {
                CompilerPreference::Msvc => vec!["--msvc=latest".into()],
                CompilerPreference::Clang => vec!["--clang".into()],
                CompilerPreference::MinGw64 | CompilerPreference::Auto
                    if platform == HostPlatform::Windows =>
                {
                    vec!["--mingw64".into()]
                }
                _ => Vec::new(),
            }
        }
    }
}

pub(crate) fn plan(ctx: &PlanContext<'_>, tables: &LookupTables) -> BuildPlan {
    let config = ctx.config;
    let platform = ctx.toolchain.platform;
    let out = &config.output_dir;
    let mut notes = Vec::new();
    let mut env = EnvironmentOverlay::default();

    let mut args: Vec<String> = vec![
        "-m".into(),
        "nuitka".into(),
        "--standalone".into(),
        "--onefile".into(),
    ];
    args.extend(plugin_args(ctx, tables));
    args.push("--assume-yes-for-downloads".into());
    args.push("--remove-output".into());
    args.push(format!("--output-dir={}", path_arg(out)));
    args.push(format!("--jobs={}", config.jobs));
    args.extend(compiler_args(ctx, &mut env, &mut notes));

    if !config.console && platform == HostPlatform::Windows {
        args.push("--windows-console-mode=disable".into());
    }

    if let Some(ref icon) = config.icon {
        let flag = match platform {
            HostPlatform::Windows => "--windows-icon-from-ico",
            HostPlatform::MacOs => "--macos-app-icon",
            _ => "--linux-icon",
        };
        args.push(format!("{}={}", flag, path_arg(icon)));
    }

    if !config.compression.wants_inner() {
        args.push("--onefile-no-compression".into());
    }
    match (config.compression.wants_upx(), ctx.toolchain.upx_dir.as_ref()) {
        (true, Some(upx_dir)) => {
            args.push("--enable-plugin=upx".into());
            env.prepend_path(upx_dir);
        }
        (true, None) => {
            notes.push("UPX not found; building without outer compression".to_string());
            args.push("--disable-plugin=upx".into());
        }
        (false, _) => args.push("--disable-plugin=upx".into()),
    }

    for module in ctx.trimmed_modules() {
        args.push(format!("--nofollow-import-to={}", module));
    }

    args.push(path_arg(&config.script));

    let artifact_name = match platform {
        HostPlatform::Windows => format!("{}.exe", config.script_stem()),
        _ => format!("{}.bin", config.script_stem()),
    };

    BuildPlan {
        backend: Backend::Nuitka,
        program: config.interpreter.clone(),
        args,
        working_dir: script_dir(&config.script),
        env,
        output_dir: out.clone(),
        intermediates: vec![
            "*.build".to_string(),
            "*.dist".to_string(),
            "*.onefile-build".to_string(),
        ],
        expected_artifact: out.join(artifact_name),
        notes,
    }
}
