//! PyInstaller command grammar.
//!
//! ```text
//! python -m PyInstaller -F <script> --distpath <out> --specpath <out>
//!        --workpath <out>/build_temp --noconfirm [-w] [--icon <ico>]
//!        (--upx-dir <dir> | --noupx) [--exclude-module <m>]...
//! ```
//!
//! PyInstaller has no payload compression of its own, so only the outer
//! (UPX) half of the compression mode matters here. Parallelism is ignored.

use super::{path_arg, script_dir, BuildPlan, EnvironmentOverlay, PlanContext};
use crate::models::Backend;
use crate::toolchain::HostPlatform;

/// Work directory name inside the output directory.
pub const WORK_DIR_NAME: &str = "build_temp";

pub(crate) fn plan(ctx: &PlanContext<'_>) -> BuildPlan {
    let config = ctx.config;
    let out = &config.output_dir;
    let mut notes = Vec::new();

    let mut args: Vec<String> = vec![
        "-m".into(),
        "PyInstaller".into(),
        "-F".into(),
        path_arg(&config.script),
        "--distpath".into(),
        path_arg(out),
        "--specpath".into(),
        path_arg(out),
        "--workpath".into(),
        path_arg(&out.join(WORK_DIR_NAME)),
        "--noconfirm".into(),
    ];

    if !config.console {
        args.push("-w".into());
    }

    if let Some(ref icon) = config.icon {
        args.push("--icon".into());
        args.push(path_arg(icon));
    }

    match (config.compression.wants_upx(), ctx.toolchain.upx_dir.as_ref()) {
        (true, Some(upx_dir)) => {
            args.push("--upx-dir".into());
            args.push(path_arg(upx_dir));
        }
        (true, None) => {
            notes.push("UPX not found; building without outer compression".to_string());
            args.push("--noupx".into());
        }
        (false, _) => args.push("--noupx".into()),
    }

    for module in ctx.trimmed_modules() {
        args.push("--exclude-module".into());
        args.push(module);
    }

    let artifact_name = if ctx.toolchain.platform == HostPlatform::Windows {
        format!("{}.exe", config.script_stem())
    } else {
        config.script_stem()
    };

    BuildPlan {
        backend: Backend::PyInstaller,
        program: config.interpreter.clone(),
        args,
        working_dir: script_dir(&config.script),
        env: EnvironmentOverlay::default(),
        output_dir: out.clone(),
        intermediates: vec![WORK_DIR_NAME.to_string(), "*.spec".to_string()],
        expected_artifact: out.join(artifact_name),
        notes,
    }
}
