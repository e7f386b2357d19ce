//! Command line front end.
//!
//! `build` runs the full pipeline, `check-deps` reports (and optionally
//! installs) missing packages, `detect` prints the toolchain report and
//! `plan` prints the backend command a build would run.

use crate::config::PackerSettings;
use crate::error::AppError;
use crate::models::{Backend, BuildConfiguration, CompilerPreference, CompressionMode, Dependency};
use crate::orchestrator::{
    format_elapsed, BuildEvent, BuildOrchestrator, BuildOutcome, DependencyDecision, InstallReport,
};
use crate::plan::BuildPlanner;
use crate::system::interpreter::resolve_interpreter;
use crate::toolchain::ToolchainDetector;
use crate::deps::DependencyAnalyzer;
use crate::config::tables::LookupTables;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Package a Python script into a standalone executable
#[derive(Parser, Debug)]
#[command(
    name = "packer-pro",
    version,
    about = "Package a Python script into a standalone executable",
    long_about = "Drives PyInstaller or Nuitka to turn a Python script into a native executable.

Third-party imports are checked against the target interpreter first and can be
installed before the build starts.

Usage:
  packer-pro build app.py --backend nuitka --compression inner
  packer-pro check-deps app.py --install
  packer-pro plan app.py --backend pyinstaller --no-console
  packer-pro detect --json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Extra lookup tables (TOML) merged over the built-in ones
    #[arg(long, global = true, value_name = "FILE")]
    pub tables: Option<PathBuf>,

    /// Bundled tools root (MinGW, UPX)
    #[arg(long, global = true, value_name = "DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Also write debug records to the log
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check dependencies, then build the executable
    Build(BuildArgs),
    /// Report third-party imports that are not installed
    CheckDeps(CheckArgs),
    /// Print the detected compilers and UPX
    Detect {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the backend command without running it
    Plan(BuildArgs),
}

/// What to do when missing packages are found.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallPolicy {
    /// Prompt on the terminal
    Ask,
    /// Install everything that is missing
    All,
    /// Build without installing
    None,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Script to package
    pub script: PathBuf,

    /// Output directory (default: dist_output next to the script)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Python interpreter (default: venv next to the script, then PATH)
    #[arg(long, value_name = "PATH")]
    pub python: Option<PathBuf>,

    /// Icon file for the executable
    #[arg(long, value_name = "FILE")]
    pub icon: Option<PathBuf>,

    /// pyinstaller or nuitka
    #[arg(short, long)]
    pub backend: Option<Backend>,

    /// double, inner, outer or none (or 0-3)
    #[arg(short, long)]
    pub compression: Option<CompressionMode>,

    /// auto, mingw64, msvc or clang
    #[arg(long)]
    pub compiler: Option<CompilerPreference>,

    /// Hide the console window of the produced executable
    #[arg(long)]
    pub no_console: bool,

    /// Parallel compilation jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Exclude heavy optional modules the script does not import
    #[arg(long)]
    pub trim: bool,

    /// Skip the automatic dependency check
    #[arg(long)]
    pub skip_dependency_check: bool,

    /// Package index mirror for installs
    #[arg(long, value_name = "URL")]
    pub index_url: Option<String>,

    #[arg(long, value_enum, default_value_t = InstallPolicy::Ask)]
    pub install: InstallPolicy,
}

impl BuildArgs {
    /// Build configuration from persisted settings overlaid with these flags.
    pub fn to_configuration(&self, settings: &PackerSettings) -> Result<BuildConfiguration, AppError> {
        let interpreter = resolve_interpreter(&self.script, self.python.as_deref()).ok_or_else(|| {
            AppError::InvalidInput(
                "No Python interpreter found; pass --python or create a venv next to the script"
                    .to_string(),
            )
        })?;

        let mut config = BuildConfiguration::new(&self.script, interpreter);
        settings.apply_to(&mut config);

        if let Some(ref output) = self.output {
            config.output_dir = output.clone();
        }
        config.icon = self.icon.clone();
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(compression) = self.compression {
            config.compression = compression;
        }
        if let Some(compiler) = self.compiler {
            config.compiler = compiler;
        }
        if self.no_console {
            config.console = false;
        }
        if let Some(jobs) = self.jobs {
            if jobs == 0 {
                return Err(AppError::InvalidInput("--jobs must be at least 1".to_string()));
            }
            config.jobs = jobs;
        }
        if self.trim {
            config.trim_imports = true;
        }
        if self.skip_dependency_check {
            config.auto_check_dependencies = false;
        }
        if self.index_url.is_some() {
            config.index_url = self.index_url.clone();
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    pub script: PathBuf,

    #[arg(long, value_name = "PATH")]
    pub python: Option<PathBuf>,

    /// Install whatever is missing
    #[arg(long)]
    pub install: bool,

    #[arg(long, value_name = "URL")]
    pub index_url: Option<String>,
}

/// Run one command. `Ok(false)` means it ran but did not succeed.
pub async fn execute(
    command: Command,
    settings: &PackerSettings,
    tables: Arc<LookupTables>,
    detector: ToolchainDetector,
    orchestrator: BuildOrchestrator,
) -> Result<bool, AppError> {
    match command {
        Command::Build(args) => {
            let config = args.to_configuration(settings)?;
            run_build(&orchestrator, config, args.install).await
        }
        Command::CheckDeps(args) => run_check(&orchestrator, &args, settings).await,
        Command::Detect { json } => {
            run_detect(&detector, json).await?;
            Ok(true)
        }
        Command::Plan(args) => {
            let config = args.to_configuration(settings)?;
            run_plan(tables, &detector, &config).await?;
            Ok(true)
        }
    }
}

async fn run_build(
    orchestrator: &BuildOrchestrator,
    config: BuildConfiguration,
    policy: InstallPolicy,
) -> Result<bool, AppError> {
    let mut session = orchestrator.run(config).await?;

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            cancel.cancel();
        }
    });

    while let Some(event) = session.next_event().await {
        match event {
            BuildEvent::Output(line) => println!("{}", line),
            BuildEvent::Log(message) => println!(">> {}", message),
            BuildEvent::Milestone(m) => println!("[{:>3}%] {}", m.percent, m.label),
            BuildEvent::CheckProgress {
                current,
                total,
                module,
            } => println!(">> Checking {} ({}/{})", module, current, total),
            BuildEvent::InstallProgress {
                current,
                total,
                package,
            } => println!(">> Installing {} ({}/{})", package, current, total),
            BuildEvent::MissingDependencies(missing) => {
                let decision = match policy {
                    InstallPolicy::All => DependencyDecision::InstallAll,
                    InstallPolicy::None => DependencyDecision::Proceed,
                    InstallPolicy::Ask => prompt_missing(missing).await,
                };
                session.decide(decision).await;
            }
            BuildEvent::InstallFailed(report) => {
                let decision = match policy {
                    InstallPolicy::Ask => prompt_after_failure(report).await,
                    _ => DependencyDecision::Proceed,
                };
                session.decide(decision).await;
            }
            BuildEvent::PhaseChanged(phase) => log::debug!("[Cli] Phase: {}", phase),
            BuildEvent::Finished { outcome, elapsed } => {
                let took = format_elapsed(elapsed);
                match outcome {
                    BuildOutcome::Succeeded { ref artifact } => {
                        println!("Build succeeded in {}: {}", took, artifact.display())
                    }
                    BuildOutcome::Cancelled => println!("Build cancelled after {}", took),
                    BuildOutcome::Failed(ref reason) => {
                        println!("Build failed after {}: {}", took, reason)
                    }
                }
            }
        }
    }

    Ok(session.wait().await.is_success())
}

/// Read one line from stdin without blocking the runtime.
///
/// `None` when stdin is closed or unreadable.
async fn read_answer(prompt: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => {
                println!();
                log::warn!("[Cli] stdin closed while waiting for an answer");
                None
            }
            Ok(_) => Some(line),
            Err(e) => {
                log::warn!("[Cli] Cannot read answer: {}", e);
                None
            }
        }
    })
    .await
    .unwrap_or(None)
}

async fn prompt_missing(missing: Vec<Dependency>) -> DependencyDecision {
    println!("Missing packages:");
    for (idx, dep) in missing.iter().enumerate() {
        println!("  {}. {} (import {})", idx + 1, dep.package, dep.module);
    }
    let answer = read_answer(
        "Install [a]ll, [n]one and build anyway, [q]uit, or list numbers/names: ".to_string(),
    )
    .await;
    parse_decision(answer.as_deref(), &missing)
}

async fn prompt_after_failure(report: InstallReport) -> DependencyDecision {
    println!("Failed to install: {}", report.failed.join(", "));
    let answer = read_answer("Continue building anyway? [y/N]: ".to_string())
        .await
        .unwrap_or_default();
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => DependencyDecision::Proceed,
        _ => DependencyDecision::Abort,
    }
}

/// Interpret an answer to the missing-packages prompt.
///
/// A bare Enter installs everything; a closed stdin (`None`) aborts.
pub fn parse_decision(answer: Option<&str>, missing: &[Dependency]) -> DependencyDecision {
    let Some(answer) = answer.map(str::trim) else {
        return DependencyDecision::Abort;
    };
    match answer.to_lowercase().as_str() {
        "" | "a" | "all" => return DependencyDecision::InstallAll,
        "n" | "none" => return DependencyDecision::Proceed,
        "q" | "quit" | "abort" => return DependencyDecision::Abort,
        _ => {}
    }

    let selection: Vec<String> = answer
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|token| match token.parse::<usize>() {
            Ok(n) if n >= 1 && n <= missing.len() => missing[n - 1].module.clone(),
            _ => token.to_string(),
        })
        .collect();
    DependencyDecision::InstallSubset(selection)
}

async fn run_check(
    orchestrator: &BuildOrchestrator,
    args: &CheckArgs,
    settings: &PackerSettings,
) -> Result<bool, AppError> {
    let interpreter = resolve_interpreter(&args.script, args.python.as_deref())
        .ok_or_else(|| AppError::InvalidInput("No Python interpreter found".to_string()))?;

    let report = orchestrator
        .check_dependencies(&args.script, &interpreter)
        .await?;
    for dep in &report.dependencies {
        println!("{:<24} {:<24} {:?}", dep.module, dep.package, dep.status);
    }

    let missing: Vec<String> = report.missing().into_iter().map(|d| d.module).collect();
    if missing.is_empty() {
        println!("All third-party imports are installed");
        return Ok(true);
    }
    if !args.install {
        println!("{} package(s) missing", missing.len());
        return Ok(false);
    }

    let index_url = args.index_url.clone().or_else(|| settings.index_url.clone());
    let installed = orchestrator
        .install_dependencies(&interpreter, &missing, index_url)
        .await?;
    println!("{}", installed.summary());
    Ok(installed.all_installed())
}

async fn run_detect(detector: &ToolchainDetector, json: bool) -> Result<(), AppError> {
    let descriptor = detector.detect().await;
    if json {
        let text = serde_json::to_string_pretty(&descriptor)
            .map_err(|e| AppError::Io(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Platform:   {:?}", descriptor.platform);
    println!("Tools root: {}", detector.tools_root().display());
    if descriptor.compilers.is_empty() {
        println!("Compilers:  none detected");
    }
    for compiler in &descriptor.compilers {
        println!(
            "Compiler:   {} ({:?}) at {}",
            compiler.kind,
            compiler.origin,
            compiler.location().display()
        );
    }
    match descriptor.upx_dir {
        Some(ref dir) => println!("UPX:        {}", dir.display()),
        None => println!("UPX:        not found"),
    }
    Ok(())
}

async fn run_plan(
    tables: Arc<LookupTables>,
    detector: &ToolchainDetector,
    config: &BuildConfiguration,
) -> Result<(), AppError> {
    let toolchain = detector.detect().await;
    let plan = BuildPlanner::new(DependencyAnalyzer::new(tables))
        .synthesize(config, &toolchain)
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    println!("{}", plan.command_line());
    println!("  working dir: {}", plan.working_dir.display());
    for dir in &plan.env.path_prepend {
        println!("  PATH += {}", dir.display());
    }
    println!("  artifact:    {}", plan.expected_artifact.display());
    for note in &plan.notes {
        println!("  note: {}", note);
    }
    Ok(())
}

/// Resolve the tools root: command line, then settings, then environment.
pub fn detector_for(cli_dir: Option<&Path>, settings: &PackerSettings) -> ToolchainDetector {
    match cli_dir.or(settings.tools_dir.as_deref()) {
        Some(dir) => ToolchainDetector::new(dir),
        None => ToolchainDetector::from_env(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DependencyStatus;

    fn missing() -> Vec<Dependency> {
        vec![
            Dependency {
                module: "PIL".to_string(),
                package: "Pillow".to_string(),
                status: DependencyStatus::Missing,
            },
            Dependency {
                module: "yaml".to_string(),
                package: "PyYAML".to_string(),
                status: DependencyStatus::Missing,
            },
        ]
    }

    #[test]
    fn test_parse_decision_keywords() {
        assert_eq!(parse_decision(Some("\n"), &missing()), DependencyDecision::InstallAll);
        assert_eq!(parse_decision(Some("None"), &missing()), DependencyDecision::Proceed);
        assert_eq!(parse_decision(Some("q"), &missing()), DependencyDecision::Abort);
    }

    #[test]
    fn test_closed_stdin_aborts_instead_of_installing() {
        assert_eq!(parse_decision(None, &missing()), DependencyDecision::Abort);
        assert_eq!(parse_decision(Some(""), &missing()), DependencyDecision::InstallAll);
    }

    #[test]
    fn test_parse_decision_subset() {
        assert_eq!(
            parse_decision(Some("2, numpy"), &missing()),
            DependencyDecision::InstallSubset(vec!["yaml".to_string(), "numpy".to_string()])
        );
        assert_eq!(
            parse_decision(Some("7"), &missing()),
            DependencyDecision::InstallSubset(vec!["7".to_string()])
        );
    }

    #[test]
    fn test_cli_parses_build_flags() {
        let cli = Cli::try_parse_from([
            "packer-pro",
            "build",
            "app.py",
            "--backend",
            "nuitka",
            "--compression",
            "none",
            "--jobs",
            "4",
            "--install",
            "all",
            "--no-console",
        ])
        .unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.backend, Some(Backend::Nuitka));
                assert_eq!(args.compression, Some(CompressionMode::None));
                assert_eq!(args.jobs, Some(4));
                assert_eq!(args.install, InstallPolicy::All);
                assert!(args.no_console);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_settings() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.py");
        std::fs::write(&script, "print('hi')\n").unwrap();

        let args = BuildArgs {
            script: script.clone(),
            output: None,
            python: Some(PathBuf::from("/opt/python/bin/python3")),
            icon: None,
            backend: Some(Backend::Nuitka),
            compression: None,
            compiler: None,
            no_console: true,
            jobs: Some(2),
            trim: false,
            skip_dependency_check: true,
            index_url: None,
            install: InstallPolicy::Ask,
        };
        let settings = PackerSettings {
            compression: CompressionMode::OuterOnly,
            index_url: Some("https://mirror.example/simple".to_string()),
            ..PackerSettings::default()
        };

        let config = args.to_configuration(&settings).unwrap();
        assert_eq!(config.interpreter, PathBuf::from("/opt/python/bin/python3"));
        assert_eq!(config.backend, Backend::Nuitka);
        assert_eq!(config.compression, CompressionMode::OuterOnly);
        assert_eq!(config.jobs, 2);
        assert!(!config.console);
        assert!(!config.auto_check_dependencies);
        assert_eq!(config.index_url.as_deref(), Some("https://mirror.example/simple"));
        assert_eq!(config.output_dir, dir.path().join("dist_output"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let args = BuildArgs {
            script: PathBuf::from("app.py"),
            output: None,
            python: Some(PathBuf::from("python3")),
            icon: None,
            backend: None,
            compression: None,
            compiler: None,
            no_console: false,
            jobs: Some(0),
            trim: false,
            skip_dependency_check: false,
            index_url: None,
            install: InstallPolicy::Ask,
        };
        assert!(matches!(
            args.to_configuration(&PackerSettings::default()),
            Err(AppError::InvalidInput(_))
        ));
    }
}
