//! Dependency check and install workers.
//!
//! Each worker runs on its own task with a detached copy of the resolver,
//! streams progress over an unbounded channel and hands its result back
//! through its `JoinHandle`, so the result is delivered exactly once.

use crate::deps::{DependencyAnalyzer, InstalledPackageCache, PackageResolver};
use crate::models::Dependency;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

/// Progress reported while a worker runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerProgress {
    Checking {
        current: usize,
        total: usize,
        module: String,
    },
    Installing {
        current: usize,
        total: usize,
        package: String,
    },
    /// Installer output or a recovered warning
    Output(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome<T> {
    Finished(T),
    Cancelled,
}

/// Result of one dependency check.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub dependencies: Vec<Dependency>,
    /// Interpreter the check ran against
    pub interpreter: PathBuf,
    /// Package cache built during the check, for the coordinator to adopt
    pub cache: Option<InstalledPackageCache>,
}

impl CheckReport {
    pub fn missing(&self) -> Vec<Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.status.is_missing())
            .cloned()
            .collect()
    }
}

/// Result of one install batch. Package order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub total: usize,
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

impl InstallReport {
    pub fn all_installed(&self) -> bool {
        self.failed.is_empty()
    }

    /// `installed N/M, failed: a, b`
    pub fn summary(&self) -> String {
        let failed = if self.failed.is_empty() {
            "none".to_string()
        } else {
            self.failed.join(", ")
        };
        format!(
            "installed {}/{}, failed: {}",
            self.installed.len(),
            self.total,
            failed
        )
    }
}

/// Resolves once the cancel flag is set. Never resolves if the flag's sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|set| *set).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Scan the script's imports and probe each one against the interpreter.
pub async fn run_check(
    analyzer: DependencyAnalyzer,
    mut resolver: PackageResolver,
    script: PathBuf,
    progress: mpsc::UnboundedSender<WorkerProgress>,
    mut cancel: watch::Receiver<bool>,
) -> WorkerOutcome<CheckReport> {
    // Results must reflect the environment as it is now.
    resolver.invalidate();

    let modules = match analyzer.analyze(&script) {
        Ok(modules) => modules,
        Err(e) => {
            let _ = progress.send(WorkerProgress::Output(format!(
                "Warning: import scan of {} failed: {}",
                script.display(),
                e
            )));
            Vec::new()
        }
    };

    let total = modules.len();
    let mut dependencies = Vec::with_capacity(total);
    for (idx, module) in modules.into_iter().enumerate() {
        if *cancel.borrow() {
            return WorkerOutcome::Cancelled;
        }
        let _ = progress.send(WorkerProgress::Checking {
            current: idx + 1,
            total,
            module: module.clone(),
        });

        let status = tokio::select! {
            status = resolver.is_installed(&module) => status,
            _ = cancelled(&mut cancel) => return WorkerOutcome::Cancelled,
        };
        dependencies.push(Dependency {
            package: resolver.package_for(&module),
            module,
            status,
        });
    }

    WorkerOutcome::Finished(CheckReport {
        dependencies,
        interpreter: resolver.interpreter().to_path_buf(),
        cache: resolver.cache().cloned(),
    })
}

/// Install the packages for `modules` one at a time, in order.
///
/// A failed package does not stop the batch. Cancellation drops the running
/// installer, which kills it.
pub async fn run_install(
    mut resolver: PackageResolver,
    modules: Vec<String>,
    progress: mpsc::UnboundedSender<WorkerProgress>,
    mut cancel: watch::Receiver<bool>,
) -> WorkerOutcome<InstallReport> {
    let mut report = InstallReport {
        total: modules.len(),
        ..InstallReport::default()
    };

    for (idx, module) in modules.iter().enumerate() {
        if *cancel.borrow() {
            return WorkerOutcome::Cancelled;
        }
        let package = resolver.package_for(module);
        let _ = progress.send(WorkerProgress::Installing {
            current: idx + 1,
            total: report.total,
            package: package.clone(),
        });

        let sink = progress.clone();
        let result = tokio::select! {
            result = resolver.install(module, move |line| {
                let _ = sink.send(WorkerProgress::Output(line));
            }) => result,
            _ = cancelled(&mut cancel) => return WorkerOutcome::Cancelled,
        };

        match result {
            Ok(()) => report.installed.push(package),
            Err(e) => {
                let _ = progress.send(WorkerProgress::Output(e.to_string()));
                report.failed.push(package);
            }
        }
    }

    WorkerOutcome::Finished(report)
}
