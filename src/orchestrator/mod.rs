//! Build orchestration: dependency check -> optional install -> build -> cleanup.
//!
//! `BuildOrchestrator::run` spawns one coordinating task per build request and
//! hands back a [`BuildSession`]: an event stream, a decision channel for the
//! missing-dependency prompt and a cancel handle. The coordinator is the only
//! owner of the phase state, the package cache and the supervised process;
//! the check and install workers report to it over channels.

pub mod executor;
pub mod state;
pub mod workers;

pub use executor::{
    parse_build_milestone, purge_intermediates, BuildMilestone, ProcessSupervisor,
    SupervisorEvent, SupervisorState,
};
pub use state::{format_elapsed, BuildOutcome, BuildPhaseState, OrchestrationState};
pub use workers::{CheckReport, InstallReport, WorkerOutcome, WorkerProgress};

use crate::config::tables::LookupTables;
use crate::deps::{normalize_package_name, DependencyAnalyzer, PackageResolver, CHECK_TIMEOUT, INSTALL_TIMEOUT};
use crate::error::{BuildError, OrchestratorError, PlanError};
use crate::log_collector::LogCollector;
use crate::models::{BuildConfiguration, Dependency};
use crate::plan::BuildPlanner;
use crate::system::interpreter::{probe_import, probe_stdlib_names, python_version};
use crate::toolchain::ToolchainDetector;
use log::Level;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 256;

/// Everything a caller observes during one build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    PhaseChanged(BuildPhaseState),
    /// Status line from the orchestrator itself
    Log(String),
    /// Raw backend or installer output, in process order
    Output(String),
    Milestone(BuildMilestone),
    CheckProgress {
        current: usize,
        total: usize,
        module: String,
    },
    /// The coordinator now waits for a [`DependencyDecision`]
    MissingDependencies(Vec<Dependency>),
    InstallProgress {
        current: usize,
        total: usize,
        package: String,
    },
    /// Some installs failed; the coordinator waits for `Proceed` or `Abort`
    InstallFailed(InstallReport),
    /// Sent exactly once, last
    Finished {
        outcome: BuildOutcome,
        elapsed: Duration,
    },
}

/// Caller's answer to a missing-dependency or failed-install prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyDecision {
    InstallAll,
    /// Module or package names to install; the rest are skipped
    InstallSubset(Vec<String>),
    /// Build without installing anything more
    Proceed,
    Abort,
}

/// Cloneable handle that cancels one build request.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Request cancellation. Repeated calls have no further effect.
    pub fn cancel(&self) {
        if !self.0.send_replace(true) {
            log::info!("[Orchestrator] Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Caller side of one running build request.
pub struct BuildSession {
    events: mpsc::Receiver<BuildEvent>,
    decisions: mpsc::Sender<DependencyDecision>,
    cancel: CancelHandle,
    handle: JoinHandle<BuildOutcome>,
}

impl BuildSession {
    /// Next event, `None` once the coordinator has finished.
    pub async fn next_event(&mut self) -> Option<BuildEvent> {
        self.events.recv().await
    }

    /// Answer the pending prompt. Returns `false` if the build already ended.
    pub async fn decide(&self, decision: DependencyDecision) -> bool {
        self.decisions.send(decision).await.is_ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the outcome, discarding remaining events. Pending prompts are
    /// answered with `Abort`.
    pub async fn wait(self) -> BuildOutcome {
        let BuildSession {
            mut events,
            decisions,
            mut handle,
            ..
        } = self;
        drop(decisions);

        loop {
            tokio::select! {
                Some(_) = events.recv() => {}
                joined = &mut handle => {
                    return joined.unwrap_or_else(|e| {
                        BuildOutcome::Failed(format!("Build coordinator stopped unexpectedly: {}", e))
                    });
                }
            }
        }
    }
}

/// Releases the single worker slot when dropped.
struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Entry point for builds and standalone dependency checks.
#[derive(Clone)]
pub struct BuildOrchestrator {
    tables: Arc<LookupTables>,
    detector: ToolchainDetector,
    state: Arc<RwLock<OrchestrationState>>,
    busy: Arc<AtomicBool>,
    log_collector: Option<Arc<LogCollector>>,
    query_timeout: Duration,
    install_timeout: Duration,
}

impl BuildOrchestrator {
    pub fn new(tables: Arc<LookupTables>, detector: ToolchainDetector) -> Self {
        BuildOrchestrator {
            tables,
            detector,
            state: Arc::new(RwLock::new(OrchestrationState::new())),
            busy: Arc::new(AtomicBool::new(false)),
            log_collector: None,
            query_timeout: CHECK_TIMEOUT,
            install_timeout: INSTALL_TIMEOUT,
        }
    }

    /// Dual-write raw process output to this collector's full log.
    pub fn with_log_collector(mut self, collector: Arc<LogCollector>) -> Self {
        self.log_collector = Some(collector);
        self
    }

    pub fn with_timeouts(mut self, query: Duration, install: Duration) -> Self {
        self.query_timeout = query;
        self.install_timeout = install;
        self
    }

    /// Get the current phase of the latest build request.
    pub async fn current_phase(&self) -> BuildPhaseState {
        self.state.read().await.phase
    }

    /// Snapshot of the latest build request's state.
    pub async fn snapshot(&self) -> OrchestrationState {
        self.state.read().await.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<SlotGuard, OrchestratorError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| SlotGuard(Arc::clone(&self.busy)))
            .map_err(|_| OrchestratorError::Busy)
    }

    fn resolver_for(&self, interpreter: &Path, index_url: Option<String>) -> PackageResolver {
        PackageResolver::new(interpreter, Arc::clone(&self.tables))
            .with_timeouts(self.query_timeout, self.install_timeout)
            .with_index_url(index_url)
    }

    /// Start a build request. Rejected with `Busy` while another request,
    /// check or install is in flight.
    pub async fn run(&self, config: BuildConfiguration) -> Result<BuildSession, OrchestratorError> {
        let slot = self.claim()?;
        *self.state.write().await = OrchestrationState::new();

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (decisions_tx, decisions_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let coordinator = Coordinator {
            resolver: self.resolver_for(&config.interpreter, config.index_url.clone()),
            config,
            tables: Arc::clone(&self.tables),
            detector: self.detector.clone(),
            state: Arc::clone(&self.state),
            events: events_tx,
            decisions: decisions_rx,
            cancel: cancel_rx,
            log_collector: self.log_collector.clone(),
            query_timeout: self.query_timeout,
            _slot: slot,
        };
        let handle = tokio::spawn(coordinator.run());

        Ok(BuildSession {
            events: events_rx,
            decisions: decisions_tx,
            cancel: CancelHandle(Arc::new(cancel_tx)),
            handle,
        })
    }

    /// Report third-party imports of `script` and whether each is installed
    /// for `interpreter`, without building.
    pub async fn check_dependencies(
        &self,
        script: &Path,
        interpreter: &Path,
    ) -> Result<CheckReport, OrchestratorError> {
        let _slot = self.claim()?;
        if !script.is_file() {
            return Err(PlanError::ScriptNotFound(script.to_path_buf()).into());
        }

        let analyzer = analyzer_for(&self.tables, interpreter, self.query_timeout).await;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let worker = workers::run_check(
            analyzer,
            self.resolver_for(interpreter, None),
            script.to_path_buf(),
            progress_tx,
            cancel_rx,
        );
        let (outcome, ()) = tokio::join!(worker, async {
            while let Some(progress) = progress_rx.recv().await {
                log_progress(&progress);
            }
        });

        match outcome {
            WorkerOutcome::Finished(report) => {
                log::info!(
                    "[Deps] {} third-party import(s), {} missing",
                    report.dependencies.len(),
                    report.missing().len()
                );
                Ok(report)
            }
            WorkerOutcome::Cancelled => Err(OrchestratorError::Aborted(
                "dependency check cancelled".to_string(),
            )),
        }
    }

    /// Install the packages providing `modules`, in order.
    pub async fn install_dependencies(
        &self,
        interpreter: &Path,
        modules: &[String],
        index_url: Option<String>,
    ) -> Result<InstallReport, OrchestratorError> {
        let _slot = self.claim()?;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let worker = workers::run_install(
            self.resolver_for(interpreter, index_url),
            modules.to_vec(),
            progress_tx,
            cancel_rx,
        );
        let (outcome, ()) = tokio::join!(worker, async {
            while let Some(progress) = progress_rx.recv().await {
                log_progress(&progress);
            }
        });

        match outcome {
            WorkerOutcome::Finished(report) => {
                crate::log_parsed!("[Deps] {}", report.summary());
                Ok(report)
            }
            WorkerOutcome::Cancelled => Err(OrchestratorError::Aborted(
                "dependency installation cancelled".to_string(),
            )),
        }
    }
}

/// Analyzer whose stdlib set is extended with what `interpreter` reports.
async fn analyzer_for(
    tables: &Arc<LookupTables>,
    interpreter: &Path,
    timeout: Duration,
) -> DependencyAnalyzer {
    match probe_stdlib_names(interpreter, timeout).await {
        Ok(names) if !names.is_empty() => {
            DependencyAnalyzer::new(Arc::new(tables.with_stdlib_names(names)))
        }
        Ok(_) => DependencyAnalyzer::new(Arc::clone(tables)),
        Err(e) => {
            log::debug!("[Deps] Interpreter stdlib probe failed, using built-in list: {}", e);
            DependencyAnalyzer::new(Arc::clone(tables))
        }
    }
}

fn log_progress(progress: &WorkerProgress) {
    match progress {
        WorkerProgress::Checking {
            current,
            total,
            module,
        } => log::info!("[Deps] Checking {} ({}/{})", module, current, total),
        WorkerProgress::Installing {
            current,
            total,
            package,
        } => crate::log_parsed!("[Deps] Installing {} ({}/{})", package, current, total),
        WorkerProgress::Output(line) => log::info!("{}", line),
    }
}

/// State owner for one build request. Lives on its own task.
struct Coordinator {
    config: BuildConfiguration,
    tables: Arc<LookupTables>,
    detector: ToolchainDetector,
    state: Arc<RwLock<OrchestrationState>>,
    resolver: PackageResolver,
    events: mpsc::Sender<BuildEvent>,
    decisions: mpsc::Receiver<DependencyDecision>,
    cancel: watch::Receiver<bool>,
    log_collector: Option<Arc<LogCollector>>,
    query_timeout: Duration,
    _slot: SlotGuard,
}

impl Coordinator {
    async fn run(mut self) -> BuildOutcome {
        let outcome = self.execute().await;
        self.finish(outcome).await
    }

    async fn emit(&self, event: BuildEvent) {
        let _ = self.events.send(event).await;
    }

    /// Log a status line and forward it to the caller.
    async fn say(&self, level: Level, message: String) {
        log::log!(level, "[Orchestrator] {}", message);
        self.emit(BuildEvent::Log(message)).await;
    }

    async fn enter(&self, phase: BuildPhaseState) {
        let result = self.state.write().await.transition_to(phase);
        match result {
            Ok(()) => {
                crate::log_parsed!("[Orchestrator] Phase: {}", phase);
                self.emit(BuildEvent::PhaseChanged(phase)).await;
            }
            Err(e) => log::error!("[Orchestrator] {}", e),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn cancelled_during(&self, step: &str) -> BuildOutcome {
        self.say(Level::Warn, format!("Cancelled during {}", step)).await;
        BuildOutcome::Cancelled
    }

    async fn execute(&mut self) -> BuildOutcome {
        let version = python_version(&self.config.interpreter, self.query_timeout).await;
        self.say(
            Level::Info,
            format!(
                "Packaging {} with {} using {} ({})",
                self.config.script.display(),
                self.config.backend,
                self.config.interpreter.display(),
                version
            ),
        )
        .await;

        if self.is_cancelled() {
            return self.cancelled_during("startup").await;
        }

        if self.config.auto_check_dependencies {
            if let Err(outcome) = self.dependency_phase().await {
                return outcome;
            }
        } else {
            self.say(Level::Info, "Automatic dependency check disabled".to_string())
                .await;
        }

        if self.is_cancelled() {
            return self.cancelled_during("dependency handling").await;
        }
        self.build_phase().await
    }

    /// Check, prompt and optionally install. `Err` carries an early outcome.
    async fn dependency_phase(&mut self) -> Result<(), BuildOutcome> {
        self.enter(BuildPhaseState::CheckingDependencies).await;

        let analyzer = analyzer_for(&self.tables, &self.config.interpreter, self.query_timeout).await;
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(workers::run_check(
            analyzer,
            self.resolver.clone(),
            self.config.script.clone(),
            progress_tx,
            self.cancel.clone(),
        ));
        let report = match self.drive(handle, progress_rx).await? {
            WorkerOutcome::Finished(report) => report,
            WorkerOutcome::Cancelled => return Err(self.cancelled_during("dependency check").await),
        };
        self.resolver.invalidate();
        self.resolver.adopt_cache(&report.interpreter, report.cache.clone());

        let missing = report.missing();
        if missing.is_empty() {
            self.say(
                Level::Info,
                format!(
                    "All {} third-party import(s) are installed",
                    report.dependencies.len()
                ),
            )
            .await;
            return Ok(());
        }

        let names: Vec<&str> = missing.iter().map(|d| d.package.as_str()).collect();
        self.say(Level::Warn, format!("Missing packages: {}", names.join(", ")))
            .await;
        self.emit(BuildEvent::MissingDependencies(missing.clone())).await;

        let modules: Vec<String> = match self.await_decision().await? {
            DependencyDecision::InstallAll => missing.iter().map(|d| d.module.clone()).collect(),
            DependencyDecision::InstallSubset(selection) => missing
                .iter()
                .filter(|d| selection.iter().any(|s| selects(s, d)))
                .map(|d| d.module.clone())
                .collect(),
            DependencyDecision::Proceed => Vec::new(),
            DependencyDecision::Abort => {
                self.say(Level::Warn, "Build aborted at the dependency prompt".to_string())
                    .await;
                return Err(BuildOutcome::Cancelled);
            }
        };

        let skipped: Vec<Dependency> = missing
            .into_iter()
            .filter(|d| !modules.contains(&d.module))
            .collect();
        if !skipped.is_empty() {
            self.proceed_without(&skipped).await;
        }
        if modules.is_empty() {
            return Ok(());
        }
        self.install_phase(modules).await
    }

    async fn proceed_without(&self, skipped: &[Dependency]) {
        let names: Vec<String> = skipped.iter().map(|d| d.package.clone()).collect();
        self.say(
            Level::Warn,
            format!("Proceeding without installing: {}", names.join(", ")),
        )
        .await;
        self.state.write().await.skipped_packages.extend(names);
    }

    async fn install_phase(&mut self, modules: Vec<String>) -> Result<(), BuildOutcome> {
        self.enter(BuildPhaseState::InstallingDependencies).await;

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(workers::run_install(
            self.resolver.clone(),
            modules,
            progress_tx,
            self.cancel.clone(),
        ));
        let report = match self.drive(handle, progress_rx).await? {
            WorkerOutcome::Finished(report) => report,
            WorkerOutcome::Cancelled => {
                return Err(self.cancelled_during("dependency installation").await)
            }
        };
        self.resolver.invalidate();

        if report.all_installed() {
            crate::log_parsed!("[Deps] {}", report.summary());
            self.emit(BuildEvent::Log(format!("Dependency install finished: {}", report.summary())))
                .await;
            return Ok(());
        }

        self.say(
            Level::Warn,
            format!("Dependency install finished: {}", report.summary()),
        )
        .await;
        self.state
            .write()
            .await
            .skipped_packages
            .extend(report.failed.iter().cloned());
        self.emit(BuildEvent::InstallFailed(report.clone())).await;

        match self.await_decision().await? {
            DependencyDecision::Abort => {
                let reason = format!(
                    "Dependency installation failed: {}",
                    report.failed.join(", ")
                );
                self.say(Level::Error, reason.clone()).await;
                Err(BuildOutcome::Failed(reason))
            }
            _ => {
                self.say(
                    Level::Warn,
                    format!("Continuing without: {}", report.failed.join(", ")),
                )
                .await;
                Ok(())
            }
        }
    }

    /// Block until the caller answers the pending prompt or cancels.
    async fn await_decision(&mut self) -> Result<DependencyDecision, BuildOutcome> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            decision = self.decisions.recv() => match decision {
                Some(decision) => {
                    log::info!("[Orchestrator] Decision: {:?}", decision);
                    Ok(decision)
                }
                None => {
                    self.say(Level::Warn, "No decision received; aborting".to_string()).await;
                    Ok(DependencyDecision::Abort)
                }
            },
            _ = workers::cancelled(&mut cancel) => {
                Err(self.cancelled_during("the dependency prompt").await)
            }
        }
    }

    /// Forward a worker's progress until it delivers its result.
    async fn drive<T>(
        &self,
        mut handle: JoinHandle<WorkerOutcome<T>>,
        mut progress: mpsc::UnboundedReceiver<WorkerProgress>,
    ) -> Result<WorkerOutcome<T>, BuildOutcome> {
        let joined = loop {
            tokio::select! {
                biased;
                Some(p) = progress.recv() => self.forward(p).await,
                joined = &mut handle => break joined,
            }
        };
        while let Ok(p) = progress.try_recv() {
            self.forward(p).await;
        }

        match joined {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let reason = format!("Dependency worker stopped unexpectedly: {}", e);
                self.say(Level::Error, reason.clone()).await;
                Err(BuildOutcome::Failed(reason))
            }
        }
    }

    async fn forward(&self, progress: WorkerProgress) {
        let event = match progress {
            WorkerProgress::Checking {
                current,
                total,
                module,
            } => {
                log::info!("[Deps] Checking {} ({}/{})", module, current, total);
                BuildEvent::CheckProgress {
                    current,
                    total,
                    module,
                }
            }
            WorkerProgress::Installing {
                current,
                total,
                package,
            } => {
                crate::log_parsed!("[Deps] Installing {} ({}/{})", package, current, total);
                BuildEvent::InstallProgress {
                    current,
                    total,
                    package,
                }
            }
            WorkerProgress::Output(line) => {
                if let Some(ref collector) = self.log_collector {
                    collector.log_str(line.clone());
                }
                BuildEvent::Output(line)
            }
        };
        self.emit(event).await;
    }

    async fn build_phase(&mut self) -> BuildOutcome {
        self.enter(BuildPhaseState::Building).await;

        let module = self.config.backend.module_name();
        let mut cancel = self.cancel.clone();
        let probe = tokio::select! {
            probe = probe_import(&self.config.interpreter, module, self.query_timeout) => probe,
            _ = workers::cancelled(&mut cancel) => return self.cancelled_during("backend check").await,
        };
        let missing_backend = match probe {
            Ok(true) => None,
            Ok(false) => Some(format!(
                "{} is not installed for {}",
                module,
                self.config.interpreter.display()
            )),
            Err(e) => Some(format!("cannot check for {}: {}", module, e)),
        };
        if let Some(reason) = missing_backend {
            let err = BuildError::ProcessLaunch(reason);
            self.say(Level::Error, err.to_string()).await;
            return BuildOutcome::Failed(err.to_string());
        }

        let toolchain = self.detector.detect().await;

        let planner = BuildPlanner::new(DependencyAnalyzer::new(Arc::clone(&self.tables)));
        let plan = match planner.synthesize(&self.config, &toolchain) {
            Ok(plan) => plan,
            Err(e) => {
                let err = OrchestratorError::from(e);
                self.say(Level::Error, err.to_string()).await;
                return BuildOutcome::Failed(err.to_string());
            }
        };
        for note in &plan.notes {
            self.say(Level::Warn, note.clone()).await;
        }
        self.say(Level::Info, format!("Run: {}", plan.command_line()))
            .await;

        if self.is_cancelled() {
            return self.cancelled_during("build preparation").await;
        }

        let mut supervisor = ProcessSupervisor::new();
        if let Err(e) = supervisor.start(&plan) {
            self.say(Level::Error, e.to_string()).await;
            return BuildOutcome::Failed(e.to_string());
        }

        match self.stream_build(&mut supervisor).await {
            SupervisorState::Completed(0) => {
                if plan.expected_artifact.exists() {
                    self.say(
                        Level::Info,
                        format!("Executable written to {}", plan.expected_artifact.display()),
                    )
                    .await;
                } else {
                    self.say(
                        Level::Warn,
                        format!(
                            "Backend reported success but {} was not found",
                            plan.expected_artifact.display()
                        ),
                    )
                    .await;
                }
                BuildOutcome::Succeeded {
                    artifact: plan.expected_artifact.clone(),
                }
            }
            SupervisorState::Terminated => {
                self.say(
                    Level::Warn,
                    "Build process terminated; partial artifacts removed".to_string(),
                )
                .await;
                BuildOutcome::Cancelled
            }
            SupervisorState::Failed(reason) => {
                let err = BuildError::BuildFailed(reason);
                self.say(Level::Error, err.to_string()).await;
                BuildOutcome::Failed(err.to_string())
            }
            other => {
                let reason = format!("Build ended in unexpected state {:?}", other);
                self.say(Level::Error, reason.clone()).await;
                BuildOutcome::Failed(reason)
            }
        }
    }

    /// Relay output until the process exits or cancellation is requested.
    async fn stream_build(&self, supervisor: &mut ProcessSupervisor) -> SupervisorState {
        let mut cancel = self.cancel.clone();
        let mut last_percent = 0;

        loop {
            tokio::select! {
                event = supervisor.next_event() => match event {
                    Some(SupervisorEvent::Line(line)) => {
                        if let Some(ref collector) = self.log_collector {
                            collector.log_str(line.clone());
                        }
                        if let Some(milestone) = parse_build_milestone(&line) {
                            if milestone.percent > last_percent {
                                last_percent = milestone.percent;
                                crate::log_parsed!("[Build] {} ({}%)", milestone.label, milestone.percent);
                                self.emit(BuildEvent::Milestone(milestone)).await;
                            }
                        }
                        self.emit(BuildEvent::Output(line)).await;
                    }
                    Some(SupervisorEvent::Exited(state)) => return state,
                    None => return supervisor.state().clone(),
                },
                _ = workers::cancelled(&mut cancel) => {
                    self.say(Level::Warn, "Cancellation requested; stopping the build".to_string()).await;
                    supervisor.terminate().await;
                    return supervisor.state().clone();
                }
            }
        }
    }

    /// Publish the final outcome. Only the first call has any effect.
    async fn finish(&mut self, outcome: BuildOutcome) -> BuildOutcome {
        let elapsed = {
            let state = self.state.read().await;
            if state.outcome_reported {
                return outcome;
            }
            state.elapsed_since_start()
        };
        let took = format_elapsed(elapsed);

        match outcome {
            BuildOutcome::Succeeded { ref artifact } => crate::log_parsed!(
                "[Orchestrator] Build succeeded in {}: {}",
                took,
                artifact.display()
            ),
            BuildOutcome::Cancelled => {
                log::warn!(target: "parsed", "[Orchestrator] Build cancelled after {}", took)
            }
            BuildOutcome::Failed(ref reason) => {
                log::error!(target: "parsed", "[Orchestrator] Build failed after {}: {}", took, reason)
            }
        }

        let phase = outcome.phase();
        {
            let mut state = self.state.write().await;
            state.outcome_reported = true;
            match outcome {
                BuildOutcome::Failed(ref reason) => state.record_error(reason.clone()),
                _ => {
                    if let Err(e) = state.transition_to(phase) {
                        log::error!("[Orchestrator] {}", e);
                        state.phase = phase;
                    }
                }
            }
        }

        self.emit(BuildEvent::PhaseChanged(phase)).await;
        self.emit(BuildEvent::Finished {
            outcome: outcome.clone(),
            elapsed,
        })
        .await;
        outcome
    }
}

/// Whether a caller's selection names this dependency (module or package).
fn selects(selection: &str, dep: &Dependency) -> bool {
    selection == dep.module
        || normalize_package_name(selection) == normalize_package_name(&dep.package)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DependencyStatus;

    fn dep(module: &str, package: &str) -> Dependency {
        Dependency {
            module: module.to_string(),
            package: package.to_string(),
            status: DependencyStatus::Missing,
        }
    }

    #[test]
    fn test_selection_matches_module_or_package() {
        let pil = dep("PIL", "Pillow");
        assert!(selects("PIL", &pil));
        assert!(selects("pillow", &pil));
        assert!(!selects("numpy", &pil));
        assert!(selects("python_dateutil", &dep("dateutil", "python-dateutil")));
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_busy() {
        let tables = Arc::new(LookupTables::builtin().unwrap());
        let orchestrator = BuildOrchestrator::new(tables, ToolchainDetector::new("/nonexistent-tools"));
        let _slot = orchestrator.claim().unwrap();

        let config = BuildConfiguration::new("/nonexistent/app.py", "/nonexistent/python");
        assert!(matches!(
            orchestrator.run(config).await,
            Err(OrchestratorError::Busy)
        ));
        assert!(matches!(
            orchestrator
                .check_dependencies(Path::new("/nonexistent/app.py"), Path::new("python"))
                .await,
            Err(OrchestratorError::Busy)
        ));
    }

    #[test]
    fn test_slot_released_on_drop() {
        let tables = Arc::new(LookupTables::builtin().unwrap());
        let orchestrator = BuildOrchestrator::new(tables, ToolchainDetector::new("/nonexistent-tools"));
        {
            let _slot = orchestrator.claim().unwrap();
            assert!(orchestrator.is_busy());
        }
        assert!(!orchestrator.is_busy());
    }

    #[test]
    fn test_cancel_handle_is_idempotent() {
        let (tx, rx) = watch::channel(false);
        let handle = CancelHandle(Arc::new(tx));
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(*rx.borrow());
    }
}
