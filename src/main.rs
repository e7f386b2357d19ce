use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use packer_pro::cli::{self, Cli};
use packer_pro::log_collector::get_global_logs_path;
use packer_pro::{BuildOrchestrator, LogCollector, LookupTables, SettingsManager};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // =========================================================================
    // LOG COLLECTOR - MUST BE FIRST
    // =========================================================================
    let log_collector = match get_global_logs_path()
        .and_then(|dir| LogCollector::new(dir, None))
    {
        Ok(collector) => Some(Arc::new(collector)),
        Err(e) => {
            eprintln!("[Main] WARNING: LogCollector initialization failed: {}", e);
            None
        }
    };

    if let Some(ref collector) = log_collector {
        if let Err(e) = collector.start_new_session("packer") {
            eprintln!("[Main] WARNING: Failed to open session log: {}", e);
        }
        let max_level = if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        if let Err(e) = log::set_boxed_logger(Box::new((**collector).clone()))
            .map(|()| log::set_max_level(max_level))
        {
            eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
        }
    }

    log::info!("Packer Pro {} starting", packer_pro::VERSION);

    // =========================================================================
    // SETTINGS, TABLES AND TOOLCHAIN
    // =========================================================================
    let settings = SettingsManager::load();
    let tables_path = cli.tables.clone().or_else(|| settings.tables_override.clone());
    let tables = Arc::new(LookupTables::load(tables_path.as_deref())?);
    let detector = cli::detector_for(cli.tools_dir.as_deref(), &settings);

    let mut orchestrator = BuildOrchestrator::new(Arc::clone(&tables), detector.clone());
    if let Some(ref collector) = log_collector {
        orchestrator = orchestrator.with_log_collector(Arc::clone(collector));
    }

    let result = cli::execute(cli.command, &settings, tables, detector, orchestrator).await;

    // =========================================================================
    // SHUTDOWN
    // =========================================================================
    if let Some(ref collector) = log_collector {
        if let Err(e) = collector.wait_for_empty().await {
            eprintln!("[Main] WARNING: Failed to wait for log collector to empty: {}", e);
        }
    }

    match result {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::from(1)),
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::from(2))
        }
    }
}
