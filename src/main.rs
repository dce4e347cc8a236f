use anyhow::Result;
use backup_dr::config::{self, EnvSource, GlobalConfig, ProcessEnv};
use backup_dr::error::StepContext;
use backup_dr::managers::backup::{self, BackupOrchestrator};
use backup_dr::managers::drill::DrillRunner;
use backup_dr::managers::logging::{self, LoggingConfig};
use backup_dr::managers::restore::{self, RestoreOrchestrator};
use backup_dr::utils::{RealDatabaseOps, RealExecutor, RealRedisOps, RealS3Ops, SystemClock};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Parser)]
#[command(name = "backup-dr")]
#[command(about = "Backup, restore and disaster-recovery drills", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// All settings are read from the environment (and `.env`)
#[derive(Subcommand)]
enum Commands {
    /// Back up the database, the key-value store and storage metadata
    Backup,

    /// Restore a backup into the configured targets
    Restore,

    /// Restore the latest backup into a scratch target and measure RPO/RTO
    Drill,

    /// Check a backup's manifest and artifact hashes without restoring
    Verify,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    let env = ProcessEnv::load();

    let global = match config::load_global(&env).step("load configuration") {
        Ok(global) => global,
        Err(e) => {
            logging::init_console_logging();
            return Err(e.into());
        }
    };

    // Must stay alive until exit so file logs are flushed
    let _log_guard = logging::init_logging(&LoggingConfig::from_global(&global))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let handle = runtime.handle().clone();

    match command {
        Commands::Backup => handle_backup(&env, global, handle),
        Commands::Restore => handle_restore(&env, global, handle),
        Commands::Drill => handle_drill(&env, global, handle),
        Commands::Verify => handle_verify(&env, &global),
    }
}

fn handle_backup(env: &dyn EnvSource, global: GlobalConfig, handle: Handle) -> Result<()> {
    let config = config::load_backup(env).step("load configuration")?;
    backup::check_required_tools(&config).step("check required tools")?;

    let executor = Arc::new(RealExecutor::new(handle.clone()));
    let mut orchestrator = BackupOrchestrator::new(
        global,
        config.clone(),
        Arc::new(RealDatabaseOps::new(executor.clone())),
        Arc::new(RealRedisOps::new(executor)),
    );
    if let Some(storage) = config.effective_storage() {
        orchestrator = orchestrator.with_storage(Arc::new(RealS3Ops::connect(handle, storage)));
    }

    let outcome = orchestrator.run()?;
    println!("✓ Backup {} completed", outcome.backup_id);
    println!("  Directory: {}", outcome.directory.display());
    println!("  Files: {}", outcome.manifest.files.len());
    println!("  Size: {} bytes", outcome.pointer.size_bytes);
    Ok(())
}

fn restore_orchestrator(global: GlobalConfig, handle: Handle) -> RestoreOrchestrator {
    let executor = Arc::new(RealExecutor::new(handle));
    RestoreOrchestrator::new(
        global,
        Arc::new(RealDatabaseOps::new(executor.clone())),
        Arc::new(RealRedisOps::new(executor.clone())),
        executor,
    )
}

fn handle_restore(env: &dyn EnvSource, global: GlobalConfig, handle: Handle) -> Result<()> {
    let config = config::load_restore(env).step("load configuration")?;
    restore::check_required_tools(&config).step("check required tools")?;

    let report = restore_orchestrator(global, handle).run(&config)?;
    println!("✓ Restored backup {}", report.backup_id);
    println!("  Tables: {}", report.tables);
    println!("  Keys: {}", report.keys_restored);
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    Ok(())
}

fn handle_drill(env: &dyn EnvSource, global: GlobalConfig, handle: Handle) -> Result<()> {
    let drill = config::load_drill(env).step("load configuration")?;
    let restore_config = config::load_drill_restore(env, &drill).step("load configuration")?;
    restore::check_required_tools(&restore_config).step("check required tools")?;

    let restorer = Arc::new(restore_orchestrator(global.clone(), handle));
    let runner = DrillRunner::new(global, drill, restore_config, restorer, Arc::new(SystemClock));
    let outcome = runner.run()?;

    let minutes = |value: Option<u32>| value.map_or_else(|| "n/a".to_string(), |m| format!("{}m", m));
    println!("Drill {} for installation {}: {}", outcome.drill.id, outcome.drill.installation_id, outcome.drill.status);
    println!(
        "  RPO: {} (target {}m)",
        minutes(outcome.drill.rpo_minutes),
        outcome.targets.rpo_target_minutes
    );
    println!(
        "  RTO: {} (target {}m)",
        minutes(outcome.drill.rto_minutes),
        outcome.targets.rto_target_minutes
    );
    for alert in &outcome.alerts {
        println!("  ⚠ {}", alert.message);
    }

    if !outcome.succeeded() {
        anyhow::bail!(
            "drill failed: {}",
            outcome.drill.notes.as_deref().unwrap_or("restore did not complete")
        );
    }
    Ok(())
}

fn handle_verify(env: &dyn EnvSource, global: &GlobalConfig) -> Result<()> {
    let selector = config::load_backup_selector(env).step("load configuration")?;
    let manifest = restore::verify_backup(global, &selector)?;
    println!("✓ Backup {} is intact", manifest.id);
    println!("  Created: {}", manifest.created_at.to_rfc3339());
    println!("  Encrypted: {}", if manifest.encrypted { "yes" } else { "no" });
    for file in &manifest.files {
        println!("  {} ({} bytes)", file.name, file.size);
    }
    Ok(())
}
