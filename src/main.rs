use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::fmt::writer::MakeWriterExt as _;

use taskforge::config::{AssistantSettings, OrchestratorConfig};
use taskforge::events::EventBus;
use taskforge::orchestrator::TaskOrchestrator;
use taskforge::resolver::CommandResolver;
use taskforge::store::{InMemoryTaskStore, TaskStore};
use taskforge::worktree::{GitCli, WorktreeManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;

    // Initialize tracing: stderr with env filter, plus a non-blocking
    // daemon log file next to the attempt logs.
    std::fs::create_dir_all(&config.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "taskforge.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stderr))
        .with_target(false)
        .init();

    let settings = AssistantSettings::load_default().await?;

    eprintln!("🛠  taskforge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Slots: {}", config.max_slots);
    eprintln!("   Worktrees: {}", config.worktree_root.display());
    eprintln!("   Logs: {}", config.log_dir.display());
    if config.cleanup_disabled {
        eprintln!("   Cleanup: DISABLED (worktrees are kept for debugging)");
    }

    let events = EventBus::default();
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let resolver = Arc::new(CommandResolver::new(settings.clone()));
    let worktrees = Arc::new(WorktreeManager::new(
        &config,
        Arc::new(GitCli),
        events.clone(),
    ));

    // Startup reconciliation: reclaim worktrees left behind by a crash.
    match worktrees
        .sweep_orphans(config.orphan_max_age, store.as_ref())
        .await
    {
        Ok(report) if report.scanned > 0 => {
            eprintln!(
                "   Orphan sweep: {} scanned, {} removed, {} retained",
                report.scanned, report.removed, report.retained
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "startup orphan sweep failed"),
    }

    let orchestrator = Arc::new(TaskOrchestrator::new(
        config.clone(),
        settings,
        Arc::clone(&store),
        resolver,
        Arc::clone(&worktrees),
        events,
    ));
    let _admission = orchestrator.start();

    // Periodic sweep keeps long-lived daemons tidy.
    let sweep_worktrees = Arc::clone(&worktrees);
    let sweep_store = Arc::clone(&store);
    let sweep_interval = config.sweep_interval;
    let orphan_max_age = config.orphan_max_age;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_worktrees
                .sweep_orphans(orphan_max_age, sweep_store.as_ref())
                .await
            {
                tracing::warn!(error = %e, "periodic orphan sweep failed");
            }
        }
    });

    tracing::info!("taskforge ready; press Ctrl-C to shut down");
    tokio::signal::ctrl_c().await?;

    eprintln!("\nShutting down, cancelling running attempts...");
    orchestrator.shutdown(Duration::from_secs(15)).await;

    Ok(())
}
