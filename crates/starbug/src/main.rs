mod fixture;

use clap::{Parser, Subcommand};
use fixture::ClusterFixture;
use starbug_scheduler::actions::ActionRegistry;
use starbug_scheduler::framework::PluginRegistry;
use starbug_scheduler::{
    CacheConfig, ClusterStateProvider, Framework, InMemoryProvider, PolicySource, Scheduler,
    SchedulerCache, SchedulerConfig, SchedulerConfiguration,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "starbug", about = "Starbug gang-aware batch scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a cluster fixture with the in-memory provider
    Run {
        /// Path to the scheduler policy (re-read every cycle)
        #[arg(long)]
        config: PathBuf,
        /// Path to the cluster fixture
        #[arg(long)]
        cluster: PathBuf,
        /// Interval between scheduling cycles in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Run this many cycles, print placements and exit
        #[arg(long)]
        cycles: Option<u32>,
    },
    /// Validate a scheduler policy against the built-in plugins and actions
    CheckConfig {
        /// Path to the scheduler policy
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            cluster,
            interval_ms,
            cycles,
        } => run(config, &cluster, Duration::from_millis(interval_ms), cycles).await,
        Commands::CheckConfig { config } => check_config(&config),
    }
}

/// Parse the policy and resolve every plugin and action it names
fn check_config(path: &Path) -> miette::Result<()> {
    let conf = SchedulerConfiguration::load(path)?;
    let tiers = PluginRegistry::with_defaults().build_tiers(&conf.tiers)?;
    let actions = ActionRegistry::with_defaults().resolve(&conf)?;
    println!(
        "{}: {} actions, {} tiers, {} plugins",
        path.display(),
        actions.len(),
        tiers.len(),
        tiers.iter().map(|t| t.plugins.len()).sum::<usize>()
    );
    Ok(())
}

async fn run(
    config: PathBuf,
    cluster: &Path,
    interval: Duration,
    cycles: Option<u32>,
) -> miette::Result<()> {
    // Fail fast on a broken policy; later edits are picked up per cycle
    SchedulerConfiguration::load(&config)?;
    let fixture = ClusterFixture::load(cluster)?;

    let token = CancellationToken::new();
    let provider = Arc::new(InMemoryProvider::default());
    let cache = Arc::new(SchedulerCache::new(CacheConfig::default()));

    // Seed first so the initial listing precedes the sync marker
    fixture.seed(&provider).await;
    let stream = provider.watch().await?;
    let ingest = cache.clone();
    let ingest_token = token.clone();
    let cache_handle = tokio::spawn(async move {
        if let Err(e) = ingest.run(stream, ingest_token).await {
            error!("Cache ingestion error: {}", e);
        }
    });
    wait_for_sync(&cache).await?;

    let framework = Framework::new(cache, provider.clone());
    let scheduler = Scheduler::new(
        framework,
        SchedulerConfig {
            schedule_interval: interval,
            policy: PolicySource::File(config),
            ..Default::default()
        },
    );

    match cycles {
        Some(n) => {
            for _ in 0..n {
                match scheduler.run_once(&token).await {
                    Ok(report) => info!(
                        "Cycle: {} binds, {} evictions, {} failed",
                        report.binds, report.evictions, report.failed
                    ),
                    Err(e) => error!("Scheduling cycle failed: {}", e),
                }
                tokio::time::sleep(interval).await;
            }
            print_placements(&fixture, &provider).await;
        }
        None => {
            let scheduler_token = token.clone();
            let scheduler_handle = tokio::spawn(async move {
                if let Err(e) = scheduler.run(scheduler_token).await {
                    error!("Scheduler error: {}", e);
                }
            });

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Shutting down gracefully...");
            token.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
        }
    }

    token.cancel();
    let _ = cache_handle.await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_sync(cache: &SchedulerCache) -> miette::Result<()> {
    for _ in 0..100 {
        if cache.is_synced().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(miette::miette!("Cache did not sync with the cluster fixture"))
}

async fn print_placements(fixture: &ClusterFixture, provider: &InMemoryProvider) {
    for node in &fixture.nodes {
        let tasks = provider.tasks_on(node.name.as_str()).await;
        let names: Vec<&str> = tasks.iter().map(|t| t.uid.as_str()).collect();
        println!("{}: {}", node.name, names.join(", "));
    }
    for task in &fixture.tasks {
        if let Some(current) = provider.task(task.uid.as_str()).await {
            if current.node_name.is_none() {
                println!("pending: {} ({})", current.uid, current.status);
            }
        }
    }
}
