use crate::conf::SchedulerConfiguration;
use crate::error::Result;
use crate::framework::{CycleReport, Framework};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Where the scheduling policy comes from
#[derive(Debug, Clone)]
pub enum PolicySource {
    Inline(SchedulerConfiguration),
    /// Re-read at every cycle
    File(PathBuf),
}

impl Default for PolicySource {
    fn default() -> Self {
        Self::Inline(SchedulerConfiguration::default())
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduling cycles
    pub schedule_interval: Duration,
    /// Time after which remaining actions of a cycle are skipped
    pub cycle_budget: Option<Duration>,
    pub policy: PolicySource,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(1),
            cycle_budget: None,
            policy: PolicySource::default(),
        }
    }
}

/// Batch scheduler
pub struct Scheduler {
    framework: Framework,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(framework: Framework, config: SchedulerConfig) -> Self {
        Self { framework, config }
    }

    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    fn policy(&self) -> Result<SchedulerConfiguration> {
        match &self.config.policy {
            PolicySource::Inline(conf) => Ok(conf.clone()),
            PolicySource::File(path) => SchedulerConfiguration::load(path),
        }
    }

    /// Run a single scheduling cycle
    pub async fn run_once(&self, token: &CancellationToken) -> Result<CycleReport> {
        let conf = self.policy()?;
        self.framework
            .run_cycle(&conf, token, self.config.cycle_budget)
            .await
    }

    /// Run cycles on every tick or cache change until cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting scheduler (interval {:?})",
            self.config.schedule_interval
        );
        let mut interval = tokio::time::interval(self.config.schedule_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let cache = self.framework.cache().clone();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {}
                _ = cache.changed() => {}
            }

            if let Err(e) = self.run_once(&token).await {
                error!("Scheduling cycle failed: {}", e);
            }
        }
    }
}
