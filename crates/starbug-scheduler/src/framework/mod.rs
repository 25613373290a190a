//! Plugin framework and cycle driver
//!
//! A cycle opens a session over a cache snapshot, runs the configured
//! actions over it, then closes it: committed decision groups are
//! assumed in the cache and submitted to the provider, and changed job
//! statuses are written back.

pub mod plugin;
pub mod registry;
pub mod session;
pub mod share;
pub mod statement;

pub use plugin::{CapabilitySet, FilterResult, Tier};
pub use registry::{PluginBuilder, PluginRegistry};
pub use session::{QueueAttr, Session, SessionGuard};
pub use statement::Statement;

use crate::actions::{Action, ActionRegistry};
use crate::cache::SchedulerCache;
use crate::conf::SchedulerConfiguration;
use crate::decision::{Decision, DecisionGroup};
use crate::error::Result;
use crate::provider::ClusterStateProvider;
use session::SessionOutcome;
use starbug_core::JobId;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one scheduling cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub session: Option<Uuid>,
    /// Actions that ran, in order
    pub actions_run: Vec<String>,
    /// Actions skipped by cancellation or the time budget
    pub actions_skipped: Vec<String>,
    pub binds: usize,
    pub evictions: usize,
    /// Decisions the cache refused to assume
    pub rejected: usize,
    /// Decisions the provider refused
    pub failed: usize,
    pub status_updates: usize,
    pub duration: Duration,
}

/// Drives sessions against a cache and a provider
pub struct Framework {
    cache: Arc<SchedulerCache>,
    provider: Arc<dyn ClusterStateProvider>,
    plugins: PluginRegistry,
    actions: ActionRegistry,
    open: Arc<AtomicBool>,
}

impl Framework {
    /// Framework with every built-in plugin and action
    pub fn new(cache: Arc<SchedulerCache>, provider: Arc<dyn ClusterStateProvider>) -> Self {
        Self::with_registries(
            cache,
            provider,
            PluginRegistry::with_defaults(),
            ActionRegistry::with_defaults(),
        )
    }

    pub fn with_registries(
        cache: Arc<SchedulerCache>,
        provider: Arc<dyn ClusterStateProvider>,
        plugins: PluginRegistry,
        actions: ActionRegistry,
    ) -> Self {
        Self {
            cache,
            provider,
            plugins,
            actions,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cache(&self) -> &Arc<SchedulerCache> {
        &self.cache
    }

    /// Resolve the policy and open a session over the current snapshot
    ///
    /// Fails without side effects if another session is open, the policy
    /// does not resolve, or the cache is not synced.
    pub async fn open_session(
        &self,
        conf: &SchedulerConfiguration,
    ) -> Result<(Session, Vec<Arc<dyn Action>>)> {
        let guard = SessionGuard::acquire(&self.open)?;
        conf.validate()?;
        let tiers = self.plugins.build_tiers(&conf.tiers)?;
        let actions = self.actions.resolve(conf)?;
        let snapshot = self.cache.snapshot().await?;
        Ok((Session::new(snapshot, tiers).with_guard(guard), actions))
    }

    /// Run actions in order until done, cancelled or out of time
    pub fn execute(
        session: &mut Session,
        actions: &[Arc<dyn Action>],
        token: &CancellationToken,
        deadline: Option<Instant>,
        report: &mut CycleReport,
    ) {
        for action in actions {
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if token.is_cancelled() || expired {
                report.actions_skipped.push(action.name().to_string());
                continue;
            }
            let started = Instant::now();
            action.execute(session);
            debug!(
                "Action {} finished in {:?}",
                action.name(),
                started.elapsed()
            );
            report.actions_run.push(action.name().to_string());
        }
        if !report.actions_skipped.is_empty() {
            warn!(
                "Skipped actions {:?} in session {}",
                report.actions_skipped, session.uid
            );
        }
    }

    /// Submit what the session committed and write back job statuses
    pub async fn close_session(&self, session: Session, report: &mut CycleReport) {
        // The outcome keeps the session marker until everything is submitted
        let outcome: SessionOutcome = session.into_outcome();

        let mut unsettled = BTreeSet::new();
        for group in &outcome.groups {
            self.submit(group, report, &mut unsettled).await;
        }

        // Jobs with a failed decision are re-derived next cycle
        for (job, status) in &outcome.updates {
            if unsettled.contains(&job.uid) {
                debug!("Skipping status update of job {}", job.uid);
                continue;
            }
            match self.provider.update_job_status(job, status).await {
                Ok(()) => {
                    self.cache.record_job_status(&job.uid, status).await;
                    report.status_updates += 1;
                }
                Err(e) => warn!("Failed to update status of job {}: {}", job.uid, e),
            }
        }
    }

    async fn submit(
        &self,
        group: &DecisionGroup,
        report: &mut CycleReport,
        unsettled: &mut BTreeSet<JobId>,
    ) {
        let assumed = self.cache.assume(group).await;
        for (decision, e) in &assumed.rejected {
            warn!("Dropped decision '{}' from {}: {}", decision, group.action, e);
            unsettled.insert(decision.task().job.clone());
        }
        report.rejected += assumed.rejected.len();

        let (evictions, binds): (Vec<Decision>, Vec<Decision>) =
            assumed.accepted.into_iter().partition(Decision::is_evict);

        let mut evicted = true;
        for decision in &evictions {
            let Decision::Evict { task, reason } = decision else {
                continue;
            };
            match self.provider.evict(task, reason).await {
                Ok(()) => report.evictions += 1,
                Err(e) => {
                    warn!("Failed to evict task {}: {}", task.uid, e);
                    self.cache.forget(decision).await;
                    unsettled.insert(task.job.clone());
                    report.failed += 1;
                    evicted = false;
                }
            }
        }

        // Binds that depended on a failed eviction would over-commit
        if !evicted {
            for decision in &binds {
                self.cache.forget(decision).await;
                unsettled.insert(decision.task().job.clone());
                report.failed += 1;
            }
            return;
        }

        for decision in &binds {
            let Decision::Bind { task, node } = decision else {
                continue;
            };
            match self.provider.bind(task, node).await {
                Ok(()) => report.binds += 1,
                Err(e) => {
                    warn!("Failed to bind task {} to node {}: {}", task.uid, node, e);
                    self.cache.forget(decision).await;
                    unsettled.insert(task.job.clone());
                    report.failed += 1;
                }
            }
        }
    }

    /// One complete cycle: open, execute, close
    pub async fn run_cycle(
        &self,
        conf: &SchedulerConfiguration,
        token: &CancellationToken,
        budget: Option<Duration>,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let (mut session, actions) = self.open_session(conf).await?;
        let mut report = CycleReport {
            session: Some(session.uid),
            ..Default::default()
        };

        Self::execute(
            &mut session,
            &actions,
            token,
            budget.map(|b| started + b),
            &mut report,
        );
        self.close_session(session, &mut report).await;

        report.duration = started.elapsed();
        if report.binds + report.evictions + report.failed + report.rejected > 0 {
            info!(
                "Cycle finished in {:?}: {} binds, {} evictions, {} failed, {} rejected",
                report.duration, report.binds, report.evictions, report.failed, report.rejected
            );
        } else {
            debug!("Cycle finished in {:?} with no decisions", report.duration);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::mock::{InMemoryProvider, ProviderCall};
    use crate::testing::{job, node, queue, synced_cache, task};
    use starbug_core::{JobId, JobPhase, TaskStatus};

    async fn cluster() -> Arc<InMemoryProvider> {
        let provider = Arc::new(InMemoryProvider::default());
        provider.upsert_queue(queue("q")).await;
        provider.upsert_node(node("n1", 4)).await;
        provider.upsert_job(job("default/g", "q", 2)).await;
        provider.upsert_task(task("g-0", "default/g", 2)).await;
        provider.upsert_task(task("g-1", "default/g", 2)).await;
        provider
    }

    async fn framework(provider: &Arc<InMemoryProvider>) -> (Framework, CancellationToken) {
        let token = CancellationToken::new();
        let cache = synced_cache(provider.clone(), token.clone()).await;
        (Framework::new(cache, provider.clone()), token)
    }

    #[tokio::test]
    async fn test_cycle_binds_gang_and_writes_status() {
        let provider = cluster().await;
        let (framework, token) = framework(&provider).await;

        let report = framework
            .run_cycle(&SchedulerConfiguration::default(), &token, None)
            .await
            .unwrap();
        assert_eq!(report.binds, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.actions_run.len(), 5);

        for id in ["g-0", "g-1"] {
            let t = provider.task(id).await.unwrap();
            assert_eq!(t.status, TaskStatus::Bound);
        }
        assert_eq!(
            provider.job("default/g").await.unwrap().phase,
            JobPhase::Running
        );

        let snapshot = framework.cache().snapshot().await.unwrap();
        for n in snapshot.nodes.values() {
            assert!(n.used().less_equal(&n.allocatable));
        }
        token.cancel();
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let provider = cluster().await;
        let (framework, token) = framework(&provider).await;
        let conf = SchedulerConfiguration::default();

        framework.run_cycle(&conf, &token, None).await.unwrap();
        let second = framework.run_cycle(&conf, &token, None).await.unwrap();
        assert_eq!(second.binds, 0);

        let binds = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, ProviderCall::Bind { .. }))
            .count();
        assert_eq!(binds, 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_failed_bind_is_forgotten() {
        let provider = Arc::new(InMemoryProvider::default());
        provider.upsert_queue(queue("q")).await;
        provider.upsert_node(node("n1", 4)).await;
        provider.upsert_job(job("default/s", "q", 1)).await;
        provider.upsert_task(task("s-0", "default/s", 2)).await;
        provider.fail_bind("s-0").await;
        let (framework, token) = framework(&provider).await;

        let report = framework
            .run_cycle(&SchedulerConfiguration::default(), &token, None)
            .await
            .unwrap();
        assert_eq!(report.binds, 0);
        assert_eq!(report.failed, 1);

        let snapshot = framework.cache().snapshot().await.unwrap();
        let s0 = snapshot.task(&JobId::from("default/s"), "s-0").unwrap();
        assert_eq!(s0.status, TaskStatus::Pending);
        assert!(snapshot.nodes["n1"].used().is_empty());
        assert_ne!(
            provider.job("default/s").await.unwrap().phase,
            JobPhase::Running
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_failed_eviction_cancels_dependent_binds() {
        let provider = Arc::new(InMemoryProvider::default());
        provider.upsert_queue(queue("q")).await;
        provider.upsert_node(node("n1", 4)).await;
        provider
            .upsert_job(job("default/lo", "q", 1).with_phase(JobPhase::Running))
            .await;
        provider
            .upsert_job(job("default/hi", "q", 1).with_priority(10))
            .await;
        provider
            .upsert_task(task("lo-0", "default/lo", 4).placed("n1", TaskStatus::Running))
            .await;
        provider.upsert_task(task("hi-0", "default/hi", 4)).await;
        provider.fail_evict("lo-0").await;
        let (framework, token) = framework(&provider).await;

        let report = framework
            .run_cycle(&SchedulerConfiguration::default(), &token, None)
            .await
            .unwrap();
        assert_eq!(report.evictions, 0);
        assert_eq!(report.binds, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(
            provider.task("lo-0").await.unwrap().status,
            TaskStatus::Running
        );

        let snapshot = framework.cache().snapshot().await.unwrap();
        assert_eq!(
            snapshot.task(&JobId::from("default/lo"), "lo-0").unwrap().status,
            TaskStatus::Running
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_sessions_are_exclusive() {
        let provider = cluster().await;
        let (framework, token) = framework(&provider).await;
        let conf = SchedulerConfiguration::default();

        let (first, _) = framework.open_session(&conf).await.unwrap();
        assert!(matches!(
            framework.open_session(&conf).await,
            Err(SchedulerError::SessionAlreadyOpen)
        ));
        let mut report = CycleReport::default();
        framework.close_session(first, &mut report).await;
        assert!(framework.open_session(&conf).await.is_ok());
        token.cancel();
    }

    #[tokio::test]
    async fn test_bad_policy_fails_only_that_cycle() {
        let provider = cluster().await;
        let (framework, token) = framework(&provider).await;

        let bad = SchedulerConfiguration::from_yaml(
            "actions: [allocate]\ntiers:\n  - plugins:\n      - name: fairness\n",
        )
        .unwrap();
        let err = framework.run_cycle(&bad, &token, None).await.unwrap_err();
        assert!(err.is_configuration());

        let report = framework
            .run_cycle(&SchedulerConfiguration::default(), &token, None)
            .await
            .unwrap();
        assert_eq!(report.binds, 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_actions() {
        let provider = cluster().await;
        let (framework, token) = framework(&provider).await;
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let report = framework
            .run_cycle(&SchedulerConfiguration::default(), &cancelled, None)
            .await
            .unwrap();
        assert!(report.actions_run.is_empty());
        assert_eq!(report.actions_skipped.len(), 5);
        assert_eq!(report.binds, 0);
        token.cancel();
    }
}
