use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use starbug_core::{JobInfo, JobPhase, NodeId, TaskInfo, WatchEvent};

/// Status reported back for a job at the end of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub unschedulable_reason: Option<String>,
}

/// The scheduler's only boundary to the outside world
///
/// Implemented by whatever owns the desired-state objects (an API
/// server client, or [`crate::mock::InMemoryProvider`] in tests and the
/// standalone binary). Errors are never fatal to a cycle: the failed
/// decision is dropped and recomputed from fresh state.
#[async_trait]
pub trait ClusterStateProvider: Send + Sync {
    /// Stream of changes, starting with the full current state and a
    /// [`WatchEvent::Synced`] marker
    async fn watch(&self) -> Result<BoxStream<'static, WatchEvent>>;

    /// Bind a pending task to a node
    async fn bind(&self, task: &TaskInfo, node: &NodeId) -> Result<()>;

    /// Evict a placed task
    async fn evict(&self, task: &TaskInfo, reason: &str) -> Result<()>;

    /// Record a job's phase and unschedulable reason
    async fn update_job_status(&self, job: &JobInfo, status: &JobStatus) -> Result<()> {
        let _ = (job, status);
        Ok(())
    }
}
