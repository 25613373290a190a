use miette::{miette, Result};
use serde::Deserialize;
use starbug_core::{JobInfo, NodeInfo, QueueInfo, TaskInfo};
use starbug_scheduler::InMemoryProvider;
use std::path::Path;
use tracing::info;

/// Cluster state loaded into the in-memory provider
///
/// ```yaml
/// queues:
///   - name: research
///     weight: 2
/// nodes:
///   - name: node-a
///     allocatable: { cpu: "8", memory: 32Gi }
/// jobs:
///   - uid: default/train
///     queue: research
///     minAvailable: 2
/// tasks:
///   - uid: train-0
///     job: default/train
///     resreq: { cpu: "4" }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ClusterFixture {
    pub queues: Vec<QueueInfo>,
    pub nodes: Vec<NodeInfo>,
    pub jobs: Vec<JobInfo>,
    pub tasks: Vec<TaskInfo>,
}

impl ClusterFixture {
    pub fn from_yaml(data: &str) -> Result<Self> {
        let mut fixture: ClusterFixture =
            serde_yaml::from_str(data).map_err(|e| miette!("Invalid cluster fixture: {}", e))?;
        for job in &mut fixture.jobs {
            if job.name.is_empty() {
                job.name = job.uid.to_string();
            }
        }
        for task in &mut fixture.tasks {
            if task.name.is_empty() {
                task.name = task.uid.to_string();
            }
        }
        Ok(fixture)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| miette!("Failed to read cluster fixture '{}': {}", path.display(), e))?;
        Self::from_yaml(&data)
    }

    /// Publish every object, parents first
    pub async fn seed(&self, provider: &InMemoryProvider) {
        for queue in &self.queues {
            provider.upsert_queue(queue.clone()).await;
        }
        for node in &self.nodes {
            provider.upsert_node(node.clone()).await;
        }
        for job in &self.jobs {
            provider.upsert_job(job.clone()).await;
        }
        for task in &self.tasks {
            provider.upsert_task(task.clone()).await;
        }
        info!(
            "Seeded {} queues, {} nodes, {} jobs, {} tasks",
            self.queues.len(),
            self.nodes.len(),
            self.jobs.len(),
            self.tasks.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starbug_core::{Resource, TaskStatus};

    const FIXTURE: &str = r#"
queues:
  - name: q
nodes:
  - name: n1
    allocatable: { cpu: "4", memory: 8Gi }
jobs:
  - uid: default/a
    queue: q
    minAvailable: 2
tasks:
  - uid: a-0
    job: default/a
    resreq: { cpu: "2" }
  - uid: a-1
    job: default/a
    resreq: { cpu: 500m }
"#;

    #[test]
    fn test_parse_fixture() {
        let fixture = ClusterFixture::from_yaml(FIXTURE).unwrap();
        assert_eq!(fixture.nodes[0].allocatable.get("memory"), 8 << 30);
        assert_eq!(fixture.jobs[0].min_available, 2);
        assert_eq!(fixture.jobs[0].name, "default/a");
        assert_eq!(fixture.tasks[1].name, "a-1");
        assert_eq!(fixture.tasks[1].resreq, Resource::from_pairs([("cpu", 500)]));
        assert_eq!(fixture.tasks[0].status, TaskStatus::Pending);

        assert!(ClusterFixture::from_yaml("pods: []").is_err());
    }

    #[tokio::test]
    async fn test_seed_provider() {
        let provider = InMemoryProvider::default();
        ClusterFixture::from_yaml(FIXTURE)
            .unwrap()
            .seed(&provider)
            .await;
        assert!(provider.task("a-0").await.is_some());
        assert!(provider.job("default/a").await.is_some());
    }
}
