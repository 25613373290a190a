//! Fixtures shared by unit tests

use crate::cache::{CacheConfig, SchedulerCache};
use crate::conf::{PluginOption, TierConfig};
use crate::framework::{PluginRegistry, Tier};
use crate::mock::InMemoryProvider;
use crate::provider::ClusterStateProvider;
use starbug_core::{JobInfo, NodeInfo, QueueInfo, Resource, TaskInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn job(uid: &str, queue: &str, min_available: u32) -> JobInfo {
    JobInfo::new(uid, queue, min_available)
}

pub fn node(name: &str, cpu: i64) -> NodeInfo {
    NodeInfo::new(name, Resource::cpu(cpu))
}

pub fn queue(name: &str) -> QueueInfo {
    QueueInfo::new(name)
}

pub fn task(uid: &str, job: &str, cpu: i64) -> TaskInfo {
    TaskInfo::new(uid, job, Resource::cpu(cpu))
}

/// Built-in plugins with default arguments, one slice per tier
pub fn tiers(names: &[&[&str]]) -> Vec<Tier> {
    let config: Vec<TierConfig> = names
        .iter()
        .map(|tier| TierConfig {
            plugins: tier.iter().map(|n| PluginOption::new(*n)).collect(),
        })
        .collect();
    PluginRegistry::with_defaults()
        .build_tiers(&config)
        .unwrap()
}

/// A cache fed by the provider, returned once it has synced
pub async fn synced_cache(
    provider: Arc<InMemoryProvider>,
    token: CancellationToken,
) -> Arc<SchedulerCache> {
    let cache = Arc::new(SchedulerCache::new(CacheConfig::default()));
    let stream = provider.watch().await.unwrap();
    let ingest = cache.clone();
    tokio::spawn(async move { ingest.run(stream, token).await });

    for _ in 0..200 {
        if cache.is_synced().await {
            return cache;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache did not sync");
}
