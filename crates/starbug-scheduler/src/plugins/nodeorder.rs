use crate::conf::Arguments;
use crate::error::{Result, SchedulerError};
use crate::framework::CapabilitySet;
use serde::Deserialize;
use starbug_core::{share, NodeInfo, TaskInfo, CPU, MEMORY};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "nodeorder";

/// Scoring function trait
pub trait ScoreFunction: Send + Sync {
    /// Score a node for the given task (0-100, higher is better)
    fn score(&self, task: &TaskInfo, node: &NodeInfo) -> f64;

    /// Name of the scoring function
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct NodeOrderArguments {
    pub least_allocated: f64,
    pub most_allocated: f64,
    pub balanced_allocation: f64,
    /// Weights keyed by scorer, overriding the flat fields above
    pub per_scorer_weights: BTreeMap<String, f64>,
}

impl Default for NodeOrderArguments {
    fn default() -> Self {
        Self {
            least_allocated: 1.0,
            most_allocated: 0.0,
            balanced_allocation: 1.0,
            per_scorer_weights: BTreeMap::new(),
        }
    }
}

impl NodeOrderArguments {
    /// Fold `perScorerWeights` into the flat weights
    fn resolve(mut self) -> Result<Self> {
        for (name, weight) in std::mem::take(&mut self.per_scorer_weights) {
            let slot = match name.as_str() {
                "leastAllocated" => &mut self.least_allocated,
                "mostAllocated" => &mut self.most_allocated,
                "balancedAllocation" => &mut self.balanced_allocation,
                other => {
                    return Err(SchedulerError::invalid_arguments(
                        NAME,
                        format!("unknown scorer '{}' in perScorerWeights", other),
                    ))
                }
            };
            *slot = weight;
        }
        Ok(self)
    }
}

// Percent of each allocatable dimension in use once the task is placed
fn utilization_after(task: &TaskInfo, node: &NodeInfo) -> Vec<f64> {
    node.allocatable
        .iter()
        .map(|(name, total)| {
            let used = node.used().get(name) + task.resreq.get(name);
            share(used, total) * 100.0
        })
        .collect()
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Score based on least allocated resources
pub struct LeastAllocated;

impl ScoreFunction for LeastAllocated {
    fn score(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let utilization = utilization_after(task, node);
        if utilization.is_empty() {
            return 0.0;
        }
        // Lower utilization = higher score (prefer less loaded nodes)
        let score = (100.0 - average(&utilization)).clamp(0.0, 100.0);
        debug!("Node {} least allocated score: {:.1}", node.name, score);
        score
    }

    fn name(&self) -> &str {
        "LeastAllocated"
    }
}

/// Score based on most allocated resources (bin packing)
pub struct MostAllocated;

impl ScoreFunction for MostAllocated {
    fn score(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let score = average(&utilization_after(task, node)).clamp(0.0, 100.0);
        debug!("Node {} most allocated score: {:.1}", node.name, score);
        score
    }

    fn name(&self) -> &str {
        "MostAllocated"
    }
}

/// Score based on balanced resource allocation
///
/// Nodes without both CPU and memory score a neutral 100.
pub struct BalancedAllocation;

impl ScoreFunction for BalancedAllocation {
    fn score(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let cpu_total = node.allocatable.get(CPU);
        let memory_total = node.allocatable.get(MEMORY);
        if cpu_total == 0 || memory_total == 0 {
            return 100.0;
        }

        let cpu_fraction = share(node.used().get(CPU) + task.resreq.get(CPU), cpu_total);
        let memory_fraction = share(
            node.used().get(MEMORY) + task.resreq.get(MEMORY),
            memory_total,
        );

        // Prefer balanced resource usage (CPU and memory usage should be similar)
        let variance = (cpu_fraction - memory_fraction).abs();
        let score = ((1.0 - variance) * 100.0).clamp(0.0, 100.0);
        debug!(
            "Node {} balanced allocation score: {:.1} (variance: {:.3})",
            node.name, score, variance
        );
        score
    }

    fn name(&self) -> &str {
        "BalancedAllocation"
    }
}

/// Weighted scorers for the given arguments; zero weights are skipped
pub fn weighted_scores(args: &NodeOrderArguments) -> Vec<(Box<dyn ScoreFunction>, f64)> {
    let scorers: [(Box<dyn ScoreFunction>, f64); 3] = [
        (Box::new(LeastAllocated), args.least_allocated),
        (Box::new(MostAllocated), args.most_allocated),
        (Box::new(BalancedAllocation), args.balanced_allocation),
    ];
    scorers.into_iter().filter(|(_, w)| *w > 0.0).collect()
}

/// Node preference by weighted allocation scores
pub fn build(args: &Arguments) -> Result<CapabilitySet> {
    let args = args.parse::<NodeOrderArguments>(NAME)?.resolve()?;
    for (name, weight) in [
        ("leastAllocated", args.least_allocated),
        ("mostAllocated", args.most_allocated),
        ("balancedAllocation", args.balanced_allocation),
    ] {
        if !weight.is_finite() || weight < 0.0 {
            return Err(SchedulerError::invalid_arguments(
                NAME,
                format!("{} must be a non-negative number, got {}", name, weight),
            ));
        }
    }
    let scorers = Arc::new(weighted_scores(&args));

    Ok(CapabilitySet::new(NAME).with_node_order(move |_, task, node| {
        scorers
            .iter()
            .map(|(scorer, weight)| weight * scorer.score(task, node))
            .sum()
    }))
}
