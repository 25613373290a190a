use crate::conf::Arguments;
use crate::error::{Result, SchedulerError};
use crate::framework::{CapabilitySet, FilterResult};
use serde::Deserialize;
use starbug_core::{NodeInfo, TaskInfo, Taint, Toleration};
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "predicates";

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Filter a node for the given task
    fn filter(&self, task: &TaskInfo, node: &NodeInfo) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Check names accepted in `enabledChecks`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Check {
    Ready,
    Unschedulable,
    NodeSelector,
    Taints,
    Resources,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PredicatesArguments {
    pub enabled_checks: Vec<Check>,
}

impl Default for PredicatesArguments {
    fn default() -> Self {
        Self {
            enabled_checks: vec![
                Check::Ready,
                Check::Unschedulable,
                Check::NodeSelector,
                Check::Taints,
                Check::Resources,
            ],
        }
    }
}

/// Filter for nodes that are not ready
pub struct NodeReady;

impl FilterPredicate for NodeReady {
    fn filter(&self, _task: &TaskInfo, node: &NodeInfo) -> FilterResult {
        if node.ready {
            FilterResult::pass(node.name.clone())
        } else {
            FilterResult::unresolvable(node.name.clone(), "node is not ready")
        }
    }

    fn name(&self) -> &str {
        "NodeReady"
    }
}

/// Filter for cordoned nodes
pub struct NodeSchedulable;

impl FilterPredicate for NodeSchedulable {
    fn filter(&self, _task: &TaskInfo, node: &NodeInfo) -> FilterResult {
        if node.unschedulable {
            FilterResult::unresolvable(node.name.clone(), "node is unschedulable")
        } else {
            FilterResult::pass(node.name.clone())
        }
    }

    fn name(&self) -> &str {
        "NodeSchedulable"
    }
}

/// Filter for node selector
pub struct NodeSelectorMatch;

impl FilterPredicate for NodeSelectorMatch {
    fn filter(&self, task: &TaskInfo, node: &NodeInfo) -> FilterResult {
        for (key, value) in &task.node_selector {
            if node.labels.get(key) != Some(value) {
                return FilterResult::unresolvable(
                    node.name.clone(),
                    format!("node selector mismatch: {}={}", key, value),
                );
            }
        }
        FilterResult::pass(node.name.clone())
    }

    fn name(&self) -> &str {
        "NodeSelectorMatch"
    }
}

/// Filter for taints and tolerations
///
/// `NoSchedule` and `NoExecute` taints must be tolerated;
/// `PreferNoSchedule` never filters.
pub struct TaintToleration;

impl FilterPredicate for TaintToleration {
    fn filter(&self, task: &TaskInfo, node: &NodeInfo) -> FilterResult {
        for taint in &node.taints {
            if taint.effect == "PreferNoSchedule" {
                continue;
            }
            if !task.tolerations.iter().any(|t| tolerates(t, taint)) {
                return FilterResult::unresolvable(
                    node.name.clone(),
                    format!("untolerated taint {}:{}", taint.key, taint.effect),
                );
            }
        }
        FilterResult::pass(node.name.clone())
    }

    fn name(&self) -> &str {
        "TaintToleration"
    }
}

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref() {
        if !effect.is_empty() && effect != taint.effect {
            return false;
        }
    }
    let key = toleration.key.as_deref().unwrap_or("");
    match toleration.operator.as_deref().unwrap_or("Equal") {
        // An empty key with Exists tolerates everything
        "Exists" => key.is_empty() || key == taint.key,
        "Equal" => {
            key == taint.key
                && toleration.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("")
        }
        _ => false,
    }
}

/// Filter for task resource requirements
///
/// A request larger than the node's allocatable cannot be fixed by
/// evicting anything.
pub struct TaskFitsResources;

impl FilterPredicate for TaskFitsResources {
    fn filter(&self, task: &TaskInfo, node: &NodeInfo) -> FilterResult {
        let idle = node.idle();
        let short = task.resreq.insufficient_dimensions(&idle);
        if short.is_empty() {
            return FilterResult::pass(node.name.clone());
        }

        debug!(
            "Node {} has {} idle, task {} requests {}",
            node.name, idle, task.uid, task.resreq
        );
        let reason = format!("insufficient {}", short.join(", "));
        if task.resreq.less_equal(&node.allocatable) {
            FilterResult::fail(node.name.clone(), reason)
        } else {
            FilterResult::unresolvable(node.name.clone(), reason)
        }
    }

    fn name(&self) -> &str {
        "TaskFitsResources"
    }
}

/// Filters for the enabled checks, those eviction cannot fix first
pub fn enabled_filters(checks: &[Check]) -> Vec<Box<dyn FilterPredicate>> {
    let mut checks = checks.to_vec();
    checks.sort();
    checks.dedup();
    checks
        .into_iter()
        .map(|check| -> Box<dyn FilterPredicate> {
            match check {
                Check::Ready => Box::new(NodeReady),
                Check::Unschedulable => Box::new(NodeSchedulable),
                Check::NodeSelector => Box::new(NodeSelectorMatch),
                Check::Taints => Box::new(TaintToleration),
                Check::Resources => Box::new(TaskFitsResources),
            }
        })
        .collect()
}

/// Node feasibility: readiness, cordon, selector, taints and fit
pub fn build(args: &Arguments) -> Result<CapabilitySet> {
    let args: PredicatesArguments = args.parse(NAME)?;
    if args.enabled_checks.is_empty() {
        return Err(SchedulerError::invalid_arguments(
            NAME,
            "enabledChecks must name at least one check",
        ));
    }
    let filters: Arc<Vec<Box<dyn FilterPredicate>>> = Arc::new(enabled_filters(&args.enabled_checks));

    Ok(CapabilitySet::new(NAME).with_predicate(move |_, task, node| {
        for filter in filters.iter() {
            let result = filter.filter(task, node);
            if !result.passed {
                debug!(
                    "Filter {} rejected node {} for task {}: {:?}",
                    filter.name(),
                    node.name,
                    task.uid,
                    result.reason
                );
                return result;
            }
        }
        FilterResult::pass(node.name.clone())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, task};
    use starbug_core::TaskStatus;

    fn taint(key: &str, value: Option<&str>, effect: &str) -> Taint {
        Taint {
            key: key.to_string(),
            value: value.map(str::to_string),
            effect: effect.to_string(),
            ..Default::default()
        }
    }

    fn toleration(key: Option<&str>, operator: &str, value: Option<&str>) -> Toleration {
        Toleration {
            key: key.map(str::to_string),
            operator: Some(operator.to_string()),
            value: value.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_task_fits_resources() {
        let mut n1 = node("n1", 4);
        n1.add_task(&task("busy", "default/b", 3).placed("n1", TaskStatus::Running))
            .unwrap();

        let result = TaskFitsResources.filter(&task("a", "default/a", 1), &n1);
        assert!(result.passed);

        let result = TaskFitsResources.filter(&task("a", "default/a", 2), &n1);
        assert!(!result.passed);
        assert!(result.is_resolvable());
        assert_eq!(result.reason.as_deref(), Some("insufficient cpu"));

        let result = TaskFitsResources.filter(&task("a", "default/a", 5), &n1);
        assert!(!result.is_resolvable());
    }

    #[test]
    fn test_node_selector_and_cordon() {
        let labelled = node("n1", 4).with_label("zone", "a");
        let mut selecting = task("a", "default/a", 1);
        selecting.node_selector.insert("zone".to_string(), "a".to_string());
        assert!(NodeSelectorMatch.filter(&selecting, &labelled).passed);

        selecting.node_selector.insert("zone".to_string(), "b".to_string());
        let result = NodeSelectorMatch.filter(&selecting, &labelled);
        assert!(!result.is_resolvable());

        let mut cordoned = node("n2", 4);
        cordoned.unschedulable = true;
        assert!(!NodeSchedulable.filter(&selecting, &cordoned).passed);

        let mut down = node("n3", 4);
        down.ready = false;
        assert!(!NodeReady.filter(&selecting, &down).passed);
    }

    #[test]
    fn test_taint_toleration() {
        let tainted = node("n1", 4).with_taint(taint("gpu", Some("true"), "NoSchedule"));
        let mut t = task("a", "default/a", 1);
        assert!(!TaintToleration.filter(&t, &tainted).passed);

        t.tolerations = vec![toleration(Some("gpu"), "Equal", Some("false"))];
        assert!(!TaintToleration.filter(&t, &tainted).passed);

        t.tolerations = vec![toleration(Some("gpu"), "Equal", Some("true"))];
        assert!(TaintToleration.filter(&t, &tainted).passed);

        t.tolerations = vec![toleration(None, "Exists", None)];
        assert!(TaintToleration.filter(&t, &tainted).passed);

        let soft = node("n2", 4).with_taint(taint("spot", None, "PreferNoSchedule"));
        assert!(TaintToleration.filter(&task("b", "default/a", 1), &soft).passed);
    }

    #[test]
    fn test_enabled_checks_are_ordered_and_configurable() {
        let filters = enabled_filters(&[Check::Resources, Check::Taints, Check::Ready]);
        let names: Vec<&str> = filters.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["NodeReady", "TaintToleration", "TaskFitsResources"]);

        let args = Arguments(serde_yaml::from_str("{ enabledChecks: [resources] }").unwrap());
        let set = build(&args).unwrap();
        assert!(set.predicate.is_some());

        let args = Arguments(serde_yaml::from_str("{ enabledChecks: [gpuTopology] }").unwrap());
        assert!(build(&args).is_err());
        let args = Arguments(serde_yaml::from_str("{ enabledChecks: [] }").unwrap());
        assert!(build(&args).is_err());
    }
}
