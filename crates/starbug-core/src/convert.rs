//! Conversion from Kubernetes objects into the scheduling model
//!
//! Providers backed by a Kubernetes-style API server use these to turn
//! `Pod` and `Node` objects into [`TaskInfo`] and [`NodeInfo`].

use crate::error::{CoreError, Result};
use crate::model::{NodeInfo, TaskInfo};
use crate::resources::{parse_quantity, Resource};
use crate::types::{JobId, NodeId, TaskId, TaskStatus};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Annotation naming the gang a pod belongs to
pub const GROUP_NAME_ANNOTATION: &str = "scheduling.starbug.io/group-name";
/// Annotation marking a pod as best-effort backfill work
pub const BACKFILL_ANNOTATION: &str = "scheduling.starbug.io/backfill";
/// Annotation opting a pod out of preemption and reclaim ("false")
pub const PREEMPTABLE_ANNOTATION: &str = "scheduling.starbug.io/preemptable";

/// Sum a Kubernetes resource map into a [`Resource`]
pub fn resource_from_quantities(map: &BTreeMap<String, Quantity>) -> Result<Resource> {
    let mut resource = Resource::new();
    for (name, quantity) in map {
        let value = parse_quantity(name, &quantity.0)?;
        resource.set(name.clone(), resource.get(name) + value);
    }
    Ok(resource)
}

impl TaskInfo {
    /// Build a task from a pod
    ///
    /// The owning job is `<namespace>/<group-name annotation>`.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod.metadata.name.clone().ok_or_else(|| {
            CoreError::invalid_object("Pod", "pod has no name", "Set metadata.name")
        })?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let annotations = pod.metadata.annotations.clone().unwrap_or_default();

        let group = annotations.get(GROUP_NAME_ANNOTATION).ok_or_else(|| {
            CoreError::invalid_object(
                "Pod",
                format!("pod {}/{} is not part of a gang", namespace, name),
                format!("Add the {} annotation", GROUP_NAME_ANNOTATION),
            )
        })?;

        let spec = pod.spec.as_ref().ok_or_else(|| {
            CoreError::invalid_object("Pod", format!("pod {} has no spec", name), "Set spec")
        })?;

        let mut resreq = Resource::new();
        for container in &spec.containers {
            if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
                resreq.add(&resource_from_quantities(requests)?);
            }
        }

        let node_name = spec.node_name.clone().map(NodeId::from);
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Pending");
        let status = match (phase, &node_name) {
            ("Running", _) => TaskStatus::Running,
            ("Succeeded", _) => TaskStatus::Succeeded,
            ("Failed", _) => TaskStatus::Failed,
            (_, Some(_)) => TaskStatus::Bound,
            (_, None) => TaskStatus::Pending,
        };

        let uid = pod
            .metadata
            .uid
            .clone()
            .unwrap_or_else(|| format!("{}/{}", namespace, name));

        Ok(Self {
            uid: TaskId::from(uid),
            job: JobId::from(format!("{}/{}", namespace, group)),
            backfillable: annotations
                .get(BACKFILL_ANNOTATION)
                .map(|v| v == "true")
                .unwrap_or_else(|| resreq.is_empty()),
            preemptable: annotations
                .get(PREEMPTABLE_ANNOTATION)
                .map(|v| v != "false")
                .unwrap_or(true),
            resreq,
            status,
            node_name,
            priority: spec.priority.unwrap_or(0),
            priority_class: spec.priority_class_name.clone(),
            node_selector: spec.node_selector.clone().unwrap_or_default(),
            tolerations: spec.tolerations.clone().unwrap_or_default(),
            creation_timestamp: pod
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .unwrap_or_else(Utc::now),
            resource_version: parse_resource_version(pod.metadata.resource_version.as_deref()),
            name,
            namespace,
        })
    }
}

impl NodeInfo {
    /// Build a node from its Kubernetes representation
    pub fn from_node(node: &Node) -> Result<Self> {
        let name = node.metadata.name.clone().ok_or_else(|| {
            CoreError::invalid_object("Node", "node has no name", "Set metadata.name")
        })?;

        let allocatable = node
            .status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref())
            .map(resource_from_quantities)
            .transpose()?
            .unwrap_or_default();

        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
            .map(|c| c.status == "True")
            .unwrap_or(false);

        let spec = node.spec.clone().unwrap_or_default();

        let mut info = NodeInfo::new(name, allocatable);
        info.labels = node.metadata.labels.clone().unwrap_or_default();
        info.taints = spec.taints.unwrap_or_default();
        info.unschedulable = spec.unschedulable.unwrap_or(false);
        info.ready = ready;
        info.resource_version = parse_resource_version(node.metadata.resource_version.as_deref());
        Ok(info)
    }
}

fn parse_resource_version(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0)
}
