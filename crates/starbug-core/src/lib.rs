//! Starbug Core - Scheduling model for the Starbug batch scheduler
//!
//! This crate provides:
//! - Multi-dimensional resource quantities and arithmetic
//! - Task, job, node and queue records with their accounting invariants
//! - Watch events exchanged with cluster-state providers
//! - Error types with miette diagnostics
//! - Conversion from Kubernetes pods and nodes

pub mod convert;
pub mod error;
pub mod events;
pub mod model;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use events::{ClusterEvent, ClusterObject, ObjectKey, ObjectKind, WatchEvent, WatchEventType};
pub use model::{JobInfo, NodeInfo, QueueInfo, TaskInfo};
pub use resources::{share, Resource, CPU, MEMORY};
pub use types::{JobId, JobPhase, NodeId, QueueId, QueueState, TaskId, TaskStatus};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod, Taint, Toleration};

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_roundtrip_of_queue() {
        let queue = QueueInfo::new("research")
            .with_weight(3)
            .with_deserved(Resource::cpu(8));

        let yaml = to_yaml(&queue).unwrap();
        assert!(yaml.contains("research"));

        let back: QueueInfo = from_yaml(&yaml).unwrap();
        assert_eq!(back, queue);
    }

    #[test]
    fn test_from_json_reports_serialization_error() {
        let err = from_json::<QueueInfo>("{not json").unwrap_err();
        assert!(matches!(err, CoreError::SerializationError { .. }));
    }
}
