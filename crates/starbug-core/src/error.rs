// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for the scheduling model
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Subtraction or placement would drive a dimension below zero
    #[error("Insufficient {dimension}: requested {requested}, available {available}")]
    #[diagnostic(
        code(starbug::insufficient_resource),
        help("Resource arithmetic never clamps; use saturating_sub for speculative checks")
    )]
    InsufficientResource {
        #[allow(unused)]
        dimension: String,
        #[allow(unused)]
        requested: i64,
        #[allow(unused)]
        available: i64,
    },

    /// A quantity string could not be parsed
    #[error("Invalid quantity for {name}: {value}")]
    #[diagnostic(
        code(starbug::invalid_quantity),
        help("Use Kubernetes quantity syntax, e.g. '2', '500m', '8Gi' ({reason})")
    )]
    InvalidQuantity {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// A source object is missing data the model requires
    #[error("Invalid {kind}: {reason}")]
    #[diagnostic(
        code(starbug::invalid_object),
        help("{suggestion}")
    )]
    InvalidObject {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Task is already accounted on the owner
    #[error("Task {task} already exists on {owner}")]
    #[diagnostic(
        code(starbug::task_exists),
        help("A task can only be placed once; remove it before adding it again")
    )]
    TaskExists {
        #[allow(unused)]
        task: String,
        #[allow(unused)]
        owner: String,
    },

    /// Task is not accounted on the owner
    #[error("Task {task} not found on {owner}")]
    #[diagnostic(
        code(starbug::task_not_found),
        help("The task may have been deleted or moved concurrently")
    )]
    TaskNotFound {
        #[allow(unused)]
        task: String,
        #[allow(unused)]
        owner: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(starbug::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InsufficientResource error
    pub fn insufficient_resource(dimension: impl Into<String>, requested: i64, available: i64) -> Self {
        Self::InsufficientResource {
            dimension: dimension.into(),
            requested,
            available,
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidQuantity {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidObject error
    pub fn invalid_object(
        kind: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidObject {
            kind: kind.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a TaskExists error
    pub fn task_exists(task: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::TaskExists {
            task: task.into(),
            owner: owner.into(),
        }
    }

    /// Create a TaskNotFound error
    pub fn task_not_found(task: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task: task.into(),
            owner: owner.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CoreError::insufficient_resource("cpu", 2000, 1000);
        assert!(matches!(err, CoreError::InsufficientResource { .. }));
        assert_eq!(
            err.to_string(),
            "Insufficient cpu: requested 2000, available 1000"
        );

        let err = CoreError::invalid_object("Pod", "missing name", "Set metadata.name");
        assert!(matches!(err, CoreError::InvalidObject { .. }));
    }
}
