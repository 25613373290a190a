// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The policy configuration is malformed
    #[error("Invalid scheduler configuration: {message}")]
    #[diagnostic(
        code(scheduler::invalid_configuration),
        help("{suggestion}")
    )]
    InvalidConfiguration {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// A tier names a plugin that is not registered
    #[error("Unknown plugin: {name}")]
    #[diagnostic(
        code(scheduler::unknown_plugin),
        help("Registered plugins: {known}")
    )]
    UnknownPlugin {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        known: String,
    },

    /// The action list names an action that is not registered
    #[error("Unknown action: {name}")]
    #[diagnostic(
        code(scheduler::unknown_action),
        help("Registered actions: {known}")
    )]
    UnknownAction {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        known: String,
    },

    /// Plugin or action arguments could not be decoded
    #[error("Invalid arguments for {owner}: {reason}")]
    #[diagnostic(
        code(scheduler::invalid_arguments),
        help("Check the argument names and types documented for {owner}")
    )]
    InvalidArguments {
        #[allow(unused)]
        owner: String,
        #[allow(unused)]
        reason: String,
    },

    /// The cache has not received its initial listing yet
    #[error("Cache is not synced yet")]
    #[diagnostic(
        code(scheduler::cache_not_synced),
        help("Wait for the provider to finish its initial listing")
    )]
    CacheNotSynced,

    /// A session is already open
    #[error("A scheduling session is already open")]
    #[diagnostic(
        code(scheduler::session_already_open),
        help("Sessions are strictly sequential; close the current session first")
    )]
    SessionAlreadyOpen,

    /// A decision would break a resource or gang invariant
    #[error("Invariant violation for {subject}: {reason}")]
    #[diagnostic(
        code(scheduler::invariant_violation),
        help("The decision was dropped; the next cycle recomputes it from fresh state")
    )]
    InvariantViolation {
        #[allow(unused)]
        subject: String,
        #[allow(unused)]
        reason: String,
    },

    /// The cluster-state provider rejected an operation
    #[error("Provider failed to {operation}: {message}")]
    #[diagnostic(
        code(scheduler::provider_error),
        help("The decision is retried from fresh state in the next cycle")
    )]
    ProviderError {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// An entity referenced by a decision or event does not exist
    #[error("{kind} {name} not found")]
    #[diagnostic(
        code(scheduler::unknown_entity),
        help("The entity may have been deleted concurrently")
    )]
    UnknownEntity {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
    },

    /// An event waited too long for its parent entity
    #[error("Dropped event for {key} after {attempts} attempts: {missing} never appeared")]
    #[diagnostic(
        code(scheduler::orphan_dropped),
        help("Check that the provider emits parents (queues, jobs, nodes) before children")
    )]
    OrphanDropped {
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        missing: String,
        #[allow(unused)]
        attempts: u32,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] starbug_core::CoreError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create an InvalidConfiguration error
    pub fn invalid_configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an UnknownPlugin error
    pub fn unknown_plugin(name: impl Into<String>, known: impl Into<String>) -> Self {
        Self::UnknownPlugin {
            name: name.into(),
            known: known.into(),
        }
    }

    /// Create an UnknownAction error
    pub fn unknown_action(name: impl Into<String>, known: impl Into<String>) -> Self {
        Self::UnknownAction {
            name: name.into(),
            known: known.into(),
        }
    }

    /// Create an InvalidArguments error
    pub fn invalid_arguments(owner: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            owner: owner.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvariantViolation error
    pub fn invariant_violation(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a ProviderError
    pub fn provider_error(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an UnknownEntity error
    pub fn unknown_entity(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownEntity {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an OrphanDropped error
    pub fn orphan_dropped(key: impl Into<String>, missing: impl Into<String>, attempts: u32) -> Self {
        Self::OrphanDropped {
            key: key.into(),
            missing: missing.into(),
            attempts,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the error is a configuration problem (fatal for the cycle only)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::UnknownPlugin { .. }
                | Self::UnknownAction { .. }
                | Self::InvalidArguments { .. }
        )
    }
}
