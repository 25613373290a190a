//! Starbug Scheduler - Gang-aware batch scheduling
//!
//! This crate provides:
//! - A cluster state cache fed by a provider watch stream
//! - Sessions and statements for speculative, all-or-nothing placement
//! - A plugin framework with tiered policies (gang, drf, predicates,
//!   priority, nodeorder, capacity, conformance)
//! - Actions: enqueue, allocate, backfill, preempt, reclaim, shuffle
//! - The cycle driver and scheduler loop
//! - An in-memory cluster-state provider

pub mod actions;
pub mod cache;
pub mod conf;
pub mod decision;
pub mod error;
pub mod framework;
pub mod mock;
pub mod plugins;
pub mod provider;
pub mod scheduler;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cache::{CacheConfig, ClusterSnapshot, SchedulerCache};
pub use conf::SchedulerConfiguration;
pub use decision::{Decision, DecisionGroup};
pub use error::{Result, SchedulerError};
pub use framework::{CycleReport, Framework};
pub use mock::{InMemoryProvider, ProviderConfig};
pub use provider::{ClusterStateProvider, JobStatus};
pub use scheduler::{PolicySource, Scheduler, SchedulerConfig};
