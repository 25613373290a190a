//! Scheduling actions
//!
//! Each action is one algorithm run over the session per cycle, in the
//! order the policy lists them. Actions change the session only through
//! statements, so a gang that cannot be completed leaves no trace.

pub mod allocate;
pub mod backfill;
pub mod enqueue;
pub mod preempt;
pub mod reclaim;
pub mod shuffle;
mod victims;

pub use allocate::Allocate;
pub use backfill::Backfill;
pub use enqueue::Enqueue;
pub use preempt::Preempt;
pub use reclaim::Reclaim;
pub use shuffle::Shuffle;

use crate::conf::{Arguments, SchedulerConfiguration};
use crate::error::{Result, SchedulerError};
use crate::framework::Session;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One step of the scheduling pipeline
pub trait Action: Send + Sync {
    /// Name used in the policy
    fn name(&self) -> &str;

    /// Run over the session
    fn execute(&self, ssn: &mut Session);
}

/// Builds an action from its configured arguments
pub type ActionBuilder = fn(&Arguments) -> Result<Arc<dyn Action>>;

/// Action name to builder
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    builders: BTreeMap<String, ActionBuilder>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(enqueue::NAME, |_| Ok(Arc::new(Enqueue)));
        registry.register(allocate::NAME, |_| Ok(Arc::new(Allocate)));
        registry.register(backfill::NAME, |_| Ok(Arc::new(Backfill)));
        registry.register(preempt::NAME, |_| Ok(Arc::new(Preempt)));
        registry.register(reclaim::NAME, |_| Ok(Arc::new(Reclaim)));
        registry.register(shuffle::NAME, |args| Ok(Arc::new(Shuffle::new(args)?)));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, builder: ActionBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Registered names, comma separated
    pub fn known(&self) -> String {
        self.builders
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build the actions a policy lists, in order
    pub fn resolve(&self, conf: &SchedulerConfiguration) -> Result<Vec<Arc<dyn Action>>> {
        conf.actions
            .iter()
            .map(|name| {
                let builder = self
                    .builders
                    .get(name)
                    .ok_or_else(|| SchedulerError::unknown_action(name.as_str(), self.known()))?;
                builder(&conf.action_arguments(name))
            })
            .collect()
    }
}
