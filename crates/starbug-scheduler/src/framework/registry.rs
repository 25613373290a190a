use crate::conf::{Arguments, TierConfig};
use crate::error::{Result, SchedulerError};
use crate::framework::plugin::{CapabilitySet, Tier};
use std::collections::BTreeMap;
use tracing::debug;

/// Builds a plugin's capability set from its configured arguments
pub type PluginBuilder = fn(&Arguments) -> Result<CapabilitySet>;

/// Plugin name to builder
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    builders: BTreeMap<String, PluginBuilder>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_defaults(&mut registry);
        registry
    }

    /// Register (or replace) a plugin builder
    pub fn register(&mut self, name: impl Into<String>, builder: PluginBuilder) {
        self.builders.insert(name.into(), builder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Registered names, comma separated
    pub fn known(&self) -> String {
        self.builders
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Resolve configured tiers into capability sets
    pub fn build_tiers(&self, tiers: &[TierConfig]) -> Result<Vec<Tier>> {
        tiers
            .iter()
            .map(|tier| {
                let plugins = tier
                    .plugins
                    .iter()
                    .map(|option| {
                        let builder = self.builders.get(&option.name).ok_or_else(|| {
                            SchedulerError::unknown_plugin(option.name.as_str(), self.known())
                        })?;
                        let mut set = builder(&option.arguments)?;
                        set.name = option.name.clone();
                        debug!("Built plugin {:?}", set);
                        Ok(set)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Tier::new(plugins))
            })
            .collect()
    }
}
