//! Scheduler policy configuration
//!
//! The policy names the actions run each cycle, the plugin tiers and
//! per-plugin or per-action arguments:
//!
//! ```yaml
//! actions: [enqueue, allocate, preempt, reclaim, backfill]
//! tiers:
//!   - plugins:
//!       - name: priority
//!       - name: gang
//!   - plugins:
//!       - name: drf
//!         arguments: { resourceWeights: { cpu: 1.0 } }
//!       - name: predicates
//!       - name: nodeorder
//! configurations:
//!   - name: shuffle
//!     arguments: { lowUtilizationThreshold: 0.25 }
//! ```

use crate::error::{Result, SchedulerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Free-form arguments attached to a plugin or action
///
/// Decoded lazily into the owner's typed argument struct so that a
/// malformed value fails the session that resolves it, not process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(pub serde_yaml::Value);

impl Default for Arguments {
    fn default() -> Self {
        Self(serde_yaml::Value::Null)
    }
}

impl Arguments {
    /// Decode into `T`, using `T::default()` when no arguments were given
    pub fn parse<T: DeserializeOwned + Default>(&self, owner: &str) -> Result<T> {
        if self.0.is_null() {
            return Ok(T::default());
        }
        serde_yaml::from_value(self.0.clone())
            .map_err(|e| SchedulerError::invalid_arguments(owner, e.to_string()))
    }
}

/// One plugin entry in a tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginOption {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

impl PluginOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Arguments::default(),
        }
    }

    /// Builder: attach arguments
    pub fn with_arguments(mut self, arguments: serde_yaml::Value) -> Self {
        self.arguments = Arguments(arguments);
        self
    }
}

/// An ordered group of plugins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    pub plugins: Vec<PluginOption>,
}

/// Arguments for one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfiguration {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// Scheduler policy: actions, plugin tiers and action arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchedulerConfiguration {
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub configurations: Vec<ActionConfiguration>,
}

fn default_actions() -> Vec<String> {
    ["enqueue", "allocate", "preempt", "reclaim", "backfill"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SchedulerConfiguration {
    fn default() -> Self {
        let tier = |names: &[&str]| TierConfig {
            plugins: names.iter().map(|n| PluginOption::new(*n)).collect(),
        };
        Self {
            actions: default_actions(),
            tiers: vec![
                tier(&["priority", "gang", "conformance"]),
                tier(&["drf", "predicates", "capacity", "nodeorder"]),
            ],
            configurations: Vec::new(),
        }
    }
}

impl SchedulerConfiguration {
    /// Parse and validate a YAML policy
    pub fn from_yaml(data: &str) -> Result<Self> {
        let conf: SchedulerConfiguration = serde_yaml::from_str(data).map_err(|e| {
            SchedulerError::invalid_configuration(
                format!("failed to parse policy: {}", e),
                "The policy must be a YAML document with 'actions' and 'tiers'",
            )
        })?;
        conf.validate()?;
        Ok(conf)
    }

    /// Read, parse and validate a YAML policy file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::invalid_configuration(
                format!("failed to read {}: {}", path.display(), e),
                "Check that the policy file exists and is readable",
            )
        })?;
        Self::from_yaml(&data)
    }

    /// Structural checks that do not need the registries
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(SchedulerError::invalid_configuration(
                "no actions configured",
                "List at least one action, e.g. 'actions: [enqueue, allocate]'",
            ));
        }
        if self.tiers.is_empty() {
            return Err(SchedulerError::invalid_configuration(
                "no tiers configured",
                "Declare at least one tier with one plugin",
            ));
        }

        let mut seen = BTreeSet::new();
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.plugins.is_empty() {
                return Err(SchedulerError::invalid_configuration(
                    format!("tier {} has no plugins", i),
                    "Remove the empty tier or add plugins to it",
                ));
            }
            for plugin in &tier.plugins {
                if !seen.insert(plugin.name.as_str()) {
                    return Err(SchedulerError::invalid_configuration(
                        format!("plugin {} is listed more than once", plugin.name),
                        "Each plugin may appear in exactly one tier",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Arguments configured for an action (empty when none)
    pub fn action_arguments(&self, action: &str) -> Arguments {
        self.configurations
            .iter()
            .find(|c| c.name == action)
            .map(|c| c.arguments.clone())
            .unwrap_or_default()
    }
}
