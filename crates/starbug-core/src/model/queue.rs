use crate::resources::Resource;
use crate::types::{QueueId, QueueState};
use serde::{Deserialize, Serialize};

/// Queue specification as owned by the external queue controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub name: QueueId,
    /// Relative weight used when dividing unclaimed capacity
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Hard ceiling on the queue's usage
    #[serde(default)]
    pub capability: Option<Resource>,
    /// Guaranteed share
    #[serde(default)]
    pub deserved: Option<Resource>,
    #[serde(default)]
    pub state: QueueState,
    #[serde(default)]
    pub resource_version: u64,
}

fn default_weight() -> u32 {
    1
}

impl QueueInfo {
    pub fn new(name: impl Into<QueueId>) -> Self {
        Self {
            name: name.into(),
            weight: default_weight(),
            capability: None,
            deserved: None,
            state: QueueState::Open,
            resource_version: 0,
        }
    }

    /// Builder: set the guaranteed share
    pub fn with_deserved(mut self, deserved: Resource) -> Self {
        self.deserved = Some(deserved);
        self
    }

    /// Builder: set the hard ceiling
    pub fn with_capability(mut self, capability: Resource) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Builder: set the weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == QueueState::Open
    }
}
