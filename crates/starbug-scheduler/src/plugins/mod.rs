//! Built-in plugins
//!
//! Every plugin is a builder turning its configured arguments into a
//! [`CapabilitySet`](crate::framework::CapabilitySet).

pub mod capacity;
pub mod conformance;
pub mod drf;
pub mod gang;
pub mod nodeorder;
pub mod predicates;
pub mod priority;

use crate::framework::share::dominant_share;
use crate::framework::{PluginRegistry, Session};
use starbug_core::QueueId;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Register every built-in plugin
pub fn register_defaults(registry: &mut PluginRegistry) {
    registry.register(priority::NAME, priority::build);
    registry.register(gang::NAME, gang::build);
    registry.register(conformance::NAME, conformance::build);
    registry.register(drf::NAME, drf::build);
    registry.register(predicates::NAME, predicates::build);
    registry.register(nodeorder::NAME, nodeorder::build);
    registry.register(capacity::NAME, capacity::build);
}

/// Weighted dominant share of a queue's allocation over its deserved share
pub(crate) fn queue_share(ssn: &Session, queue: &QueueId, weights: &BTreeMap<String, f64>) -> f64 {
    ssn.queue_attr(queue)
        .map(|attr| dominant_share(&attr.allocated, &attr.deserved, weights))
        .unwrap_or(0.0)
}

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}
