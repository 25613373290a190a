//! Fair-share arithmetic shared by the session and the fairness plugins

use starbug_core::{share, QueueId, Resource};
use std::collections::BTreeMap;

/// What a queue asks for when capacity is divided
#[derive(Debug, Clone)]
pub struct QueueDemand {
    pub name: QueueId,
    pub weight: u32,
    /// Explicitly configured guarantee
    pub deserved: Option<Resource>,
    /// Hard ceiling
    pub capability: Option<Resource>,
    /// Requests of every non-terminal task in the queue
    pub request: Resource,
}

/// Divide the cluster total into per-queue deserved shares
///
/// Explicit guarantees are honoured first, scaled down per dimension
/// when they add up to more than the cluster has. What is left is
/// water-filled among the remaining queues by weight; a queue never
/// receives more than it requests or than its ceiling allows, and its
/// surplus is handed on to the others.
pub fn effective_deserved(demands: &[QueueDemand], total: &Resource) -> BTreeMap<QueueId, Resource> {
    let mut result: BTreeMap<QueueId, Resource> = demands
        .iter()
        .map(|d| (d.name.clone(), Resource::new()))
        .collect();

    let mut names: Vec<String> = total.names().map(str::to_string).collect();
    for demand in demands {
        if let Some(deserved) = &demand.deserved {
            names.extend(deserved.names().map(str::to_string));
        }
    }
    names.sort();
    names.dedup();

    for name in &names {
        let available = total.get(name);
        let explicit: i64 = demands
            .iter()
            .filter_map(|d| d.deserved.as_ref())
            .map(|r| r.get(name))
            .sum();

        let mut remaining = available;
        if explicit > 0 {
            let factor = if explicit > available {
                available as f64 / explicit as f64
            } else {
                1.0
            };
            for demand in demands {
                if let Some(deserved) = &demand.deserved {
                    let value = (deserved.get(name) as f64 * factor).floor() as i64;
                    remaining -= value;
                    set(&mut result, &demand.name, name, value);
                }
            }
        }

        let mut active: Vec<(&QueueDemand, i64)> = demands
            .iter()
            .filter(|d| d.deserved.is_none() && d.weight > 0)
            .map(|d| (d, ceiling(d, name)))
            .collect();

        while remaining > 0 && !active.is_empty() {
            let weight_sum: f64 = active.iter().map(|(d, _)| d.weight as f64).sum();
            let fair = |d: &QueueDemand| remaining as f64 * d.weight as f64 / weight_sum;

            let (capped, open): (Vec<_>, Vec<_>) = active
                .into_iter()
                .partition(|(d, cap)| (*cap as f64) <= fair(d));

            if capped.is_empty() {
                for (demand, _) in &open {
                    set(&mut result, &demand.name, name, fair(demand).floor() as i64);
                }
                break;
            }
            for (demand, cap) in capped {
                remaining -= cap;
                set(&mut result, &demand.name, name, cap);
            }
            active = open;
        }
    }
    result
}

/// Most a queue without a guarantee can use on one dimension
fn ceiling(demand: &QueueDemand, name: &str) -> i64 {
    let request = demand.request.get(name);
    match &demand.capability {
        Some(cap) if cap.names().any(|n| n == name) => request.min(cap.get(name)),
        _ => request,
    }
}

fn set(result: &mut BTreeMap<QueueId, Resource>, queue: &QueueId, name: &str, value: i64) {
    if let Some(resource) = result.get_mut(queue) {
        resource.set(name, value.max(0));
    }
}

/// Largest weighted `used / base` ratio over the dimensions in use
///
/// Dimensions without a weight count with weight 1.
pub fn dominant_share(used: &Resource, base: &Resource, weights: &BTreeMap<String, f64>) -> f64 {
    used.iter()
        .map(|(name, value)| {
            let weight = weights.get(name).copied().unwrap_or(1.0);
            weight * share(value, base.get(name))
        })
        .fold(0.0, f64::max)
}
