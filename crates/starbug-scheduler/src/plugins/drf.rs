use crate::conf::Arguments;
use crate::error::{Result, SchedulerError};
use crate::framework::CapabilitySet;
use crate::plugins::{cmp_f64, queue_share};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NAME: &str = "drf";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DrfArguments {
    /// Per-dimension weight applied to shares; unnamed dimensions weigh 1
    pub resource_weights: BTreeMap<String, f64>,
}

/// Dominant resource fairness
///
/// Queues are served in ascending order of their dominant share of the
/// effective deserved resources. Jobs are ordered by their queue's share;
/// jobs of equally served queues fall through to submission time.
pub fn build(args: &Arguments) -> Result<CapabilitySet> {
    let args: DrfArguments = args.parse(NAME)?;
    if let Some((name, weight)) = args
        .resource_weights
        .iter()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(SchedulerError::invalid_arguments(
            NAME,
            format!("weight of {} must be a non-negative number, got {}", name, weight),
        ));
    }
    let weights = Arc::new(args.resource_weights);
    let queue_weights = weights.clone();

    Ok(CapabilitySet::new(NAME)
        .with_queue_order(move |ssn, a, b| {
            cmp_f64(
                queue_share(ssn, a, &queue_weights),
                queue_share(ssn, b, &queue_weights),
            )
        })
        .with_job_order(move |ssn, a, b| {
            cmp_f64(
                queue_share(ssn, &a.queue, &weights),
                queue_share(ssn, &b.queue, &weights),
            )
        }))
}
