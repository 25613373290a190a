pub mod quantities;

pub use quantities::{format_quantity, parse_quantity, CPU, MEMORY};

use crate::error::{CoreError, Result};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

/// Multi-dimensional resource quantity
///
/// Each kind is stored in its base unit (see [`quantities`]): CPU in
/// millicores, byte-counted kinds in bytes, every other kind in
/// milli-units. A missing kind is zero; zero entries are never stored,
/// so two resources compare equal exactly when every dimension does.
///
/// Arithmetic is component-wise. [`Resource::sub`] and
/// [`Resource::checked_sub`] refuse to go below zero on any dimension;
/// [`Resource::saturating_sub`] is the explicit best-effort variant for
/// speculative checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    quantities: BTreeMap<String, i64>,
}

impl Resource {
    /// Create an empty resource
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resource from base-unit pairs
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let mut resource = Self::new();
        for (name, value) in pairs {
            resource.set(name, value);
        }
        resource
    }

    /// Parse a resource from quantity strings, e.g. `[("cpu", "2"), ("memory", "1Gi")]`
    pub fn parse<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut resource = Self::new();
        for (name, value) in pairs {
            let parsed = parse_quantity(name, value)?;
            resource.set(name, resource.get(name) + parsed);
        }
        Ok(resource)
    }

    /// Shorthand for a CPU-only resource in whole cores
    pub fn cpu(cores: i64) -> Self {
        Self::from_pairs([(CPU, cores * 1000)])
    }

    /// Builder-style setter
    pub fn with(mut self, name: impl Into<String>, value: i64) -> Self {
        self.set(name, value);
        self
    }

    /// Quantity of a kind in base units (zero when absent)
    pub fn get(&self, name: &str) -> i64 {
        self.quantities.get(name).copied().unwrap_or(0)
    }

    /// Set the quantity of a kind; zero removes the entry
    pub fn set(&mut self, name: impl Into<String>, value: i64) {
        let name = name.into();
        if value == 0 {
            self.quantities.remove(&name);
        } else {
            self.quantities.insert(name, value);
        }
    }

    /// Iterate over non-zero dimensions
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.quantities.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Names of the non-zero dimensions
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.quantities.keys().map(String::as_str)
    }

    /// True when every dimension is zero
    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    /// Add another resource component-wise
    pub fn add(&mut self, other: &Resource) -> &mut Self {
        for (name, value) in other.iter() {
            self.set(name, self.get(name) + value);
        }
        self
    }

    /// Subtract another resource component-wise
    ///
    /// Fails without modifying `self` if any dimension would go below zero.
    pub fn sub(&mut self, other: &Resource) -> Result<&mut Self> {
        if let Some((name, requested, available)) = self.first_shortfall(other) {
            return Err(CoreError::insufficient_resource(name, requested, available));
        }
        for (name, value) in other.iter() {
            self.set(name, self.get(name) - value);
        }
        Ok(self)
    }

    /// Non-mutating form of [`Resource::sub`]
    pub fn checked_sub(&self, other: &Resource) -> Result<Resource> {
        let mut result = self.clone();
        result.sub(other)?;
        Ok(result)
    }

    /// Best-effort subtraction that clamps each dimension at zero
    pub fn saturating_sub(&self, other: &Resource) -> Resource {
        let mut result = self.clone();
        for (name, value) in other.iter() {
            result.set(name, (result.get(name) - value).max(0));
        }
        result
    }

    /// Scale every dimension by a non-negative factor, rounding down
    pub fn scale(&self, factor: f64) -> Resource {
        let factor = factor.max(0.0);
        Resource::from_pairs(
            self.iter()
                .map(|(name, value)| (name.to_string(), (value as f64 * factor).floor() as i64)),
        )
    }

    /// Component-wise `self <= other`, treating missing dimensions as zero
    pub fn less_equal(&self, other: &Resource) -> bool {
        other.first_shortfall(self).is_none()
    }

    /// Component-wise `self <= limit`, considering only dimensions the limit names
    ///
    /// Dimensions absent from the limit are unbounded. Used for queue
    /// ceilings, which usually cap only a few kinds.
    pub fn within_limit(&self, limit: &Resource) -> bool {
        limit.iter().all(|(name, cap)| self.get(name) <= cap)
    }

    /// Component-wise minimum
    pub fn min(&self, other: &Resource) -> Resource {
        let mut result = Resource::new();
        for name in self.names() {
            result.set(name, self.get(name).min(other.get(name)));
        }
        result
    }

    /// Component-wise maximum
    pub fn max(&self, other: &Resource) -> Resource {
        let mut result = self.clone();
        for (name, value) in other.iter() {
            result.set(name, result.get(name).max(value));
        }
        result
    }

    /// Dimensions on which `self` (a request) exceeds `available`
    pub fn insufficient_dimensions(&self, available: &Resource) -> Vec<String> {
        self.iter()
            .filter(|(name, value)| *value > available.get(name))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Ratio of `self` to `total` on one dimension
    ///
    /// A zero total yields 1.0 when anything is used and 0.0 otherwise.
    pub fn ratio(&self, total: &Resource, name: &str) -> f64 {
        share(self.get(name), total.get(name))
    }

    // Dimension where self cannot cover `other`: (name, requested, available)
    fn first_shortfall(&self, other: &Resource) -> Option<(String, i64, i64)> {
        other
            .iter()
            .find(|(name, value)| *value > self.get(name))
            .map(|(name, value)| (name.to_string(), value, self.get(name)))
    }
}

/// Share of `used` over `total`, saturating to 1.0 when the total is zero
pub fn share(used: i64, total: i64) -> f64 {
    if total == 0 {
        if used == 0 {
            0.0
        } else {
            1.0
        }
    } else {
        used as f64 / total as f64
    }
}

impl AddAssign<&Resource> for Resource {
    fn add_assign(&mut self, other: &Resource) {
        Resource::add(self, other);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<empty>");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(name, value)| format!("{} {}", name, format_quantity(name, value)))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.quantities.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &format_quantity(name, value))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ResourceVisitor;

        impl<'de> Visitor<'de> for ResourceVisitor {
            type Value = Resource;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a map of resource names to quantity strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Resource, A::Error> {
                let mut resource = Resource::new();
                while let Some((name, value)) = access.next_entry::<String, QuantityValue>()? {
                    let raw = value.into_string();
                    let parsed = parse_quantity(&name, &raw).map_err(serde::de::Error::custom)?;
                    resource.set(name, parsed);
                }
                Ok(resource)
            }
        }

        deserializer.deserialize_map(ResourceVisitor)
    }
}

/// Quantities may be written as strings or bare numbers in YAML
#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl QuantityValue {
    fn into_string(self) -> String {
        match self {
            QuantityValue::Text(s) => s,
            QuantityValue::Integer(i) => i.to_string(),
            QuantityValue::Float(f) => f.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_sub() {
        let mut a = Resource::cpu(4).with(MEMORY, 1024);
        a.add(&Resource::cpu(2));
        assert_eq!(a.get(CPU), 6000);

        a.sub(&Resource::cpu(6)).unwrap();
        assert_eq!(a.get(CPU), 0);
        assert_eq!(a, Resource::new().with(MEMORY, 1024));
    }

    #[test]
    fn test_sub_below_zero_is_error_and_leaves_value() {
        let mut a = Resource::cpu(1);
        let err = a.sub(&Resource::cpu(2)).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientResource { .. }));
        assert_eq!(a, Resource::cpu(1));

        let err = a.checked_sub(&Resource::new().with(MEMORY, 1)).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_saturating_sub_clamps() {
        let a = Resource::cpu(1).with(MEMORY, 10);
        let b = a.saturating_sub(&Resource::cpu(3).with(MEMORY, 4));
        assert_eq!(b, Resource::new().with(MEMORY, 6));
    }

    #[test]
    fn test_less_equal_and_within_limit() {
        let small = Resource::cpu(1).with(MEMORY, 10);
        let big = Resource::cpu(2).with(MEMORY, 10);
        assert!(small.less_equal(&big));
        assert!(!big.less_equal(&small));
        assert!(Resource::new().less_equal(&small));

        // Limit only names cpu, memory is unbounded
        assert!(big.within_limit(&Resource::cpu(2)));
        assert!(!big.within_limit(&Resource::cpu(1)));
        assert!(!big.less_equal(&Resource::cpu(2)));
    }

    #[test]
    fn test_scale_min_max() {
        let a = Resource::cpu(10).with(MEMORY, 100);
        assert_eq!(a.scale(0.6), Resource::cpu(6).with(MEMORY, 60));

        let b = Resource::cpu(4).with(MEMORY, 200);
        assert_eq!(a.min(&b), Resource::cpu(4).with(MEMORY, 100));
        assert_eq!(a.max(&b), Resource::cpu(10).with(MEMORY, 200));
    }

    #[test]
    fn test_insufficient_dimensions() {
        let req = Resource::cpu(2).with(MEMORY, 10);
        let avail = Resource::cpu(1).with(MEMORY, 10);
        assert_eq!(req.insufficient_dimensions(&avail), vec!["cpu".to_string()]);
    }

    #[test]
    fn test_share() {
        assert_eq!(share(0, 0), 0.0);
        assert_eq!(share(5, 0), 1.0);
        assert_eq!(share(5, 10), 0.5);
    }

    #[test]
    fn test_serde_quantity_strings() {
        let yaml = "cpu: \"500m\"\nmemory: 1Gi\nnvidia.com/gpu: 1\n";
        let r: Resource = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(r.get(CPU), 500);
        assert_eq!(r.get(MEMORY), 1024 * 1024 * 1024);
        assert_eq!(r.get("nvidia.com/gpu"), 1000);

        let out = serde_json::to_value(&r).unwrap();
        assert_eq!(out["cpu"], "500m");
        assert_eq!(out["memory"], "1Gi");
    }

    #[test]
    fn test_display() {
        assert_eq!(Resource::new().to_string(), "<empty>");
        assert_eq!(Resource::cpu(2).to_string(), "cpu 2");
    }
}
