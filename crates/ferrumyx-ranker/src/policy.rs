//! Aggregation policies: patient-level scores from per-variant signal lists.

use ferrumyx_common::error::{FerrumyxError, Result};

/// Combines per-variant `v_max` / `v_sum` lists into one patient score.
/// Implementations must be pure.
pub trait AggregationPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn aggregate(&self, v_max: &[f64], v_sum: &[f64]) -> f64;
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// max(v_max), 0 when empty.
pub struct MaxOfMax;

impl AggregationPolicy for MaxOfMax {
    fn name(&self) -> &str {
        "max_of_max"
    }

    fn aggregate(&self, v_max: &[f64], _v_sum: &[f64]) -> f64 {
        v_max.iter().copied().fold(0.0, f64::max)
    }
}

/// sum(v_max), 0 when empty.
pub struct SumOfMax;

impl AggregationPolicy for SumOfMax {
    fn name(&self) -> &str {
        "sum_of_max"
    }

    fn aggregate(&self, v_max: &[f64], _v_sum: &[f64]) -> f64 {
        v_max.iter().sum()
    }
}

/// Mean of the k largest v_max entries; all entries when fewer than k.
pub struct TopKMean {
    pub k: usize,
}

impl Default for TopKMean {
    fn default() -> Self {
        Self { k: 3 }
    }
}

impl AggregationPolicy for TopKMean {
    fn name(&self) -> &str {
        "top_k_mean"
    }

    fn aggregate(&self, v_max: &[f64], _v_sum: &[f64]) -> f64 {
        let mut sorted = v_max.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        sorted.truncate(self.k.max(1));
        mean(&sorted)
    }
}

/// mean(v_sum), 0 when empty.
pub struct MeanOfSum;

impl AggregationPolicy for MeanOfSum {
    fn name(&self) -> &str {
        "mean_of_sum"
    }

    fn aggregate(&self, _v_max: &[f64], v_sum: &[f64]) -> f64 {
        mean(v_sum)
    }
}

/// Adapter for registering a closure as a policy.
pub struct FnPolicy<F> {
    name: String,
    f: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&[f64], &[f64]) -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> AggregationPolicy for FnPolicy<F>
where
    F: Fn(&[f64], &[f64]) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate(&self, v_max: &[f64], v_sum: &[f64]) -> f64 {
        (self.f)(v_max, v_sum)
    }
}

/// Ordered set of named policies. Registration order breaks AUROC ties.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: Vec<Box<dyn AggregationPolicy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in policies, `top_k_mean` using `top_k`.
    pub fn with_defaults(top_k: usize) -> Self {
        let mut registry = Self::new();
        registry.policies.push(Box::new(MaxOfMax));
        registry.policies.push(Box::new(SumOfMax));
        registry.policies.push(Box::new(TopKMean { k: top_k }));
        registry.policies.push(Box::new(MeanOfSum));
        registry
    }

    pub fn register(&mut self, policy: Box<dyn AggregationPolicy>) -> Result<()> {
        if self.get(policy.name()).is_some() {
            return Err(FerrumyxError::Config(format!(
                "aggregation policy '{}' is already registered",
                policy.name()
            )));
        }
        self.policies.push(policy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn AggregationPolicy> {
        self.policies
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    pub fn policies(&self) -> &[Box<dyn AggregationPolicy>] {
        &self.policies
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
