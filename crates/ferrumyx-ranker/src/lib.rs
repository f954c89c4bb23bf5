//! ferrumyx-ranker — Signal extraction, rank statistics and aggregation
//! policy comparison for biomarker evidence.

pub mod signal;
pub mod rank;
pub mod policy;
pub mod aggregation;

pub use aggregation::{compare_policies, feature_ranking, reduced_vs_full, tiered_scores, Recommendation};
pub use policy::{AggregationPolicy, PolicyRegistry};
pub use rank::{auroc, auroc_with, average_precision};
