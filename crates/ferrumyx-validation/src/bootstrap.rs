//! Stratified bootstrap confidence intervals for AUROC and PR-AUC.
//!
//! Each class is resampled with replacement at its original size, so every
//! replicate keeps both classes. Replicate `i` owns an RNG seeded from
//! `(seed, i)`, which makes the output independent of rayon's scheduling.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use ferrumyx_common::cohort::{Cohort, SignalDefinition};
use ferrumyx_common::config::{BootstrapConfig, EngineConfig, TieConvention};
use ferrumyx_common::error::{FerrumyxError, Result};
use ferrumyx_ranker::aggregation::score_patients;
use ferrumyx_ranker::policy::AggregationPolicy;
use ferrumyx_ranker::rank::{auroc_with, average_precision};

/// SplitMix64 finaliser over `seed + replicate`.
pub fn replicate_seed(seed: u64, replicate: u64) -> u64 {
    let mut z = seed.wrapping_add(replicate.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Percentile `q` in [0, 100] of ascending `sorted`, linear interpolation
/// between order statistics. NaN for an empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// One metric's bootstrap distribution, flattened for CSV output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric: String,
    pub point_estimate: f64,
    pub mean: f64,
    pub p2_5: f64,
    pub p50: f64,
    pub p97_5: f64,
    /// replicates with a finite metric value
    pub n_valid: usize,
}

impl MetricSummary {
    /// NaN replicate values are dropped before folding.
    pub fn from_replicates(metric: &str, point_estimate: f64, values: &[f64]) -> Self {
        let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        finite.sort_by(|a, b| a.total_cmp(b));
        let mean = if finite.is_empty() {
            f64::NAN
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        Self {
            metric: metric.to_string(),
            point_estimate,
            mean,
            p2_5: percentile(&finite, 2.5),
            p50: percentile(&finite, 50.0),
            p97_5: percentile(&finite, 97.5),
            n_valid: finite.len(),
        }
    }

    pub fn ci_width(&self) -> f64 {
        self.p97_5 - self.p2_5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub n_pos: usize,
    pub n_neg: usize,
    pub seed: u64,
    pub replicates_requested: usize,
    pub replicates_completed: usize,
    pub cancelled: bool,
    pub auroc: MetricSummary,
    pub pr_auc: MetricSummary,
}

fn replicate(
    pos: &[f64],
    neg: &[f64],
    seed: u64,
    index: usize,
    ties: TieConvention,
) -> (f64, f64) {
    let mut rng = StdRng::seed_from_u64(replicate_seed(seed, index as u64));
    let mut labels = Vec::with_capacity(pos.len() + neg.len());
    let mut scores = Vec::with_capacity(pos.len() + neg.len());
    for _ in 0..pos.len() {
        labels.push(true);
        scores.push(pos[rng.gen_range(0..pos.len())]);
    }
    for _ in 0..neg.len() {
        labels.push(false);
        scores.push(neg[rng.gen_range(0..neg.len())]);
    }
    (auroc_with(&labels, &scores, ties), average_precision(&labels, &scores))
}

/// Stratified bootstrap over pre-computed scores.
///
/// `cancel` is polled before each replicate; replicates finished before the
/// flag was raised are kept and summarised.
pub fn bootstrap(
    labels: &[bool],
    scores: &[f64],
    config: &BootstrapConfig,
    ties: TieConvention,
    cancel: Option<&AtomicBool>,
) -> Result<BootstrapResult> {
    if labels.len() != scores.len() {
        return Err(FerrumyxError::DataShape(format!(
            "{} labels but {} scores",
            labels.len(),
            scores.len()
        )));
    }
    let pos: Vec<f64> = labels.iter().zip(scores).filter(|(y, _)| **y).map(|(_, s)| *s).collect();
    let neg: Vec<f64> = labels.iter().zip(scores).filter(|(y, _)| !**y).map(|(_, s)| *s).collect();
    if pos.is_empty() || neg.is_empty() {
        return Err(FerrumyxError::DegenerateClass(format!(
            "bootstrap needs both classes, got {} positive and {} negative",
            pos.len(),
            neg.len()
        )));
    }

    let draws: Vec<Option<(f64, f64)>> = (0..config.replicates)
        .into_par_iter()
        .map(|i| {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return None;
            }
            Some(replicate(&pos, &neg, config.seed, i, ties))
        })
        .collect();

    let completed: Vec<(f64, f64)> = draws.into_iter().flatten().collect();
    let cancelled = completed.len() < config.replicates;
    if cancelled {
        tracing::warn!(
            requested = config.replicates,
            completed = completed.len(),
            "Bootstrap cancelled"
        );
    }

    let aurocs: Vec<f64> = completed.iter().map(|(a, _)| *a).collect();
    let pr_aucs: Vec<f64> = completed.iter().map(|(_, p)| *p).collect();

    let result = BootstrapResult {
        n_pos: pos.len(),
        n_neg: neg.len(),
        seed: config.seed,
        replicates_requested: config.replicates,
        replicates_completed: completed.len(),
        cancelled,
        auroc: MetricSummary::from_replicates("auroc", auroc_with(labels, scores, ties), &aurocs),
        pr_auc: MetricSummary::from_replicates("pr_auc", average_precision(labels, scores), &pr_aucs),
    };
    tracing::info!(
        replicates = result.replicates_completed,
        auroc_p2_5 = result.auroc.p2_5,
        auroc_p97_5 = result.auroc.p97_5,
        "Bootstrap finished"
    );
    Ok(result)
}

/// Score the labeled cohort with `policy`, then bootstrap the scores.
pub fn bootstrap_signal(
    cohort: &Cohort,
    signal: &SignalDefinition,
    policy: &dyn AggregationPolicy,
    config: &EngineConfig,
    cancel: Option<&AtomicBool>,
) -> Result<BootstrapResult> {
    if signal.is_empty() {
        return Err(FerrumyxError::DataShape(format!("signal '{}' has no features", signal.name)));
    }
    let labeled = cohort.labeled(&config.labels);
    labeled.require_min(config.validation.min_labeled)?;
    let scores = score_patients(&labeled, signal, policy);
    bootstrap(
        &labeled.labels(),
        &scores,
        &config.bootstrap,
        config.ranking.tie_convention,
        cancel,
    )
}
