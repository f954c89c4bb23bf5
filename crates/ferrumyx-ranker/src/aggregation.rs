//! Policy comparison harness, per-feature ranking and the reduced-vs-full
//! feature-set decision.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use ferrumyx_common::cohort::{Cohort, LabeledCohort, SignalDefinition};
use ferrumyx_common::confidence::{classify_tier, ConfidenceTier, ScoreCap};
use ferrumyx_common::config::{EngineConfig, TieConvention, TierConfig};
use ferrumyx_common::error::{FerrumyxError, Result};

use crate::policy::{AggregationPolicy, PolicyRegistry};
use crate::rank::{auroc_with, descending_nan_last};
use crate::signal::{patient_feature_value, patient_signal, PatientSignal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientScore {
    pub patient_id: String,
    pub positive: bool,
    pub score: f64,
}

/// One policy's outcome over a labeled cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub policy: String,
    pub scores: Vec<PatientScore>,
    pub auroc: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyComparison {
    pub signal: String,
    pub n_labeled: usize,
    pub n_pos: usize,
    pub n_neg: usize,
    pub unlabeled: usize,
    /// Sorted by AUROC descending; `rank` is 1..N in this order.
    pub results: Vec<AggregationResult>,
}

fn require_signal(signal: &SignalDefinition) -> Result<()> {
    if signal.is_empty() {
        return Err(FerrumyxError::DataShape(format!("signal '{}' has no features", signal.name)));
    }
    Ok(())
}

fn labeled_cohort<'a>(cohort: &'a Cohort, config: &EngineConfig) -> Result<LabeledCohort<'a>> {
    let labeled = cohort.labeled(&config.labels);
    labeled.require_min(config.validation.min_labeled)?;
    Ok(labeled)
}

/// Score every labeled patient with one policy.
pub fn score_patients(
    labeled: &LabeledCohort<'_>,
    signal: &SignalDefinition,
    policy: &dyn AggregationPolicy,
) -> Vec<f64> {
    labeled
        .patients
        .iter()
        .map(|lp| {
            let ps = patient_signal(lp.patient, signal);
            policy.aggregate(&ps.v_max, &ps.v_sum)
        })
        .collect()
}

/// AUROC of a policy's composite score over a labeled cohort.
pub fn composite_auroc(
    labeled: &LabeledCohort<'_>,
    signal: &SignalDefinition,
    policy: &dyn AggregationPolicy,
    ties: TieConvention,
) -> f64 {
    auroc_with(&labeled.labels(), &score_patients(labeled, signal, policy), ties)
}

/// Run every registered policy, rank by AUROC (stable, NaN last).
pub fn compare_policies(
    cohort: &Cohort,
    signal: &SignalDefinition,
    registry: &PolicyRegistry,
    config: &EngineConfig,
) -> Result<PolicyComparison> {
    require_signal(signal)?;
    let labeled = labeled_cohort(cohort, config)?;
    let labels = labeled.labels();
    let ties = config.ranking.tie_convention;

    let signals: Vec<PatientSignal> = labeled
        .patients
        .iter()
        .map(|lp| patient_signal(lp.patient, signal))
        .collect();

    // Indexed parallel collect keeps registration order.
    let mut results: Vec<AggregationResult> = registry
        .policies()
        .par_iter()
        .map(|policy| {
            let scores: Vec<f64> = signals
                .iter()
                .map(|ps| policy.aggregate(&ps.v_max, &ps.v_sum))
                .collect();
            let auroc = auroc_with(&labels, &scores, ties);
            AggregationResult {
                policy: policy.name().to_string(),
                scores: labeled
                    .patients
                    .iter()
                    .zip(&scores)
                    .map(|(lp, s)| PatientScore {
                        patient_id: lp.patient.id.clone(),
                        positive: lp.positive,
                        score: *s,
                    })
                    .collect(),
                auroc,
                rank: 0,
            }
        })
        .collect();

    results.sort_by(|a, b| descending_nan_last(a.auroc, b.auroc));
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }

    tracing::info!(
        signal = %signal.name,
        policies = results.len(),
        best = results.first().map(|r| r.policy.as_str()).unwrap_or("-"),
        "Policy comparison finished"
    );

    Ok(PolicyComparison {
        signal: signal.name.clone(),
        n_labeled: labeled.len(),
        n_pos: labeled.n_pos(),
        n_neg: labeled.n_neg(),
        unlabeled: labeled.unlabeled,
        results,
    })
}

// ── Tier-capped scores ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredScore {
    pub patient_id: String,
    pub tier: ConfidenceTier,
    pub raw_score: f64,
    /// `None` when the cap excludes the patient
    pub reported_score: Option<f64>,
}

/// Score every patient (labeled or not) and pass the score through `cap`
/// according to the patient's confidence tier.
pub fn tiered_scores(
    cohort: &Cohort,
    signal: &SignalDefinition,
    policy: &dyn AggregationPolicy,
    tiers: &TierConfig,
    cap: &dyn ScoreCap,
) -> Vec<TieredScore> {
    cohort
        .patients
        .iter()
        .map(|p| {
            let ps = patient_signal(p, signal);
            let raw_score = policy.aggregate(&ps.v_max, &ps.v_sum);
            let tier = classify_tier(p, tiers);
            TieredScore {
                patient_id: p.id.clone(),
                tier,
                raw_score,
                reported_score: cap.cap(raw_score, tier),
            }
        })
        .collect()
}

// ── Per-feature ranking ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAuroc {
    pub rank: usize,
    pub feature_index: u32,
    pub auroc: f64,
    /// labeled patients carrying the feature in any variant
    pub n_present: usize,
}

/// AUROC of each feature's patient value, sorted descending.
/// Ties keep the order of the signal definition.
pub fn rank_features(
    labeled: &LabeledCohort<'_>,
    signal: &SignalDefinition,
    ties: TieConvention,
) -> Vec<FeatureAuroc> {
    let labels = labeled.labels();
    let mut rows: Vec<FeatureAuroc> = signal
        .features()
        .par_iter()
        .map(|&feature_index| {
            let values: Vec<f64> = labeled
                .patients
                .iter()
                .map(|lp| patient_feature_value(lp.patient, feature_index))
                .collect();
            FeatureAuroc {
                rank: 0,
                feature_index,
                auroc: auroc_with(&labels, &values, ties),
                n_present: values.iter().filter(|v| **v > 0.0).count(),
            }
        })
        .collect();

    rows.sort_by(|a, b| descending_nan_last(a.auroc, b.auroc));
    for (i, r) in rows.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    rows
}

/// Loads labels and ranks features, enforcing the minimum labeled count.
pub fn feature_ranking(
    cohort: &Cohort,
    signal: &SignalDefinition,
    config: &EngineConfig,
) -> Result<Vec<FeatureAuroc>> {
    require_signal(signal)?;
    let labeled = labeled_cohort(cohort, config)?;
    Ok(rank_features(&labeled, signal, config.ranking.tie_convention))
}

// ── Reduced vs full ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    UseReduced,
    KeepFull,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::UseReduced => "use reduced set",
            Recommendation::KeepFull => "keep full set",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducedVsFull {
    pub signal: String,
    pub reference_policy: String,
    pub n_labeled: usize,
    pub full_features: usize,
    pub k: usize,
    pub reduced_features: Vec<u32>,
    pub full_auroc: f64,
    pub reduced_auroc: f64,
    pub delta: f64,
    pub tolerance: f64,
    pub recommendation: Recommendation,
}

/// `delta = full − reduced`; reduced wins when `|delta| < tolerance`.
/// An undefined AUROC on either side keeps the full set.
pub fn decide_reduced_vs_full(full_auroc: f64, reduced_auroc: f64, tolerance: f64) -> (f64, Recommendation) {
    let delta = full_auroc - reduced_auroc;
    let recommendation = if delta.is_finite() && delta.abs() < tolerance {
        Recommendation::UseReduced
    } else {
        Recommendation::KeepFull
    };
    (delta, recommendation)
}

/// Compare the reference composite over the full signal against the top-k
/// features by per-feature AUROC.
pub fn reduced_vs_full(
    cohort: &Cohort,
    signal: &SignalDefinition,
    registry: &PolicyRegistry,
    config: &EngineConfig,
) -> Result<ReducedVsFull> {
    require_signal(signal)?;
    let policy_name = &config.aggregation.reference_policy;
    let policy = registry.get(policy_name).ok_or_else(|| {
        FerrumyxError::Config(format!("reference policy '{policy_name}' is not registered"))
    })?;

    let labeled = labeled_cohort(cohort, config)?;
    let ties = config.ranking.tie_convention;

    let full_auroc = composite_auroc(&labeled, signal, policy, ties);

    let k = config.aggregation.reduced_k.min(signal.len());
    let ranking = rank_features(&labeled, signal, ties);
    let reduced_features: Vec<u32> = ranking.iter().take(k).map(|r| r.feature_index).collect();
    let reduced = SignalDefinition::new(format!("{}_top{k}", signal.name), reduced_features.clone());
    let reduced_auroc = composite_auroc(&labeled, &reduced, policy, ties);

    let tolerance = config.aggregation.tolerance;
    let (delta, recommendation) = decide_reduced_vs_full(full_auroc, reduced_auroc, tolerance);

    tracing::info!(
        signal = %signal.name,
        full_auroc,
        reduced_auroc,
        delta,
        recommendation = recommendation.as_str(),
        "Reduced-vs-full comparison finished"
    );

    Ok(ReducedVsFull {
        signal: signal.name.clone(),
        reference_policy: policy_name.clone(),
        n_labeled: labeled.len(),
        full_features: signal.len(),
        k,
        reduced_features,
        full_auroc,
        reduced_auroc,
        delta,
        tolerance,
        recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FnPolicy;
    use ferrumyx_test_utils::{separable_cohort, PatientBuilder};

    #[test]
    fn test_single_feature_separates_perfectly() {
        // 10 resistant at 0.9, 10 sensitive at 0.1 on feature 42.
        let cohort = separable_cohort(10, 10, 42, 0.9, 0.1);
        let signal = SignalDefinition::new("diamond", [42]);
        let rows = feature_ranking(&cohort, &signal, &EngineConfig::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].auroc - 1.0).abs() < 1e-9);
        assert_eq!(rows[0].n_present, 20);
    }

    #[test]
    fn test_ranking_is_deterministic_and_dense() {
        let cohort = separable_cohort(12, 12, 7, 0.8, 0.3);
        let signal = SignalDefinition::new("d", [7, 8]);
        let registry = PolicyRegistry::with_defaults(3);
        let config = EngineConfig::default();

        let first = compare_policies(&cohort, &signal, &registry, &config).unwrap();
        let second = compare_policies(&cohort, &signal, &registry, &config).unwrap();
        let order = |c: &PolicyComparison| c.results.iter().map(|r| (r.policy.clone(), r.rank)).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
        let ranks: Vec<usize> = first.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_ties_preserve_registration_order() {
        // Every built-in policy reduces to the same value with one hit per patient.
        let cohort = separable_cohort(10, 10, 1, 0.7, 0.2);
        let signal = SignalDefinition::new("d", [1]);
        let registry = PolicyRegistry::with_defaults(3);
        let cmp = compare_policies(&cohort, &signal, &registry, &EngineConfig::default()).unwrap();
        let names: Vec<&str> = cmp.results.iter().map(|r| r.policy.as_str()).collect();
        assert_eq!(names, vec!["max_of_max", "sum_of_max", "top_k_mean", "mean_of_sum"]);
    }

    #[test]
    fn test_better_policy_ranks_first() {
        let cohort = separable_cohort(10, 10, 1, 0.7, 0.2);
        let signal = SignalDefinition::new("d", [1]);
        let mut registry = PolicyRegistry::new();
        registry
            .register(Box::new(FnPolicy::new("inverted", |v: &[f64], _: &[f64]| -v.iter().sum::<f64>())))
            .unwrap();
        registry.register(Box::new(crate::policy::MaxOfMax)).unwrap();
        let cmp = compare_policies(&cohort, &signal, &registry, &EngineConfig::default()).unwrap();
        assert_eq!(cmp.results[0].policy, "max_of_max");
        assert_eq!(cmp.results[1].policy, "inverted");
        assert!(cmp.results[1].auroc < 0.01);
    }

    #[test]
    fn test_insufficient_labels_rejected() {
        let cohort = separable_cohort(3, 3, 1, 0.9, 0.1);
        let signal = SignalDefinition::new("d", [1]);
        let err = compare_policies(&cohort, &signal, &PolicyRegistry::with_defaults(3), &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, FerrumyxError::InsufficientLabels { required: 10, found: 6 }));
    }

    #[test]
    fn test_decision_within_tolerance_uses_reduced() {
        let (delta, rec) = decide_reduced_vs_full(0.82, 0.81, 0.02);
        assert!((delta - 0.01).abs() < 1e-9);
        assert_eq!(rec, Recommendation::UseReduced);
        assert_eq!(rec.as_str(), "use reduced set");

        let (_, rec) = decide_reduced_vs_full(0.85, 0.80, 0.02);
        assert_eq!(rec, Recommendation::KeepFull);
        let (_, rec) = decide_reduced_vs_full(0.70, 0.75, 0.02);
        assert_eq!(rec, Recommendation::KeepFull);
        let (_, rec) = decide_reduced_vs_full(f64::NAN, 0.75, 0.02);
        assert_eq!(rec, Recommendation::KeepFull);
    }

    #[test]
    fn test_reduced_vs_full_keeps_informative_feature() {
        // Feature 1 separates the classes; features 2..=4 are constant noise.
        let mut patients = Vec::new();
        for i in 0..10 {
            patients.push(
                PatientBuilder::new(format!("r{i}"), "resistant")
                    .variant(&[(1, 0.9), (2, 0.3), (3, 0.3), (4, 0.3)])
                    .build(),
            );
            patients.push(
                PatientBuilder::new(format!("s{i}"), "sensitive")
                    .variant(&[(1, 0.1), (2, 0.3), (3, 0.3), (4, 0.3)])
                    .build(),
            );
        }
        let cohort = Cohort::new(patients);
        let signal = SignalDefinition::new("d", [2, 3, 1, 4]);
        let mut config = EngineConfig::default();
        config.aggregation.reduced_k = 1;

        let out = reduced_vs_full(&cohort, &signal, &PolicyRegistry::with_defaults(3), &config).unwrap();
        assert_eq!(out.reduced_features, vec![1]);
        assert_eq!(out.k, 1);
        assert_eq!(out.full_features, 4);
        assert!((out.full_auroc - 1.0).abs() < 1e-9);
        assert!((out.reduced_auroc - 1.0).abs() < 1e-9);
        assert_eq!(out.recommendation, Recommendation::UseReduced);
    }

    #[test]
    fn test_tiered_scores_apply_cap() {
        use ferrumyx_common::confidence::TierCeilingCap;

        let cohort = Cohort::new(vec![
            PatientBuilder::new("full", "resistant").variant(&[(1, 0.9)]).complete_biomarkers().build(),
            PatientBuilder::new("partial", "resistant").variant(&[(1, 0.9)]).tmb(4.0).build(),
            PatientBuilder::new("bare", "sensitive").variant(&[(1, 0.9)]).build(),
        ]);
        let signal = SignalDefinition::new("d", [1]);
        let config = EngineConfig::default();
        let rows = tiered_scores(
            &cohort,
            &signal,
            &crate::policy::MaxOfMax,
            &config.tiers,
            &TierCeilingCap::from_config(&config.tiers),
        );
        let reported: Vec<(ConfidenceTier, Option<f64>)> = rows.iter().map(|r| (r.tier, r.reported_score)).collect();
        assert_eq!(
            reported,
            vec![
                (ConfidenceTier::L2, Some(0.9)),
                (ConfidenceTier::L1, Some(0.6)),
                (ConfidenceTier::L0, None),
            ]
        );
        assert!(rows.iter().all(|r| r.raw_score == 0.9));
    }

    #[test]
    fn test_unknown_reference_policy_is_config_error() {
        let cohort = separable_cohort(10, 10, 1, 0.9, 0.1);
        let signal = SignalDefinition::new("d", [1]);
        let mut config = EngineConfig::default();
        config.aggregation.reference_policy = "median_of_max".to_string();
        let err = reduced_vs_full(&cohort, &signal, &PolicyRegistry::with_defaults(3), &config).unwrap_err();
        assert!(matches!(err, FerrumyxError::Config(_)));
    }
}
