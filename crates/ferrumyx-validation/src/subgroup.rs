//! Stage-bucket subgroup validation.
//!
//! Recomputes AUROC inside each stage partition so that a strong aggregate
//! number cannot hide a partition where the signal does not discriminate.

use serde::{Deserialize, Serialize};

use ferrumyx_common::cohort::{Cohort, SignalDefinition};
use ferrumyx_common::config::{EngineConfig, TieConvention};
use ferrumyx_common::error::{FerrumyxError, Result};
use ferrumyx_ranker::aggregation::score_patients;
use ferrumyx_ranker::policy::AggregationPolicy;
use ferrumyx_ranker::rank::auroc_with;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageBucket {
    #[serde(rename = "III")]
    III,
    #[serde(rename = "IV")]
    IV,
    #[serde(rename = "unknown")]
    Unknown,
}

impl StageBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageBucket::III => "III",
            StageBucket::IV => "IV",
            StageBucket::Unknown => "unknown",
        }
    }
}

/// Case-insensitive substring match: "IV" first, then "III".
pub fn stage_bucket(stage: Option<&str>) -> StageBucket {
    let Some(stage) = stage else {
        return StageBucket::Unknown;
    };
    let upper = stage.to_ascii_uppercase();
    if upper.contains("IV") {
        StageBucket::IV
    } else if upper.contains("III") {
        StageBucket::III
    } else {
        StageBucket::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgroupRow {
    pub subgroup: String,
    pub n: usize,
    pub n_pos: usize,
    pub n_neg: usize,
    /// `None` when undefined or not computed for this partition
    pub auroc: Option<f64>,
    pub reliable: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgroupReport {
    pub signal: String,
    pub policy: String,
    pub unlabeled: usize,
    /// III, IV, unknown, then the full cohort
    pub rows: Vec<SubgroupRow>,
}

/// One labeled, scored observation with its stage bucket.
#[derive(Debug, Clone, Copy)]
pub struct StagedScore {
    pub positive: bool,
    pub score: f64,
    pub bucket: StageBucket,
}

fn row(
    name: &str,
    items: &[&StagedScore],
    compute_auroc: bool,
    min_partition_size: usize,
    ties: TieConvention,
) -> SubgroupRow {
    let labels: Vec<bool> = items.iter().map(|s| s.positive).collect();
    let scores: Vec<f64> = items.iter().map(|s| s.score).collect();
    let n_pos = labels.iter().filter(|y| **y).count();

    let (auroc, note) = if !compute_auroc {
        (None, Some("excluded from AUROC".to_string()))
    } else {
        let value = auroc_with(&labels, &scores, ties);
        if value.is_nan() {
            (None, Some("AUROC undefined: one outcome class is empty".to_string()))
        } else {
            (Some(value), None)
        }
    };

    SubgroupRow {
        subgroup: name.to_string(),
        n: items.len(),
        n_pos,
        n_neg: items.len() - n_pos,
        auroc,
        reliable: items.len() >= min_partition_size,
        note,
    }
}

/// Partition rows for pre-scored observations.
pub fn subgroup_rows(items: &[StagedScore], min_partition_size: usize, ties: TieConvention) -> Vec<SubgroupRow> {
    let mut rows: Vec<SubgroupRow> = [StageBucket::III, StageBucket::IV, StageBucket::Unknown]
        .iter()
        .map(|bucket| {
            let part: Vec<&StagedScore> = items.iter().filter(|s| s.bucket == *bucket).collect();
            row(
                bucket.as_str(),
                &part,
                *bucket != StageBucket::Unknown,
                min_partition_size,
                ties,
            )
        })
        .collect();
    let all: Vec<&StagedScore> = items.iter().collect();
    rows.push(row("all", &all, true, min_partition_size, ties));
    rows
}

/// Score the labeled cohort with `policy` and report AUROC per stage bucket.
pub fn validate_subgroups(
    cohort: &Cohort,
    signal: &SignalDefinition,
    policy: &dyn AggregationPolicy,
    config: &EngineConfig,
) -> Result<SubgroupReport> {
    if signal.is_empty() {
        return Err(FerrumyxError::DataShape(format!("signal '{}' has no features", signal.name)));
    }
    let labeled = cohort.labeled(&config.labels);
    labeled.require_min(config.validation.min_labeled)?;

    let scores = score_patients(&labeled, signal, policy);
    let items: Vec<StagedScore> = labeled
        .patients
        .iter()
        .zip(scores)
        .map(|(lp, score)| StagedScore {
            positive: lp.positive,
            score,
            bucket: stage_bucket(lp.patient.stage.as_deref()),
        })
        .collect();

    let rows = subgroup_rows(
        &items,
        config.validation.min_partition_size,
        config.ranking.tie_convention,
    );
    for r in rows.iter().filter(|r| !r.reliable && r.n > 0) {
        tracing::warn!(subgroup = %r.subgroup, n = r.n, "Partition below minimum size");
    }

    Ok(SubgroupReport {
        signal: signal.name.clone(),
        policy: policy.name().to_string(),
        unlabeled: labeled.unlabeled,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrumyx_ranker::policy::MaxOfMax;
    use ferrumyx_test_utils::staged_cohort;

    #[test]
    fn test_stage_bucket_prefers_iv() {
        assert_eq!(stage_bucket(Some("Stage IV")), StageBucket::IV);
        assert_eq!(stage_bucket(Some("stage ivb")), StageBucket::IV);
        assert_eq!(stage_bucket(Some("Stage IIIC")), StageBucket::III);
        assert_eq!(stage_bucket(Some("iiia")), StageBucket::III);
        assert_eq!(stage_bucket(Some("Stage II")), StageBucket::Unknown);
        assert_eq!(stage_bucket(Some("")), StageBucket::Unknown);
        assert_eq!(stage_bucket(None), StageBucket::Unknown);
    }

    #[test]
    fn test_unknown_partition_counted_not_scored() {
        let items = vec![
            StagedScore { positive: true, score: 0.9, bucket: StageBucket::III },
            StagedScore { positive: false, score: 0.1, bucket: StageBucket::III },
            StagedScore { positive: true, score: 0.2, bucket: StageBucket::IV },
            StagedScore { positive: false, score: 0.8, bucket: StageBucket::IV },
            StagedScore { positive: true, score: 0.5, bucket: StageBucket::Unknown },
        ];
        let rows = subgroup_rows(&items, 2, TieConvention::Midrank);
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[0].subgroup, "III");
        assert_eq!(rows[0].auroc, Some(1.0));
        assert_eq!(rows[1].subgroup, "IV");
        assert_eq!(rows[1].auroc, Some(0.0));

        assert_eq!(rows[2].subgroup, "unknown");
        assert_eq!(rows[2].n, 1);
        assert_eq!(rows[2].auroc, None);
        assert!(!rows[2].reliable);

        assert_eq!(rows[3].subgroup, "all");
        assert_eq!(rows[3].n, 5);
        assert_eq!((rows[3].n_pos, rows[3].n_neg), (3, 2));
        assert!(rows[3].auroc.is_some());
    }

    #[test]
    fn test_single_class_partition_reports_undefined() {
        let items = vec![
            StagedScore { positive: true, score: 0.9, bucket: StageBucket::III },
            StagedScore { positive: true, score: 0.4, bucket: StageBucket::III },
            StagedScore { positive: false, score: 0.1, bucket: StageBucket::IV },
        ];
        let rows = subgroup_rows(&items, 1, TieConvention::Midrank);
        assert_eq!(rows[0].auroc, None);
        assert!(rows[0].note.as_deref().unwrap().contains("undefined"));
    }

    #[test]
    fn test_validate_subgroups_over_cohort() {
        let cohort = staged_cohort(70, 5, 17);
        let signal = SignalDefinition::new("d", [5]);
        let report = validate_subgroups(&cohort, &signal, &MaxOfMax, &EngineConfig::default()).unwrap();

        let total: usize = report.rows[..3].iter().map(|r| r.n).sum();
        assert_eq!(total, 70);
        assert_eq!(report.rows[3].n, 70);
        // Stage cycle has two III, two IV and three unknown entries per 7 patients.
        assert_eq!(report.rows[0].n, 20);
        assert_eq!(report.rows[1].n, 20);
        assert_eq!(report.rows[2].n, 30);
        assert!(report.rows[0].auroc.is_some());
        assert!(report.rows[1].auroc.is_some());
        assert!(report.rows.iter().all(|r| r.reliable));
    }
}
