//! Confidence tiers derived from completeness of required biomarker groups.
//!
//! Tiering looks only at whether fields are null or carry a missing sentinel,
//! never at the values. Score capping is a separate, pluggable step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cohort::{is_present, Cohort, Patient};
use crate::config::{GroupPresence, TierConfig, TierGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceTier {
    /// Every required group missing.
    L0,
    /// Some groups present, some missing.
    L1,
    /// Every required group present.
    L2,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 3] = [ConfidenceTier::L0, ConfidenceTier::L1, ConfidenceTier::L2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::L0 => "L0",
            ConfidenceTier::L1 => "L1",
            ConfidenceTier::L2 => "L2",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completeness of one group on one patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Present,
    Missing,
    /// Some fields present under an `all` rule.
    Partial,
}

pub fn group_state(patient: &Patient, group: &TierGroup, sentinels: &[String]) -> GroupState {
    let present = group
        .fields
        .iter()
        .filter(|f| is_present(patient.field(**f), sentinels))
        .count();
    match (present, group.presence) {
        (0, _) => GroupState::Missing,
        (_, GroupPresence::Any) => GroupState::Present,
        (n, GroupPresence::All) if n == group.fields.len() => GroupState::Present,
        _ => GroupState::Partial,
    }
}

/// Classify one patient.
pub fn classify_tier(patient: &Patient, config: &TierConfig) -> ConfidenceTier {
    let states: Vec<GroupState> = config
        .groups
        .iter()
        .map(|g| group_state(patient, g, &config.missing_sentinels))
        .collect();

    if states.iter().all(|s| *s == GroupState::Present) {
        ConfidenceTier::L2
    } else if states.iter().all(|s| *s == GroupState::Missing) {
        ConfidenceTier::L0
    } else {
        ConfidenceTier::L1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientTier {
    pub patient_id: String,
    pub tier: ConfidenceTier,
}

pub fn classify_cohort(cohort: &Cohort, config: &TierConfig) -> Vec<PatientTier> {
    cohort
        .patients
        .iter()
        .map(|p| PatientTier {
            patient_id: p.id.clone(),
            tier: classify_tier(p, config),
        })
        .collect()
}

/// One row of the completeness-distribution summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCount {
    pub tier: ConfidenceTier,
    pub count: usize,
    pub percentage: f64,
}

/// Counts and percentages per tier, always listing L0, L1, L2 in that order.
pub fn summarize_tiers(tiers: &[PatientTier]) -> Vec<TierCount> {
    let mut counts: BTreeMap<ConfidenceTier, usize> = BTreeMap::new();
    for t in tiers {
        *counts.entry(t.tier).or_default() += 1;
    }
    let total = tiers.len();
    ConfidenceTier::ALL
        .iter()
        .map(|tier| {
            let count = counts.get(tier).copied().unwrap_or(0);
            let percentage = if total == 0 { 0.0 } else { 100.0 * count as f64 / total as f64 };
            TierCount { tier: *tier, count, percentage }
        })
        .collect()
}

// ── Score caps ───────────────────────────────────────────────────────────────

/// Maps a raw score and tier to the reported score. `None` excludes the patient.
pub trait ScoreCap: Send + Sync {
    fn cap(&self, raw_score: f64, tier: ConfidenceTier) -> Option<f64>;
}

/// Identity for L2, ceiling for L1, exclusion for L0.
#[derive(Debug, Clone, Copy)]
pub struct TierCeilingCap {
    pub l1_ceiling: f64,
}

impl TierCeilingCap {
    pub fn from_config(config: &TierConfig) -> Self {
        Self { l1_ceiling: config.l1_ceiling }
    }
}

impl Default for TierCeilingCap {
    fn default() -> Self {
        Self { l1_ceiling: 0.6 }
    }
}

impl ScoreCap for TierCeilingCap {
    fn cap(&self, raw_score: f64, tier: ConfidenceTier) -> Option<f64> {
        match tier {
            ConfidenceTier::L2 => Some(raw_score),
            ConfidenceTier::L1 => Some(raw_score.min(self.l1_ceiling)),
            ConfidenceTier::L0 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{BiomarkerField, BiomarkerValue};

    fn full_patient() -> Patient {
        let mut p = Patient::new("p");
        p.tmb = Some(BiomarkerValue::Number(8.0));
        p.msi_score_mantis = Some(BiomarkerValue::Number(0.3));
        p.msi_sensor_score = Some(BiomarkerValue::Number(1.2));
        p.msi_status = Some(BiomarkerValue::Text("MSS".into()));
        p.aneuploidy_score = Some(BiomarkerValue::Number(14.0));
        p.fraction_genome_altered = Some(BiomarkerValue::Number(0.41));
        p
    }

    fn blank_group(p: &mut Patient, group: &TierGroup) {
        for f in &group.fields {
            let v = if *f == BiomarkerField::MsiStatus { Some(BiomarkerValue::unknown()) } else { None };
            p.set_field(*f, v);
        }
    }

    #[test]
    fn test_all_present_is_l2() {
        assert_eq!(classify_tier(&full_patient(), &TierConfig::default()), ConfidenceTier::L2);
    }

    #[test]
    fn test_all_missing_is_l0() {
        let config = TierConfig::default();
        let mut p = full_patient();
        for g in &config.groups {
            blank_group(&mut p, g);
        }
        assert_eq!(classify_tier(&p, &config), ConfidenceTier::L0);
    }

    #[test]
    fn test_every_partial_subset_is_l1() {
        let config = TierConfig::default();
        let n = config.groups.len();
        // Masks 1..2^n-1 drop a non-empty proper subset of groups.
        for mask in 1..(1u32 << n) - 1 {
            let mut p = full_patient();
            for (i, g) in config.groups.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    blank_group(&mut p, g);
                }
            }
            assert_eq!(classify_tier(&p, &config), ConfidenceTier::L1, "mask {mask:03b}");
        }
    }

    #[test]
    fn test_half_filled_all_group_is_partial() {
        let config = TierConfig::default();
        let mut p = full_patient();
        p.fraction_genome_altered = None;
        assert_eq!(group_state(&p, &config.groups[2], &config.missing_sentinels), GroupState::Partial);
        assert_eq!(classify_tier(&p, &config), ConfidenceTier::L1);
    }

    #[test]
    fn test_status_only_msi_is_partial() {
        let config = TierConfig::default();
        let mut p = full_patient();
        p.msi_score_mantis = None;
        p.msi_sensor_score = None;
        assert_eq!(group_state(&p, &config.groups[1], &config.missing_sentinels), GroupState::Partial);
        assert_eq!(classify_tier(&p, &config), ConfidenceTier::L1);
    }

    #[test]
    fn test_any_rule_accepts_one_field() {
        let mut config = TierConfig::default();
        config.groups[1].presence = GroupPresence::Any;
        let mut p = full_patient();
        p.msi_score_mantis = None;
        p.msi_status = Some(BiomarkerValue::Text("unknown".into()));
        assert_eq!(group_state(&p, &config.groups[1], &config.missing_sentinels), GroupState::Present);
        assert_eq!(classify_tier(&p, &config), ConfidenceTier::L2);
    }

    #[test]
    fn test_tier_ignores_values() {
        let config = TierConfig::default();
        let mut p = full_patient();
        p.tmb = Some(BiomarkerValue::Number(0.0));
        p.aneuploidy_score = Some(BiomarkerValue::Number(-999.0));
        assert_eq!(classify_tier(&p, &config), ConfidenceTier::L2);
    }

    #[test]
    fn test_summary_percentages() {
        let tiers = vec![
            PatientTier { patient_id: "a".into(), tier: ConfidenceTier::L2 },
            PatientTier { patient_id: "b".into(), tier: ConfidenceTier::L2 },
            PatientTier { patient_id: "c".into(), tier: ConfidenceTier::L1 },
            PatientTier { patient_id: "d".into(), tier: ConfidenceTier::L2 },
        ];
        let summary = summarize_tiers(&tiers);
        assert_eq!(summary[0], TierCount { tier: ConfidenceTier::L0, count: 0, percentage: 0.0 });
        assert_eq!(summary[1].count, 1);
        assert!((summary[2].percentage - 75.0).abs() < 1e-9);
        assert!(summarize_tiers(&[]).iter().all(|t| t.count == 0 && t.percentage == 0.0));
    }

    #[test]
    fn test_default_cap() {
        let cap = TierCeilingCap::default();
        assert_eq!(cap.cap(0.9, ConfidenceTier::L2), Some(0.9));
        assert_eq!(cap.cap(0.9, ConfidenceTier::L1), Some(0.6));
        assert_eq!(cap.cap(0.4, ConfidenceTier::L1), Some(0.4));
        assert_eq!(cap.cap(0.9, ConfidenceTier::L0), None);
    }
}
