//! Seeded synthetic missingness for stress-testing tiering and aggregation.
//!
//! Each patient gets three independent uniform draws (TMB, MSI group, HRD
//! group) in that fixed order, whatever the probabilities, so the same seed
//! always visits the same random stream.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use ferrumyx_common::cohort::{is_present, BiomarkerField, BiomarkerValue, Cohort, Patient};
use ferrumyx_common::config::MissingnessConfig;
use ferrumyx_common::error::{FerrumyxError, Result};

/// Field groups the simulator can drop, with the value each field is reset to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropGroup {
    Tmb,
    Msi,
    Hrd,
}

impl DropGroup {
    pub const ALL: [DropGroup; 3] = [DropGroup::Tmb, DropGroup::Msi, DropGroup::Hrd];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropGroup::Tmb => "tmb",
            DropGroup::Msi => "msi",
            DropGroup::Hrd => "hrd",
        }
    }

    /// Fields touched by a drop and their replacement. Derived status fields
    /// become "Unknown" rather than null.
    fn resets(&self) -> Vec<(BiomarkerField, Option<BiomarkerValue>)> {
        match self {
            DropGroup::Tmb => vec![(BiomarkerField::Tmb, None)],
            DropGroup::Msi => vec![
                (BiomarkerField::MsiScoreMantis, None),
                (BiomarkerField::MsiSensorScore, None),
                (BiomarkerField::MsiStatus, Some(BiomarkerValue::unknown())),
            ],
            DropGroup::Hrd => vec![
                (BiomarkerField::AneuploidyScore, None),
                (BiomarkerField::FractionGenomeAltered, None),
                (BiomarkerField::HrdProxy, Some(BiomarkerValue::unknown())),
            ],
        }
    }

    fn probability(&self, config: &MissingnessConfig) -> f64 {
        match self {
            DropGroup::Tmb => config.p_tmb,
            DropGroup::Msi => config.p_msi,
            DropGroup::Hrd => config.p_hrd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropProbabilities {
    pub tmb: f64,
    pub msi: f64,
    pub hrd: f64,
}

/// Patients for which a drop actually removed a present value, per group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDropCounts {
    pub tmb: usize,
    pub msi: usize,
    pub hrd: usize,
}

impl GroupDropCounts {
    fn bump(&mut self, group: DropGroup) {
        match group {
            DropGroup::Tmb => self.tmb += 1,
            DropGroup::Msi => self.msi += 1,
            DropGroup::Hrd => self.hrd += 1,
        }
    }

    pub fn get(&self, group: DropGroup) -> usize {
        match group {
            DropGroup::Tmb => self.tmb,
            DropGroup::Msi => self.msi,
            DropGroup::Hrd => self.hrd,
        }
    }
}

/// Provenance written alongside a simulated cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingnessProvenance {
    pub seed: u64,
    pub probabilities: DropProbabilities,
    pub patients: usize,
    /// Present-to-missing transitions only; drops on already-missing groups are not counted.
    pub dropped: GroupDropCounts,
    pub fields_dropped: BTreeMap<String, usize>,
    pub source: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SimulatedCohort {
    pub cohort: Cohort,
    pub provenance: MissingnessProvenance,
}

impl SimulatedCohort {
    /// `{cohort, provenance}` document; the upstream provenance is nested
    /// under `upstream`.
    pub fn to_document(&self, upstream: &Map<String, Value>) -> Result<Value> {
        let mut provenance = Map::new();
        provenance.insert("type".to_string(), Value::String("missingness_simulation".to_string()));
        provenance.insert("missingness_simulation".to_string(), serde_json::to_value(&self.provenance)?);
        provenance.insert("upstream".to_string(), Value::Object(upstream.clone()));
        let mut doc = Map::new();
        doc.insert("cohort".to_string(), serde_json::to_value(&self.cohort)?);
        doc.insert("provenance".to_string(), Value::Object(provenance));
        Ok(Value::Object(doc))
    }
}

fn apply_drop(
    patient: &mut Patient,
    group: DropGroup,
    sentinels: &[String],
    fields_dropped: &mut BTreeMap<String, usize>,
) -> bool {
    let mut changed = false;
    for (field, replacement) in group.resets() {
        let before = is_present(patient.field(field), sentinels);
        let after = is_present(replacement.as_ref(), sentinels);
        patient.set_field(field, replacement);
        if before && !after {
            *fields_dropped.entry(field.as_str().to_string()).or_default() += 1;
            changed = true;
        }
    }
    changed
}

/// Copy `cohort`, dropping biomarker groups with the configured probabilities.
/// Only the targeted fields change; labels, variants and unrelated keys are
/// carried over as-is.
pub fn simulate_missingness(
    cohort: &Cohort,
    config: &MissingnessConfig,
    sentinels: &[String],
    source: &str,
    generated_at: DateTime<Utc>,
) -> Result<SimulatedCohort> {
    for group in DropGroup::ALL {
        let p = group.probability(config);
        if !(0.0..=1.0).contains(&p) {
            return Err(FerrumyxError::Config(format!(
                "drop probability for {} must lie in [0, 1], got {p}",
                group.as_str()
            )));
        }
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut out = cohort.clone();
    let mut dropped = GroupDropCounts::default();
    let mut fields_dropped = BTreeMap::new();

    for patient in &mut out.patients {
        let draws: [f64; 3] = [rng.gen(), rng.gen(), rng.gen()];
        for (group, draw) in DropGroup::ALL.iter().zip(draws) {
            if draw < group.probability(config)
                && apply_drop(patient, *group, sentinels, &mut fields_dropped)
            {
                dropped.bump(*group);
            }
        }
    }

    tracing::info!(
        seed = config.seed,
        patients = out.patients.len(),
        tmb = dropped.tmb,
        msi = dropped.msi,
        hrd = dropped.hrd,
        "Missingness simulation finished"
    );

    Ok(SimulatedCohort {
        provenance: MissingnessProvenance {
            seed: config.seed,
            probabilities: DropProbabilities {
                tmb: config.p_tmb,
                msi: config.p_msi,
                hrd: config.p_hrd,
            },
            patients: out.patients.len(),
            dropped,
            fields_dropped,
            source: source.to_string(),
            generated_at,
        },
        cohort: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrumyx_common::config::TierConfig;
    use ferrumyx_common::confidence::{classify_tier, ConfidenceTier};
    use ferrumyx_test_utils::{separable_cohort, PatientBuilder};
    use pretty_assertions::assert_eq;

    fn at(p_tmb: f64, p_msi: f64, p_hrd: f64, seed: u64) -> MissingnessConfig {
        MissingnessConfig { seed, p_tmb, p_msi, p_hrd }
    }

    fn sentinels() -> Vec<String> {
        TierConfig::default().missing_sentinels
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T09:30:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_zero_probability_changes_nothing() {
        let cohort = separable_cohort(8, 7, 3, 0.9, 0.1);
        let sim = simulate_missingness(&cohort, &at(0.0, 0.0, 0.0, 11), &sentinels(), "unit", fixed_time()).unwrap();
        assert_eq!(sim.cohort, cohort);
        assert_eq!(sim.provenance.dropped, GroupDropCounts::default());
        assert!(sim.provenance.fields_dropped.is_empty());
    }

    #[test]
    fn test_full_probability_drops_every_group() {
        let cohort = separable_cohort(10, 10, 3, 0.9, 0.1);
        let sim = simulate_missingness(&cohort, &at(1.0, 1.0, 1.0, 5), &sentinels(), "unit", fixed_time()).unwrap();

        assert_eq!(sim.provenance.dropped, GroupDropCounts { tmb: 20, msi: 20, hrd: 20 });
        assert_eq!(sim.provenance.fields_dropped["msi_status"], 20);
        assert_eq!(sim.provenance.fields_dropped["hrd_proxy"], 20);
        let tiers = TierConfig::default();
        for (before, after) in cohort.patients.iter().zip(&sim.cohort.patients) {
            assert_eq!(after.tmb, None);
            assert_eq!(after.msi_score_mantis, None);
            assert_eq!(after.msi_sensor_score, None);
            assert_eq!(after.msi_status, Some(BiomarkerValue::unknown()));
            assert_eq!(after.aneuploidy_score, None);
            assert_eq!(after.fraction_genome_altered, None);
            assert_eq!(after.hrd_proxy, Some(BiomarkerValue::unknown()));
            assert_eq!(classify_tier(after, &tiers), ConfidenceTier::L0);
            // untouched fields
            assert_eq!(after.id, before.id);
            assert_eq!(after.platinum_response, before.platinum_response);
            assert_eq!(after.variants, before.variants);
        }
    }

    #[test]
    fn test_tmb_only_drop_counts_every_patient() {
        let cohort = separable_cohort(10, 10, 3, 0.9, 0.1);
        let sim = simulate_missingness(&cohort, &at(1.0, 0.0, 0.0, 99), &sentinels(), "unit", fixed_time()).unwrap();
        assert_eq!(sim.provenance.dropped.tmb, cohort.patients.len());
        assert_eq!(sim.provenance.dropped.msi, 0);
        assert!(sim.cohort.patients.iter().all(|p| p.tmb.is_none()));
        assert!(sim.cohort.patients.iter().all(|p| p.msi_status == Some(BiomarkerValue::Text("MSS".into()))));
    }

    #[test]
    fn test_already_missing_fields_are_not_counted() {
        let mut patients = separable_cohort(3, 3, 3, 0.9, 0.1).patients;
        patients.push(PatientBuilder::new("bare", "sensitive").build());
        let cohort = Cohort::new(patients);
        let sim = simulate_missingness(&cohort, &at(1.0, 1.0, 1.0, 1), &sentinels(), "unit", fixed_time()).unwrap();
        assert_eq!(sim.provenance.dropped, GroupDropCounts { tmb: 6, msi: 6, hrd: 6 });
        assert_eq!(sim.provenance.patients, 7);
    }

    #[test]
    fn test_same_seed_same_output() {
        let cohort = separable_cohort(25, 25, 3, 0.9, 0.1);
        let cfg = at(0.4, 0.3, 0.5, 2024);
        let a = simulate_missingness(&cohort, &cfg, &sentinels(), "unit", fixed_time()).unwrap();
        let b = simulate_missingness(&cohort, &cfg, &sentinels(), "unit", fixed_time()).unwrap();
        assert_eq!(a.cohort, b.cohort);
        assert_eq!(a.provenance, b.provenance);

        let c = simulate_missingness(&cohort, &at(0.4, 0.3, 0.5, 2025), &sentinels(), "unit", fixed_time()).unwrap();
        assert_ne!(a.cohort, c.cohort);
    }

    #[test]
    fn test_unrelated_extra_fields_preserved() {
        let cohort = Cohort::new(vec![PatientBuilder::new("x", "resistant")
            .complete_biomarkers()
            .stage("IIIC")
            .extra("age_at_diagnosis", serde_json::json!(57))
            .build()]);
        let sim = simulate_missingness(&cohort, &at(1.0, 1.0, 1.0, 3), &sentinels(), "unit", fixed_time()).unwrap();
        let p = &sim.cohort.patients[0];
        assert_eq!(p.extra["age_at_diagnosis"], 57);
        assert_eq!(p.stage.as_deref(), Some("IIIC"));
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let cohort = separable_cohort(2, 2, 3, 0.9, 0.1);
        let err = simulate_missingness(&cohort, &at(0.1, -0.2, 0.1, 3), &sentinels(), "unit", fixed_time()).unwrap_err();
        assert!(matches!(err, FerrumyxError::Config(_)));
    }

    #[test]
    fn test_document_records_provenance() {
        let cohort = separable_cohort(2, 2, 3, 0.9, 0.1);
        let sim = simulate_missingness(&cohort, &at(0.5, 0.5, 0.5, 8), &sentinels(), "cohort.json", fixed_time()).unwrap();
        let mut upstream = Map::new();
        upstream.insert("type".into(), Value::String("cohort_extract".into()));
        let doc = sim.to_document(&upstream).unwrap();
        let prov = &doc["provenance"]["missingness_simulation"];
        assert_eq!(prov["seed"], 8);
        assert_eq!(prov["source"], "cohort.json");
        assert_eq!(prov["generated_at"], "2026-01-05T09:30:00Z");
        assert_eq!(doc["provenance"]["upstream"]["type"], "cohort_extract");
        assert_eq!(doc["cohort"]["patients"].as_array().unwrap().len(), 4);
    }
}
