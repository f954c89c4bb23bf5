//! Synthetic cohort fixtures shared by the Ferrumyx test suites.

use ferrumyx_common::cohort::{BiomarkerValue, Cohort, FeatureValue, Patient, Variant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

/// Fluent builder for test patients.
pub struct PatientBuilder {
    patient: Patient,
}

impl PatientBuilder {
    pub fn new(id: impl Into<String>, outcome: &str) -> Self {
        let mut patient = Patient::new(id);
        patient.platinum_response = Some(outcome.to_string());
        Self { patient }
    }

    /// Append one variant carrying `(feature_index, value)` pairs.
    pub fn variant(mut self, features: &[(u32, f64)]) -> Self {
        self.patient.variants.push(Variant {
            top_features: features
                .iter()
                .map(|&(index, value)| FeatureValue { index, value })
                .collect(),
            ..Default::default()
        });
        self
    }

    pub fn tmb(mut self, tmb: f64) -> Self {
        self.patient.tmb = Some(BiomarkerValue::Number(tmb));
        self
    }

    pub fn msi(mut self, mantis: f64, sensor: f64, status: &str) -> Self {
        self.patient.msi_score_mantis = Some(BiomarkerValue::Number(mantis));
        self.patient.msi_sensor_score = Some(BiomarkerValue::Number(sensor));
        self.patient.msi_status = Some(BiomarkerValue::Text(status.to_string()));
        self
    }

    pub fn hrd(mut self, aneuploidy: f64, fga: f64, proxy: &str) -> Self {
        self.patient.aneuploidy_score = Some(BiomarkerValue::Number(aneuploidy));
        self.patient.fraction_genome_altered = Some(BiomarkerValue::Number(fga));
        self.patient.hrd_proxy = Some(BiomarkerValue::Text(proxy.to_string()));
        self
    }

    /// Every tiering group filled with plausible values.
    pub fn complete_biomarkers(self) -> Self {
        self.tmb(6.5).msi(0.32, 1.1, "MSS").hrd(18.0, 0.37, "HRD-high")
    }

    pub fn stage(mut self, stage: &str) -> Self {
        self.patient.stage = Some(stage.to_string());
        self
    }

    pub fn extra(mut self, key: &str, value: Value) -> Self {
        self.patient.extra.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Patient {
        self.patient
    }
}

/// `n_resistant` resistant then `n_sensitive` sensitive patients, each with a
/// single variant carrying `feature` at the class value and full biomarkers.
pub fn separable_cohort(
    n_resistant: usize,
    n_sensitive: usize,
    feature: u32,
    resistant_value: f64,
    sensitive_value: f64,
) -> Cohort {
    let resistant = (0..n_resistant).map(|i| {
        PatientBuilder::new(format!("R{i:03}"), "resistant")
            .variant(&[(feature, resistant_value)])
            .complete_biomarkers()
            .build()
    });
    let sensitive = (0..n_sensitive).map(|i| {
        PatientBuilder::new(format!("S{i:03}"), "sensitive")
            .variant(&[(feature, sensitive_value)])
            .complete_biomarkers()
            .build()
    });
    Cohort::new(resistant.chain(sensitive).collect())
}

/// Labels and overlapping scores: positives draw from U(shift, 1 + shift),
/// negatives from U(0, 1). Deterministic for a given seed.
pub fn noisy_scores(n_pos: usize, n_neg: usize, shift: f64, seed: u64) -> (Vec<bool>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut labels = Vec::with_capacity(n_pos + n_neg);
    let mut scores = Vec::with_capacity(n_pos + n_neg);
    for _ in 0..n_pos {
        labels.push(true);
        scores.push(rng.gen::<f64>() + shift);
    }
    for _ in 0..n_neg {
        labels.push(false);
        scores.push(rng.gen::<f64>());
    }
    (labels, scores)
}

/// A cohort with free-text stages and a noisy signal on `feature`.
/// Stages cycle through III, IV and values that bucket as unknown.
pub fn staged_cohort(n: usize, feature: u32, seed: u64) -> Cohort {
    // Odd length so both outcome classes land in every bucket.
    const STAGES: [Option<&str>; 7] = [
        Some("Stage IIIC"),
        Some("stage iv"),
        Some("IIIA"),
        Some("Stage IVB"),
        None,
        Some("not reported"),
        Some("Stage II"),
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let patients = (0..n)
        .map(|i| {
            let resistant = i % 2 == 0;
            let value = if resistant { 0.3 + rng.gen::<f64>() } else { rng.gen::<f64>() };
            let mut builder = PatientBuilder::new(
                format!("T{i:03}"),
                if resistant { "resistant" } else { "sensitive" },
            )
            .variant(&[(feature, value)])
            .complete_biomarkers();
            if let Some(stage) = STAGES[i % STAGES.len()] {
                builder = builder.stage(stage);
            }
            builder.build()
        })
        .collect();
    Cohort::new(patients)
}

/// Wrap a cohort in the `{cohort, provenance}` document shape.
pub fn cohort_document(cohort: &Cohort, provenance: Value) -> String {
    serde_json::json!({
        "cohort": cohort,
        "provenance": provenance,
    })
    .to_string()
}
