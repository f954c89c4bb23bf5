//! Signal extraction from patient variant records.

use ferrumyx_common::cohort::{Patient, SignalDefinition, Variant};

/// Per-variant contribution of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VariantSignal {
    /// max(|value|) over features in the signal
    pub max: f64,
    /// sum(|value|) over the same features
    pub sum: f64,
    /// number of signal features carried by the variant
    pub hits: usize,
}

pub fn variant_signal(variant: &Variant, signal: &SignalDefinition) -> VariantSignal {
    variant
        .top_features
        .iter()
        .filter(|f| signal.contains(f.index) && f.value.is_finite())
        .fold(VariantSignal::default(), |acc, f| {
            let v = f.value.abs();
            VariantSignal {
                max: acc.max.max(v),
                sum: acc.sum + v,
                hits: acc.hits + 1,
            }
        })
}

pub fn variant_max(variant: &Variant, signal: &SignalDefinition) -> f64 {
    variant_signal(variant, signal).max
}

pub fn variant_sum(variant: &Variant, signal: &SignalDefinition) -> f64 {
    variant_signal(variant, signal).sum
}

/// Patient value for a single feature: max |value| over all variants, 0 when absent.
pub fn patient_feature_value(patient: &Patient, index: u32) -> f64 {
    patient
        .variants
        .iter()
        .flat_map(|v| v.top_features.iter())
        .filter(|f| f.index == index && f.value.is_finite())
        .map(|f| f.value.abs())
        .fold(0.0, f64::max)
}

/// Parallel per-variant lists consumed by aggregation policies.
///
/// Only variants carrying at least one signal feature contribute an entry, so
/// means are never diluted by zero padding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientSignal {
    pub v_max: Vec<f64>,
    pub v_sum: Vec<f64>,
}

pub fn patient_signal(patient: &Patient, signal: &SignalDefinition) -> PatientSignal {
    let mut out = PatientSignal::default();
    for variant in &patient.variants {
        let vs = variant_signal(variant, signal);
        if vs.hits > 0 {
            out.v_max.push(vs.max);
            out.v_sum.push(vs.sum);
        }
    }
    out
}
