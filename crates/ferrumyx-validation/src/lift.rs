//! Cohort-level lift applied to an (efficacy, confidence) pair.
//!
//! Both the cohort signal computation and the lift itself are strategies.
//! The shipped defaults are [`NoCohortSignals`] and [`IdentityLift`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ferrumyx_common::cohort::Cohort;
use ferrumyx_common::error::{FerrumyxError, Result};

/// Named cohort-level evidence values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortSignals {
    pub values: BTreeMap<String, f64>,
}

impl CohortSignals {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Computes cohort-level signals from a cohort.
pub trait CohortSignalSource: Send + Sync {
    fn name(&self) -> &str;
    fn signals(&self, cohort: &Cohort) -> CohortSignals;
}

/// Produces no signals.
pub struct NoCohortSignals;

impl CohortSignalSource for NoCohortSignals {
    fn name(&self) -> &str {
        "none"
    }

    fn signals(&self, _cohort: &Cohort) -> CohortSignals {
        CohortSignals::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiftedScore {
    pub efficacy: f64,
    pub confidence: f64,
}

/// Adjusts an (efficacy, confidence) pair from cohort signals. Must be pure.
pub trait CohortLift: Send + Sync {
    fn name(&self) -> &str;
    fn lift(&self, efficacy: f64, confidence: f64, signals: &CohortSignals) -> LiftedScore;
}

pub struct IdentityLift;

impl CohortLift for IdentityLift {
    fn name(&self) -> &str {
        "identity"
    }

    fn lift(&self, efficacy: f64, confidence: f64, _signals: &CohortSignals) -> LiftedScore {
        LiftedScore { efficacy, confidence }
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(FerrumyxError::DataShape(format!("{name} must be in [0, 1], got {value}")));
    }
    Ok(())
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Apply `lift` with input bounds checked and outputs clamped to [0, 1].
pub fn compose_lift(
    lift: &dyn CohortLift,
    efficacy: f64,
    confidence: f64,
    signals: &CohortSignals,
) -> Result<LiftedScore> {
    check_unit("efficacy", efficacy)?;
    check_unit("confidence", confidence)?;
    let out = lift.lift(efficacy, confidence, signals);
    Ok(LiftedScore {
        efficacy: clamp_unit(out.efficacy),
        confidence: clamp_unit(out.confidence),
    })
}
