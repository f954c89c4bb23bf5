//! ferrumyx-validation — Stress tests and statistical validators built on the
//! ranker: missingness simulation, stage subgroups, bootstrap intervals,
//! cohort lift, report artifacts and artifact guardrails.

pub mod missingness;
pub mod subgroup;
pub mod bootstrap;
pub mod lift;
pub mod report;
pub mod guardrail;

pub use bootstrap::{bootstrap, bootstrap_signal, BootstrapResult, MetricSummary};
pub use guardrail::{check_contract, enforce, ArtifactContract};
pub use lift::{compose_lift, CohortLift, CohortSignalSource, IdentityLift, NoCohortSignals};
pub use missingness::{simulate_missingness, SimulatedCohort};
pub use report::{ReportStatus, RunMeta, ValidationReport};
pub use subgroup::{stage_bucket, validate_subgroups, StageBucket, SubgroupRow};
