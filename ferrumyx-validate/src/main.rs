//! ferrumyx-validate — batch validators for biomarker signals.
//!
//! Each subcommand loads a cohort artifact, checks its provenance contract,
//! runs one validator and writes a JSON report with a CSV sibling. The report
//! is written on every run; the exit code is 0 for PASSED and 1 for FAILED.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ferrumyx_common::cohort::{load_cohort, load_signal, LoadedCohort};
use ferrumyx_common::confidence::{classify_cohort, summarize_tiers, TierCeilingCap, TierCount};
use ferrumyx_common::config::EngineConfig;
use ferrumyx_common::error::FerrumyxError;
use ferrumyx_ranker::aggregation::{
    compare_policies, feature_ranking, reduced_vs_full, tiered_scores, FeatureAuroc, TieredScore,
};
use ferrumyx_ranker::policy::{AggregationPolicy, PolicyRegistry};
use ferrumyx_validation::bootstrap::{bootstrap_signal, MetricSummary};
use ferrumyx_validation::guardrail::{check_contract, ArtifactContract};
use ferrumyx_validation::missingness::simulate_missingness;
use ferrumyx_validation::report::{
    MissingnessRow, PolicyRow, ReducedVsFullRow, ReportStatus, RunMeta, ValidationReport,
};
use ferrumyx_validation::subgroup::{validate_subgroups, SubgroupRow};

#[derive(Parser)]
#[command(name = "ferrumyx-validate")]
#[command(version, about = "Validate biomarker signals against labeled cohorts", long_about = None)]
struct Cli {
    /// Engine configuration file (toml, yaml or json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Report path; a .csv sibling is written next to it
    /// (defaults to reports/<subcommand>.json)
    #[arg(long, global = true, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Outcome label counted as the positive class (repeatable)
    #[arg(long = "positive-label", global = true, value_name = "LABEL")]
    positive_labels: Vec<String>,

    /// Outcome label counted as the negative class (repeatable)
    #[arg(long = "negative-label", global = true, value_name = "LABEL")]
    negative_labels: Vec<String>,

    /// Required provenance type of the cohort artifact
    #[arg(long, global = true, value_name = "TYPE")]
    expect_type: Option<String>,

    /// Required number of patient records in the cohort artifact
    #[arg(long, global = true, value_name = "N")]
    expect_cases: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank aggregation policies for a signal by AUROC
    Policies {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        #[arg(long, value_name = "PATH")]
        signal: PathBuf,

        /// k for the top_k_mean policy
        #[arg(long)]
        top_k: Option<usize>,

        /// Fail unless the best policy reaches this AUROC
        #[arg(long)]
        min_auroc: Option<f64>,
    },

    /// Compare the top-k feature subset against the full signal
    ReducedVsFull {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        #[arg(long, value_name = "PATH")]
        signal: PathBuf,

        /// Size of the reduced feature set
        #[arg(long)]
        k: Option<usize>,

        /// Largest |full − reduced| AUROC gap that still favours the reduced set
        #[arg(long)]
        tolerance: Option<f64>,

        /// Reference aggregation policy
        #[arg(long)]
        policy: Option<String>,
    },

    /// Per-feature AUROC ranking
    Features {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        #[arg(long, value_name = "PATH")]
        signal: PathBuf,
    },

    /// Confidence tier distribution, or tier-capped scores with --signal
    Tiers {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        #[arg(long, value_name = "PATH")]
        signal: Option<PathBuf>,

        /// Policy for the capped scores; only meaningful with --signal
        #[arg(long, requires = "signal")]
        policy: Option<String>,
    },

    /// Write a copy of the cohort with biomarker groups randomly dropped
    SimulateMissingness {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        /// Output cohort document
        #[arg(long, value_name = "PATH")]
        out: PathBuf,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        p_tmb: Option<f64>,

        #[arg(long)]
        p_msi: Option<f64>,

        #[arg(long)]
        p_hrd: Option<f64>,
    },

    /// AUROC within stage III / IV partitions
    Subgroups {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        #[arg(long, value_name = "PATH")]
        signal: PathBuf,

        #[arg(long)]
        min_partition_size: Option<usize>,

        #[arg(long)]
        policy: Option<String>,

        /// Fail when a reliable partition falls below this AUROC
        #[arg(long)]
        min_auroc: Option<f64>,
    },

    /// Stratified bootstrap confidence intervals for AUROC and PR-AUC
    Bootstrap {
        #[arg(long, value_name = "PATH")]
        cohort: PathBuf,

        #[arg(long, value_name = "PATH")]
        signal: PathBuf,

        #[arg(long)]
        replicates: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        policy: Option<String>,

        /// Fail when the AUROC 2.5th percentile falls below this value
        #[arg(long)]
        min_ci_lower: Option<f64>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Policies { .. } => "policies",
            Commands::ReducedVsFull { .. } => "reduced-vs-full",
            Commands::Features { .. } => "features",
            Commands::Tiers { .. } => "tiers",
            Commands::SimulateMissingness { .. } => "simulate-missingness",
            Commands::Subgroups { .. } => "subgroups",
            Commands::Bootstrap { .. } => "bootstrap",
        }
    }

    fn cohort(&self) -> &Path {
        match self {
            Commands::Policies { cohort, .. }
            | Commands::ReducedVsFull { cohort, .. }
            | Commands::Features { cohort, .. }
            | Commands::Tiers { cohort, .. }
            | Commands::SimulateMissingness { cohort, .. }
            | Commands::Subgroups { cohort, .. }
            | Commands::Bootstrap { cohort, .. } => cohort.as_path(),
        }
    }

    fn signal(&self) -> Option<&Path> {
        match self {
            Commands::Policies { signal, .. }
            | Commands::ReducedVsFull { signal, .. }
            | Commands::Features { signal, .. }
            | Commands::Subgroups { signal, .. }
            | Commands::Bootstrap { signal, .. } => Some(signal.as_path()),
            Commands::Tiers { signal, .. } => signal.as_deref(),
            Commands::SimulateMissingness { .. } => None,
        }
    }

    /// Fold subcommand flags into the engine configuration.
    fn apply_overrides(&self, config: &mut EngineConfig) {
        match self {
            Commands::Policies { top_k, .. } => {
                if let Some(k) = top_k {
                    config.aggregation.top_k = *k;
                }
            }
            Commands::ReducedVsFull { k, tolerance, policy, .. } => {
                if let Some(k) = k {
                    config.aggregation.reduced_k = *k;
                }
                if let Some(t) = tolerance {
                    config.aggregation.tolerance = *t;
                }
                if let Some(p) = policy {
                    config.aggregation.reference_policy = p.clone();
                }
            }
            Commands::SimulateMissingness { seed, p_tmb, p_msi, p_hrd, .. } => {
                if let Some(s) = seed {
                    config.missingness.seed = *s;
                }
                if let Some(p) = p_tmb {
                    config.missingness.p_tmb = *p;
                }
                if let Some(p) = p_msi {
                    config.missingness.p_msi = *p;
                }
                if let Some(p) = p_hrd {
                    config.missingness.p_hrd = *p;
                }
            }
            Commands::Subgroups { min_partition_size, .. } => {
                if let Some(n) = min_partition_size {
                    config.validation.min_partition_size = *n;
                }
            }
            Commands::Bootstrap { replicates, seed, .. } => {
                if let Some(r) = replicates {
                    config.bootstrap.replicates = *r;
                }
                if let Some(s) = seed {
                    config.bootstrap.seed = *s;
                }
            }
            Commands::Features { .. } | Commands::Tiers { .. } => {}
        }
    }
}

/// Effective configuration and input contract for one run.
struct Context {
    config: EngineConfig,
    contract: ArtifactContract,
}

impl Context {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = EngineConfig::load(cli.config.as_deref())?;
        if !cli.positive_labels.is_empty() {
            config.labels.positive = cli.positive_labels.clone();
        }
        if !cli.negative_labels.is_empty() {
            config.labels.negative = cli.negative_labels.clone();
        }
        cli.command.apply_overrides(&mut config);
        config.validate()?;

        Ok(Self {
            config,
            contract: ArtifactContract {
                artifact_type: cli.expect_type.clone(),
                n_cases: cli.expect_cases,
            },
        })
    }

    fn meta(&self, mut meta: RunMeta) -> anyhow::Result<RunMeta> {
        meta.parameters = serde_json::to_value(&self.config)?;
        Ok(meta)
    }

    /// Load the cohort and check it against the input contract.
    fn load(&self, meta: &mut RunMeta, path: &Path) -> anyhow::Result<(LoadedCohort, Vec<String>)> {
        let loaded = load_cohort(path).with_context(|| format!("Failed to load cohort {}", path.display()))?;
        meta.skipped_records = loaded.skipped.len();
        let violations = check_contract(
            &self.contract,
            &loaded.provenance,
            loaded.cohort.patients.len() + loaded.skipped.len(),
            &self.config.labels,
        );
        Ok((loaded, violations))
    }

    fn policy<'a>(
        &self,
        registry: &'a PolicyRegistry,
        name: Option<&str>,
    ) -> anyhow::Result<&'a dyn AggregationPolicy> {
        let name = name.unwrap_or(self.config.aggregation.reference_policy.as_str());
        registry.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown aggregation policy '{name}' (registered: {})",
                registry.names().join(", ")
            )
        })
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────────

/// AUROC is undefined unless both outcome classes are present.
fn degenerate_class(validator: &str, n_pos: usize, n_neg: usize) -> Option<String> {
    (n_pos == 0 || n_neg == 0).then(|| {
        FerrumyxError::DegenerateClass(format!(
            "{validator} needs both outcome classes, got {n_pos} positive and {n_neg} negative"
        ))
        .to_string()
    })
}

fn run_policies(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    signal: &Path,
    min_auroc: Option<f64>,
) -> anyhow::Result<ValidationReport<PolicyRow>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let signal = load_signal(signal)?;
    let registry = PolicyRegistry::with_defaults(ctx.config.aggregation.top_k);
    let cmp = compare_policies(&loaded.cohort, &signal, &registry, &ctx.config)?;
    meta.unlabeled = cmp.unlabeled;

    let mut report = ValidationReport::new(meta, PolicyRow::from_comparison(&cmp));
    if let Some(failure) = degenerate_class("policies", cmp.n_pos, cmp.n_neg) {
        report.fail(failure);
        return Ok(report);
    }
    let best = cmp.results.first().filter(|r| !r.auroc.is_nan());
    report.recommendation = best.map(|r| r.policy.clone());
    if best.is_none() {
        report.fail("no policy produced a defined AUROC".to_string());
    }
    if let (Some(min), Some(best)) = (min_auroc, best) {
        if !(best.auroc >= min) {
            report.fail(format!("best policy {} has AUROC {:.4}, below {min}", best.policy, best.auroc));
        }
    }
    Ok(report)
}

fn run_reduced_vs_full(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    signal: &Path,
) -> anyhow::Result<ValidationReport<ReducedVsFullRow>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let signal = load_signal(signal)?;
    let registry = PolicyRegistry::with_defaults(ctx.config.aggregation.top_k);
    let outcome = reduced_vs_full(&loaded.cohort, &signal, &registry, &ctx.config)?;
    let labeled = loaded.cohort.labeled(&ctx.config.labels);
    meta.unlabeled = labeled.unlabeled;

    let mut report = ValidationReport::new(meta, vec![ReducedVsFullRow::from(&outcome)]);
    if let Some(failure) = degenerate_class("reduced-vs-full", labeled.n_pos(), labeled.n_neg()) {
        report.fail(failure);
        return Ok(report);
    }
    report.recommendation = Some(outcome.recommendation.as_str().to_string());
    Ok(report)
}

fn run_features(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    signal: &Path,
) -> anyhow::Result<ValidationReport<FeatureAuroc>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let signal = load_signal(signal)?;
    let rows = feature_ranking(&loaded.cohort, &signal, &ctx.config)?;
    let labeled = loaded.cohort.labeled(&ctx.config.labels);
    meta.unlabeled = labeled.unlabeled;

    let mut report = ValidationReport::new(meta, rows);
    if let Some(failure) = degenerate_class("features", labeled.n_pos(), labeled.n_neg()) {
        report.fail(failure);
    }
    Ok(report)
}

fn run_tier_summary(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
) -> anyhow::Result<ValidationReport<TierCount>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    meta.unlabeled = loaded.cohort.labeled(&ctx.config.labels).unlabeled;
    let tiers = classify_cohort(&loaded.cohort, &ctx.config.tiers);
    let summary = summarize_tiers(&tiers);
    for row in &summary {
        info!(tier = %row.tier, count = row.count, percentage = row.percentage, "Tier distribution");
    }
    Ok(ValidationReport::new(meta, summary))
}

fn run_tier_scores(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    signal: &Path,
    policy: Option<&str>,
) -> anyhow::Result<ValidationReport<TieredScore>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let signal = load_signal(signal)?;
    let registry = PolicyRegistry::with_defaults(ctx.config.aggregation.top_k);
    let policy = ctx.policy(&registry, policy)?;
    meta.unlabeled = loaded.cohort.labeled(&ctx.config.labels).unlabeled;
    let cap = TierCeilingCap::from_config(&ctx.config.tiers);
    let rows = tiered_scores(&loaded.cohort, &signal, policy, &ctx.config.tiers, &cap);
    Ok(ValidationReport::new(meta, rows))
}

fn run_simulate_missingness(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    out: &Path,
) -> anyhow::Result<ValidationReport<MissingnessRow>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let simulated = simulate_missingness(
        &loaded.cohort,
        &ctx.config.missingness,
        &ctx.config.tiers.missing_sentinels,
        &cohort.display().to_string(),
        meta.generated_at,
    )?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let document = simulated.to_document(&loaded.provenance)?;
    std::fs::write(out, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("Failed to write simulated cohort {}", out.display()))?;
    info!(out = %out.display(), "Simulated cohort written");

    meta.seed = Some(ctx.config.missingness.seed);
    meta.inputs.insert("out".to_string(), out.display().to_string());
    Ok(ValidationReport::new(meta, MissingnessRow::from_provenance(&simulated.provenance)))
}

fn run_subgroups(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    signal: &Path,
    policy: Option<&str>,
    min_auroc: Option<f64>,
) -> anyhow::Result<ValidationReport<SubgroupRow>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let signal = load_signal(signal)?;
    let registry = PolicyRegistry::with_defaults(ctx.config.aggregation.top_k);
    let policy = ctx.policy(&registry, policy)?;
    let outcome = validate_subgroups(&loaded.cohort, &signal, policy, &ctx.config)?;
    meta.unlabeled = outcome.unlabeled;

    let mut failures = Vec::new();
    if let Some(all) = outcome.rows.iter().find(|r| r.subgroup == "all") {
        failures.extend(degenerate_class("subgroups", all.n_pos, all.n_neg));
    }
    if let Some(min) = min_auroc {
        for row in outcome.rows.iter().filter(|r| r.reliable) {
            if let Some(auroc) = row.auroc.filter(|a| *a < min) {
                failures.push(format!("subgroup {} AUROC {auroc:.4} below {min}", row.subgroup));
            }
        }
    }
    let mut report = ValidationReport::new(meta, outcome.rows);
    for failure in failures {
        report.fail(failure);
    }
    Ok(report)
}

fn run_bootstrap(
    ctx: &Context,
    mut meta: RunMeta,
    cohort: &Path,
    signal: &Path,
    policy: Option<&str>,
    min_ci_lower: Option<f64>,
) -> anyhow::Result<ValidationReport<MetricSummary>> {
    let (loaded, violations) = ctx.load(&mut meta, cohort)?;
    if !violations.is_empty() {
        return Ok(ValidationReport::failed(meta, violations));
    }
    let signal = load_signal(signal)?;
    let registry = PolicyRegistry::with_defaults(ctx.config.aggregation.top_k);
    let policy = ctx.policy(&registry, policy)?;
    let outcome = bootstrap_signal(&loaded.cohort, &signal, policy, &ctx.config, None)?;
    meta.seed = Some(outcome.seed);
    meta.unlabeled = loaded.cohort.labeled(&ctx.config.labels).unlabeled;

    let lower = outcome.auroc.p2_5;
    let mut report = ValidationReport::new(meta, vec![outcome.auroc, outcome.pr_auc]);
    if let Some(min) = min_ci_lower {
        if !(lower >= min) {
            report.fail(format!("AUROC 95% CI lower bound {lower:.4} below {min}"));
        }
    }
    Ok(report)
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Write the report, turning an error into a FAILED report first.
fn finish<R: Serialize>(
    path: &Path,
    meta: RunMeta,
    outcome: anyhow::Result<ValidationReport<R>>,
) -> anyhow::Result<ReportStatus> {
    let report = outcome.unwrap_or_else(|e| {
        error!("{e:#}");
        ValidationReport::failed(meta, vec![format!("{e:#}")])
    });
    for failure in &report.failures {
        warn!("{failure}");
    }
    let csv_path = report.write(path)?;
    info!(
        status = ?report.status,
        report = %path.display(),
        csv = %csv_path.display(),
        "Validation finished"
    );
    Ok(report.status)
}

/// A configuration error is reported once the report path is known.
fn prepare(ctx: &anyhow::Result<Context>, meta: RunMeta) -> anyhow::Result<(&Context, RunMeta)> {
    let ctx = ctx.as_ref().map_err(|e| anyhow!("{e:#}"))?;
    Ok((ctx, ctx.meta(meta)?))
}

fn run(cli: Cli) -> anyhow::Result<ReportStatus> {
    let command = &cli.command;
    let report_path = cli
        .report
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("reports/{}.json", command.name())));

    let mut meta = RunMeta::new(command.name()).input("cohort", command.cohort());
    if let Some(signal) = command.signal() {
        meta = meta.input("signal", signal);
    }

    let ctx = Context::from_cli(&cli);

    match command {
        Commands::Policies { cohort, signal, min_auroc, .. } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| run_policies(ctx, meta, cohort, signal, *min_auroc)),
        ),
        Commands::ReducedVsFull { cohort, signal, .. } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| run_reduced_vs_full(ctx, meta, cohort, signal)),
        ),
        Commands::Features { cohort, signal } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| run_features(ctx, meta, cohort, signal)),
        ),
        Commands::Tiers { cohort, signal: None, .. } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| run_tier_summary(ctx, meta, cohort)),
        ),
        Commands::Tiers { cohort, signal: Some(signal), policy } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta)
                .and_then(|(ctx, meta)| run_tier_scores(ctx, meta, cohort, signal, policy.as_deref())),
        ),
        Commands::SimulateMissingness { cohort, out, .. } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| run_simulate_missingness(ctx, meta, cohort, out)),
        ),
        Commands::Subgroups { cohort, signal, policy, min_auroc, .. } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| {
                run_subgroups(ctx, meta, cohort, signal, policy.as_deref(), *min_auroc)
            }),
        ),
        Commands::Bootstrap { cohort, signal, policy, min_ci_lower, .. } => finish(
            &report_path,
            meta.clone(),
            prepare(&ctx, meta).and_then(|(ctx, meta)| {
                run_bootstrap(ctx, meta, cohort, signal, policy.as_deref(), *min_ci_lower)
            }),
        ),
    }
}

fn main() -> ExitCode {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ferrumyx=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    info!("ferrumyx-validate {} running {}", env!("CARGO_PKG_VERSION"), cli.command.name());

    match run(cli) {
        Ok(ReportStatus::Passed) => ExitCode::SUCCESS,
        Ok(ReportStatus::Failed) => ExitCode::FAILURE,
        Err(e) => {
            error!("Could not write report: {e:#}");
            ExitCode::from(2)
        }
    }
}
