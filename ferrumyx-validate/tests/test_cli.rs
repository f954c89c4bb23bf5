//! End-to-end runs of the validator binary against temporary cohort files.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use ferrumyx_test_utils::{cohort_document, separable_cohort, staged_cohort};
use serde_json::{json, Value};

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cohort(&self) -> PathBuf {
        let cohort = separable_cohort(12, 12, 42, 0.9, 0.1);
        self.write(
            "cohort.json",
            &cohort_document(&cohort, json!({"type": "cohort_extract", "n_patients": 24})),
        )
    }

    fn signal(&self) -> PathBuf {
        self.write("signal.json", r#"{"name": "diamond", "features": [{"feature_index": 42}, {"feature_index": 7}]}"#)
    }
}

fn validate(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ferrumyx-validate"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn policies_pass_and_write_both_artifacts() {
    let ws = Workspace::new();
    let (cohort, signal, report) = (ws.cohort(), ws.signal(), ws.path("out/policies.json"));

    let out = validate(&[
        "policies", "--cohort", s(&cohort), "--signal", s(&signal),
        "--min-auroc", "0.9", "--report", s(&report),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let json = read_json(&report);
    assert_eq!(json["status"], "PASSED");
    assert_eq!(json["results"].as_array().unwrap().len(), 4);
    assert_eq!(json["results"][0]["rank"], 1);
    assert_eq!(json["recommendation"], "max_of_max");
    assert_eq!(json["run_meta"]["validator"], "policies");

    let csv = std::fs::read_to_string(report.with_extension("csv")).unwrap();
    assert!(csv.starts_with("rank,policy,auroc,n_labeled,n_pos,n_neg"));
}

#[test]
fn guardrail_mismatch_fails_with_report() {
    let ws = Workspace::new();
    let (cohort, signal, report) = (ws.cohort(), ws.signal(), ws.path("features.json"));

    let out = validate(&[
        "features", "--cohort", s(&cohort), "--signal", s(&signal),
        "--expect-type", "missingness_simulation", "--expect-cases", "30",
        "--report", s(&report),
    ]);
    assert_eq!(out.status.code(), Some(1));

    let json = read_json(&report);
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["failures"].as_array().unwrap().len(), 2);
    assert_eq!(json["results"].as_array().unwrap().len(), 0);
}

#[test]
fn insufficient_labels_fail_with_report() {
    let ws = Workspace::new();
    let small = separable_cohort(3, 3, 42, 0.9, 0.1);
    let cohort = ws.write("small.json", &cohort_document(&small, json!({})));
    let (signal, report) = (ws.signal(), ws.path("bootstrap.json"));

    let out = validate(&[
        "bootstrap", "--cohort", s(&cohort), "--signal", s(&signal),
        "--replicates", "50", "--report", s(&report),
    ]);
    assert_eq!(out.status.code(), Some(1));

    let json = read_json(&report);
    assert_eq!(json["status"], "FAILED");
    assert!(json["failures"][0].as_str().unwrap().contains("Insufficient labels"));
}

#[test]
fn simulated_cohort_feeds_tier_summary() {
    let ws = Workspace::new();
    let cohort = ws.cohort();
    let simulated = ws.path("sim/cohort.json");

    let out = validate(&[
        "simulate-missingness", "--cohort", s(&cohort), "--out", s(&simulated),
        "--seed", "7", "--p-tmb", "1", "--p-msi", "0", "--p-hrd", "0",
        "--report", s(&ws.path("sim.json")),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let doc = read_json(&simulated);
    assert_eq!(doc["provenance"]["type"], "missingness_simulation");
    assert_eq!(doc["provenance"]["missingness_simulation"]["dropped"]["tmb"], 24);
    assert!(doc["cohort"]["patients"].as_array().unwrap().iter().all(|p| p["tmb"].is_null()));

    let tiers = ws.path("tiers.json");
    let out = validate(&[
        "tiers", "--cohort", s(&simulated), "--expect-type", "missingness_simulation",
        "--report", s(&tiers),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let json = read_json(&tiers);
    let l1 = json["results"].as_array().unwrap().iter().find(|r| r["tier"] == "L1").unwrap().clone();
    assert_eq!(l1["count"], 24);
}

#[test]
fn subgroups_and_reduced_vs_full_run() {
    let ws = Workspace::new();
    let cohort = ws.write("staged.json", &cohort_document(&staged_cohort(70, 42, 3), json!({})));
    let signal = ws.signal();

    let subgroups = ws.path("subgroups.json");
    let out = validate(&["subgroups", "--cohort", s(&cohort), "--signal", s(&signal), "--report", s(&subgroups)]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let names: Vec<String> = read_json(&subgroups)["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["subgroup"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["III", "IV", "unknown", "all"]);

    let rvf = ws.path("rvf.json");
    let out = validate(&[
        "reduced-vs-full", "--cohort", s(&cohort), "--signal", s(&signal), "--k", "1",
        "--report", s(&rvf),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let json = read_json(&rvf);
    assert_eq!(json["results"][0]["reduced_features"], "42");
    assert_eq!(json["recommendation"], "use reduced set");
}

#[test]
fn single_class_cohort_fails_without_recommendation() {
    let ws = Workspace::new();
    let resistant_only = separable_cohort(12, 0, 42, 0.9, 0.1);
    let cohort = ws.write("resistant.json", &cohort_document(&resistant_only, json!({})));
    let signal = ws.signal();

    let report = ws.path("policies.json");
    let out = validate(&["policies", "--cohort", s(&cohort), "--signal", s(&signal), "--report", s(&report)]);
    assert_eq!(out.status.code(), Some(1));
    let json = read_json(&report);
    assert_eq!(json["status"], "FAILED");
    assert!(json["recommendation"].is_null());
    assert!(json["failures"][0].as_str().unwrap().contains("Degenerate class"));

    for validator in ["features", "subgroups", "reduced-vs-full"] {
        let report = ws.path(&format!("{validator}.json"));
        let out = validate(&[validator, "--cohort", s(&cohort), "--signal", s(&signal), "--report", s(&report)]);
        assert_eq!(out.status.code(), Some(1), "{validator}");
        let json = read_json(&report);
        assert_eq!(json["status"], "FAILED", "{validator}");
        assert!(json["recommendation"].is_null(), "{validator}");
    }
}

#[test]
fn tier_policy_requires_signal() {
    let ws = Workspace::new();
    let (cohort, report) = (ws.cohort(), ws.path("tiers.json"));

    let out = validate(&["tiers", "--cohort", s(&cohort), "--policy", "sum_of_max", "--report", s(&report)]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--signal"));
    assert!(!report.exists());
}
