//! Rank statistics: AUROC via the Mann–Whitney rank sum, and average precision.
//!
//! Both metrics return `f64::NAN` when discrimination is undefined. Callers
//! must filter NaN before folding metrics into summaries.

use std::cmp::Ordering;

pub use ferrumyx_common::config::TieConvention;

/// NaN scores rank below everything; -0.0 and 0.0 tie.
fn sort_key(v: f64) -> f64 {
    if v.is_nan() {
        f64::NEG_INFINITY
    } else if v == 0.0 {
        0.0
    } else {
        v
    }
}

fn ascending(a: f64, b: f64) -> Ordering {
    sort_key(a).partial_cmp(&sort_key(b)).unwrap_or(Ordering::Equal)
}

/// Descending order with NaN placed last. Used wherever metrics are ranked.
pub fn descending_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// 1-based ranks of `values` in ascending order.
/// `Ordinal` keeps input order among ties (stable sort); `Midrank` averages them.
pub fn ranks(values: &[f64], ties: TieConvention) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| ascending(values[a], values[b]));

    let mut ranks = vec![0.0f64; n];
    match ties {
        TieConvention::Ordinal => {
            for (pos, &idx) in order.iter().enumerate() {
                ranks[idx] = (pos + 1) as f64;
            }
        }
        TieConvention::Midrank => {
            let mut i = 0;
            while i < n {
                let mut j = i;
                while j + 1 < n && ascending(values[order[j]], values[order[j + 1]]) == Ordering::Equal {
                    j += 1;
                }
                let avg_rank = (i + 1 + j + 1) as f64 / 2.0;
                for &idx in &order[i..=j] {
                    ranks[idx] = avg_rank;
                }
                i = j + 1;
            }
        }
    }
    ranks
}

/// AUROC with the default (midrank) tie convention.
pub fn auroc(labels: &[bool], scores: &[f64]) -> f64 {
    auroc_with(labels, scores, TieConvention::default())
}

/// AUROC = (R_pos − n_pos(n_pos+1)/2) / (n_pos·n_neg), ranks taken over the
/// positives followed by the negatives.
///
/// Returns NaN when either class is empty or the inputs differ in length.
pub fn auroc_with(labels: &[bool], scores: &[f64], ties: TieConvention) -> f64 {
    if labels.len() != scores.len() {
        tracing::warn!(labels = labels.len(), scores = scores.len(), "AUROC inputs differ in length");
        return f64::NAN;
    }

    let pos = labels.iter().zip(scores).filter(|(y, _)| **y).map(|(_, s)| *s);
    let neg = labels.iter().zip(scores).filter(|(y, _)| !**y).map(|(_, s)| *s);
    let combined: Vec<f64> = pos.chain(neg).collect();

    let n_pos = labels.iter().filter(|y| **y).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let r = ranks(&combined, ties);
    let rpos: f64 = r[..n_pos].iter().sum();
    let n_pos_f = n_pos as f64;
    (rpos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64)
}

/// Average precision (PR-AUC): Σ (R_k − R_{k−1}) · P_k over distinct score
/// thresholds, highest first. NaN when there are no positives.
pub fn average_precision(labels: &[bool], scores: &[f64]) -> f64 {
    if labels.len() != scores.len() {
        return f64::NAN;
    }
    let n_pos = labels.iter().filter(|y| **y).count();
    if n_pos == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| ascending(scores[b], scores[a]));

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        // Consume one threshold: every sample tied with order[i].
        let mut j = i;
        while j < order.len() && ascending(scores[order[i]], scores[order[j]]) == Ordering::Equal {
            if labels[order[j]] {
                tp += 1;
            } else {
                fp += 1;
            }
            j += 1;
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
        i = j;
    }
    ap
}
