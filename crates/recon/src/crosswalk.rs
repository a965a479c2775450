//! Distinct-value crosswalk between two name columns (for example internal
//! district names against CRM account names).
//!
//! Values are lowercased and trimmed, deduplicated per side, and every pair is
//! scored with the shared-boilerplate-stripping ratio. The pair count is still
//! n * m, so pairs whose length bound cannot reach the threshold skip the
//! edit-distance computation and the left values are scored in parallel.

use std::collections::HashSet;

use rayon::prelude::*;
use serde::Serialize;

use crate::model::{RecordSet, Value};
use crate::similarity::{ratio, ratio_upper_bound, strip_shared_phrase};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrosswalkMatch {
    pub left: String,
    pub right: String,
    pub score: f64,
}

/// Lowercased, trimmed, non-empty distinct values in first-appearance order.
pub fn distinct_values(set: &RecordSet, column: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    set.rows
        .iter()
        .filter_map(|row| match row.get(column) {
            Value::Null => None,
            value => {
                let text = value.to_text().trim().to_lowercase();
                (!text.is_empty()).then_some(text)
            }
        })
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Every (left, right) pair of values scoring at least `threshold`, ordered by
/// left value then right value (first-appearance order).
pub fn crosswalk(left: &[String], right: &[String], threshold: f64) -> Vec<CrosswalkMatch> {
    let matches: Vec<CrosswalkMatch> = left
        .par_iter()
        .flat_map_iter(|l| {
            right.iter().filter_map(move |r| {
                let (ls, rs) = strip_shared_phrase(l, r);
                if ratio_upper_bound(ls.chars().count(), rs.chars().count()) < threshold {
                    return None;
                }
                let score = ratio(&ls, &rs);
                (score >= threshold).then(|| CrosswalkMatch {
                    left: l.clone(),
                    right: r.clone(),
                    score,
                })
            })
        })
        .collect();

    log::info!(
        "crosswalk: {} x {} distinct values -> {} pairs >= {threshold}",
        left.len(),
        right.len(),
        matches.len()
    );
    matches
}

/// Crosswalk two record-set columns.
pub fn crosswalk_columns(
    left: &RecordSet,
    left_column: &str,
    right: &RecordSet,
    right_column: &str,
    threshold: f64,
) -> Vec<CrosswalkMatch> {
    for (set, column) in [(left, left_column), (right, right_column)] {
        if !set.has_column(column) {
            log::warn!("crosswalk: column '{column}' not found, no values to compare");
        }
    }
    crosswalk(
        &distinct_values(left, left_column),
        &distinct_values(right, right_column),
        threshold,
    )
}

/// Flatten matches into a three-column record set.
pub fn to_record_set(matches: &[CrosswalkMatch], left_column: &str, right_column: &str) -> RecordSet {
    let score_column = "similarity_score";
    let rows = matches
        .iter()
        .map(|m| {
            [
                (left_column, Value::text(m.left.as_str())),
                (right_column, Value::text(m.right.as_str())),
                (score_column, Value::Number(m.score)),
            ]
            .into_iter()
            .collect()
        })
        .collect();
    RecordSet::with_rows(
        vec![left_column.into(), right_column.into(), score_column.into()],
        rows,
    )
}
