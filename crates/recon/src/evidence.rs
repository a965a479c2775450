use std::collections::BTreeMap;

use crate::model::{RecordSet, ReconSummary, StageReport};
use crate::proximity::DISTANCE_COLUMN;
use crate::quarantine::REASON_COLUMN;

/// Columns the summary averages over.
pub struct SummaryColumns<'a> {
    pub school_similarity: &'a str,
    pub district_similarity: &'a str,
    /// Right-side column that must be non-null for a row to count toward the
    /// district mean.
    pub district_presence: Option<&'a str>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Compute summary statistics from the two outputs of a run.
pub fn compute_summary(
    left_records: usize,
    matched: &RecordSet,
    quarantined: &RecordSet,
    stages: Vec<StageReport>,
    columns: &SummaryColumns<'_>,
) -> ReconSummary {
    let mut reason_counts: BTreeMap<String, usize> = BTreeMap::new();
    for row in &quarantined.rows {
        if let Some(reason) = row.key(REASON_COLUMN) {
            *reason_counts.entry(reason).or_insert(0) += 1;
        }
    }

    let mean_distance_m = mean(matched.rows.iter().filter_map(|r| r.get(DISTANCE_COLUMN).as_f64()));
    let mean_school_name_similarity =
        mean(matched.rows.iter().filter_map(|r| r.get(columns.school_similarity).as_f64()));
    let mean_district_name_similarity = columns.district_presence.and_then(|presence| {
        mean(
            matched
                .rows
                .iter()
                .filter(|r| !r.get(presence).is_null())
                .filter_map(|r| r.get(columns.district_similarity).as_f64()),
        )
    });

    ReconSummary {
        left_records,
        matched: matched.len(),
        quarantined: quarantined.len(),
        reason_counts,
        stages,
        mean_distance_m,
        mean_school_name_similarity,
        mean_district_name_similarity,
    }
}
