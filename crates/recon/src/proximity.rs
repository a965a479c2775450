//! Nearest-neighbor join of two record sets within a geodesic radius.
//!
//! Candidate generation uses a 3-D k-d tree over points projected onto a
//! sphere, queried with a slightly inflated radius. The index only proposes
//! candidates: every candidate's exact WGS-84 distance is recomputed and only
//! that distance decides inclusion.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geo::{chord_for_arc, geodesic_distance_m, GeoPoint};
use crate::model::{Record, RecordSet, Value};

/// Derived column holding the exact geodesic distance of a pair.
pub const DISTANCE_COLUMN: &str = "actual_distance_m";

/// Relative slack between the sphere projection and the ellipsoid.
const SEARCH_INFLATION: f64 = 1.01;
/// Absolute slack (m) for very small thresholds.
const SEARCH_PADDING_M: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Only pairs within the threshold.
    Inner,
    /// Every left record; unmatched ones get a null distance.
    #[default]
    Left,
    /// Every right record; unmatched ones get a null distance.
    Right,
}

impl std::fmt::Display for JoinMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inner => write!(f, "inner"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateColumns {
    pub latitude: String,
    pub longitude: String,
}

impl CoordinateColumns {
    pub fn new(latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
        }
    }

    fn point(&self, record: &Record) -> Option<GeoPoint> {
        GeoPoint::from_record(record, &self.latitude, &self.longitude)
    }
}

#[derive(Debug, Clone)]
pub struct ProximitySpec {
    pub left: CoordinateColumns,
    pub right: CoordinateColumns,
    pub max_distance_m: f64,
}

// ---------------------------------------------------------------------------
// k-d tree
// ---------------------------------------------------------------------------

/// Implicit balanced k-d tree: each subslice is split at its median, with the
/// median element stored in the middle.
struct KdTree {
    nodes: Vec<([f64; 3], usize)>,
}

impl KdTree {
    fn build(points: impl IntoIterator<Item = ([f64; 3], usize)>) -> Self {
        let mut nodes: Vec<_> = points.into_iter().collect();
        Self::partition(&mut nodes, 0);
        Self { nodes }
    }

    fn partition(nodes: &mut [([f64; 3], usize)], depth: usize) {
        if nodes.len() <= 1 {
            return;
        }
        let axis = depth % 3;
        let mid = nodes.len() / 2;
        nodes.select_nth_unstable_by(mid, |a, b| a.0[axis].total_cmp(&b.0[axis]));
        let (lower, rest) = nodes.split_at_mut(mid);
        Self::partition(lower, depth + 1);
        Self::partition(&mut rest[1..], depth + 1);
    }

    /// Indices of every point within `radius` (Euclidean) of `query`.
    fn within(&self, query: [f64; 3], radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        Self::search(&self.nodes, 0, query, radius, &mut found);
        found
    }

    fn search(nodes: &[([f64; 3], usize)], depth: usize, query: [f64; 3], radius: f64, found: &mut Vec<usize>) {
        if nodes.is_empty() {
            return;
        }
        let axis = depth % 3;
        let mid = nodes.len() / 2;
        let (point, index) = nodes[mid];

        let dist_sq: f64 = (0..3).map(|i| (point[i] - query[i]).powi(2)).sum();
        if dist_sq <= radius * radius {
            found.push(index);
        }

        let diff = query[axis] - point[axis];
        if diff <= radius {
            Self::search(&nodes[..mid], depth + 1, query, radius, found);
        }
        if diff >= -radius {
            Self::search(&nodes[mid + 1..], depth + 1, query, radius, found);
        }
    }
}

// ---------------------------------------------------------------------------
// Nearest within threshold
// ---------------------------------------------------------------------------

/// For each query point, the indexed points at the minimal exact distance,
/// provided that distance is within `max_distance_m`. Ties keep every tied
/// candidate in index order. Missing points never match.
pub fn nearest_within(
    queries: &[Option<GeoPoint>],
    indexed: &[Option<GeoPoint>],
    max_distance_m: f64,
) -> Vec<Vec<(usize, f64)>> {
    if !(max_distance_m.is_finite() && max_distance_m >= 0.0) {
        return vec![Vec::new(); queries.len()];
    }

    let tree = KdTree::build(
        indexed
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| (p.to_ecef(), i))),
    );
    let search_radius = chord_for_arc(max_distance_m * SEARCH_INFLATION + SEARCH_PADDING_M);

    queries
        .par_iter()
        .map(|query| {
            let Some(query) = query else {
                return Vec::new();
            };
            let mut candidates: Vec<(usize, f64)> = tree
                .within(query.to_ecef(), search_radius)
                .into_iter()
                .filter_map(|i| {
                    let target = indexed[i]?;
                    let d = geodesic_distance_m(*query, target);
                    (d <= max_distance_m).then_some((i, d))
                })
                .collect();

            let Some(best) = candidates.iter().map(|(_, d)| *d).min_by(f64::total_cmp) else {
                return Vec::new();
            };
            candidates.retain(|(_, d)| *d == best);
            candidates.sort_by_key(|(i, _)| *i);
            candidates
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

fn joined_columns(left: &RecordSet, right: &RecordSet) -> Vec<String> {
    let mut columns = left.columns.clone();
    for column in &right.columns {
        if left.has_column(column) {
            log::warn!("proximity: column '{column}' exists on both sides, keeping left value");
        } else {
            columns.push(column.clone());
        }
    }
    if !columns.iter().any(|c| c == DISTANCE_COLUMN) {
        columns.push(DISTANCE_COLUMN.to_string());
    }
    columns
}

fn merge(left: Option<&Record>, right: Option<&Record>, distance: Option<f64>) -> Record {
    let mut merged = Record::new();
    for side in [right, left].into_iter().flatten() {
        for (column, value) in side.fields() {
            merged.set(column.clone(), value.clone());
        }
    }
    merged.set(DISTANCE_COLUMN, Value::number(distance));
    merged
}

/// Pair each record with its nearest counterpart within `spec.max_distance_m`.
///
/// Output rows carry the fields of both sides plus [`DISTANCE_COLUMN`].
/// `Left`/`Right` keep unmatched records of that side with a null distance and
/// null counterpart fields; `Inner` drops them. A record with several
/// equidistant nearest counterparts yields one row per counterpart.
pub fn proximity_join(left: &RecordSet, right: &RecordSet, spec: &ProximitySpec, mode: JoinMode) -> RecordSet {
    let left_points: Vec<_> = left.rows.iter().map(|r| spec.left.point(r)).collect();
    let right_points: Vec<_> = right.rows.iter().map(|r| spec.right.point(r)).collect();
    let columns = joined_columns(left, right);

    let rows = match mode {
        JoinMode::Inner | JoinMode::Left => {
            let nearest = nearest_within(&left_points, &right_points, spec.max_distance_m);
            let mut rows = Vec::with_capacity(left.len());
            for (record, hits) in left.rows.iter().zip(nearest) {
                if hits.is_empty() {
                    if mode == JoinMode::Left {
                        rows.push(merge(Some(record), None, None));
                    }
                    continue;
                }
                for (j, d) in hits {
                    rows.push(merge(Some(record), Some(&right.rows[j]), Some(d)));
                }
            }
            rows
        }
        JoinMode::Right => {
            let nearest = nearest_within(&right_points, &left_points, spec.max_distance_m);
            let mut rows = Vec::with_capacity(right.len());
            for (record, hits) in right.rows.iter().zip(nearest) {
                if hits.is_empty() {
                    rows.push(merge(None, Some(record), None));
                    continue;
                }
                for (i, d) in hits {
                    rows.push(merge(Some(&left.rows[i]), Some(record), Some(d)));
                }
            }
            rows
        }
    };

    log::info!(
        "proximity join ({mode}, {} m): {} left x {} right -> {} rows",
        spec.max_distance_m,
        left.len(),
        right.len(),
        rows.len()
    );

    RecordSet::with_rows(columns, rows)
}
