//! Gate primitives for the quarantine pipeline.
//!
//! A gate partitions the working set into kept and removed pairs and admits
//! the removed ones into the [`Quarantine`] accumulator, which is threaded
//! through the pipeline by value: `(kept, quarantine) = gate(kept, quarantine)`.
//! Removal is keyed by the left identifier, so a left record is never both
//! matched and quarantined.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{Record, RecordSet, Value};

pub const REASON_COLUMN: &str = "quarantine_reason";
pub const STAGE_COLUMN: &str = "quarantine_stage";
pub const AUTHORITY_HASH_COLUMN: &str = "authority_hash_12";

// ---------------------------------------------------------------------------
// Reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    MissingIdentifier,
    RepeatedIdentifier,
    OutOfScopeRegion,
    NoNearbyCandidate,
    SchoolNamesDisagree,
    DistrictNamesDisagree,
    SuspectedDuplicate,
    NoSingleAuthority,
}

impl QuarantineReason {
    /// Pipeline stage that assigns this reason.
    pub fn stage(&self) -> u8 {
        match self {
            Self::MissingIdentifier | Self::RepeatedIdentifier => 0,
            Self::OutOfScopeRegion => 1,
            Self::NoNearbyCandidate => 2,
            Self::SchoolNamesDisagree => 5,
            Self::DistrictNamesDisagree => 6,
            Self::SuspectedDuplicate => 8,
            Self::NoSingleAuthority => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingIdentifier => "missing school identifier",
            Self::RepeatedIdentifier => "repeated school identifier",
            Self::OutOfScopeRegion => "out of scope region",
            Self::NoNearbyCandidate => "no nearby candidate schools",
            Self::SchoolNamesDisagree => "school names disagree",
            Self::DistrictNamesDisagree => "district names disagree",
            Self::SuspectedDuplicate => "suspected duplicate match",
            Self::NoSingleAuthority => "no single authority match",
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Quarantine {
    columns: Vec<String>,
    known: HashSet<String>,
    entries: Vec<(Record, QuarantineReason)>,
}

impl Quarantine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn admit(&mut self, columns: &[String], record: Record, reason: QuarantineReason) {
        for column in columns {
            if !self.known.contains(column) {
                self.known.insert(column.clone());
                self.columns.push(column.clone());
            }
        }
        self.entries.push((record, reason));
    }

    pub fn reasons(&self) -> impl Iterator<Item = QuarantineReason> + '_ {
        self.entries.iter().map(|(_, reason)| *reason)
    }

    pub fn reason_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for reason in self.reasons() {
            *counts.entry(reason.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Flatten to a record set: every column seen by any gate, then
    /// [`REASON_COLUMN`] and [`STAGE_COLUMN`]. Rows are grouped by stage and
    /// otherwise keep admission order.
    pub fn into_record_set(self) -> RecordSet {
        let mut columns = self.columns;
        columns.retain(|c| c != REASON_COLUMN && c != STAGE_COLUMN);
        columns.push(REASON_COLUMN.into());
        columns.push(STAGE_COLUMN.into());

        let mut entries = self.entries;
        entries.sort_by_key(|(_, reason)| reason.stage());

        let rows = entries
            .into_iter()
            .map(|(mut record, reason)| {
                record.set(REASON_COLUMN, Value::text(reason.as_str()));
                record.set(STAGE_COLUMN, Value::Number(f64::from(reason.stage())));
                record
            })
            .collect();

        RecordSet::with_rows(columns, rows)
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Screen left records before any pairing: a blank identifier or one shared
/// by several rows cannot be tracked through the id-keyed gates. Every such
/// row is quarantined on its own.
pub fn identifier_gate(working: RecordSet, mut quarantine: Quarantine, id_column: &str) -> (RecordSet, Quarantine) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in &working.rows {
        if let Some(id) = row.key(id_column) {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    let RecordSet { columns, rows } = working;
    let before = quarantine.len();
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        match row.key(id_column) {
            None => quarantine.admit(&columns, row, QuarantineReason::MissingIdentifier),
            Some(id) if counts.get(&id).is_some_and(|n| *n > 1) => {
                quarantine.admit(&columns, row, QuarantineReason::RepeatedIdentifier)
            }
            Some(_) => kept.push(row),
        }
    }

    let removed = quarantine.len() - before;
    if removed > 0 {
        log::warn!("{removed} left records have a blank or repeated '{id_column}' and were quarantined");
    }
    log::info!("stage 0 (identifier check): kept {} records, quarantined {removed}", kept.len());

    (RecordSet::with_rows(columns, kept), quarantine)
}

/// Remove every pair whose left record has at least one pair matching
/// `reject`. The quarantine receives one row per removed left record: its
/// first rejected pair in working-set order. Rows with a blank identifier are
/// judged individually; the pipeline screens those out with
/// [`identifier_gate`] first.
pub fn apply_gate<F>(
    working: RecordSet,
    mut quarantine: Quarantine,
    id_column: &str,
    reason: QuarantineReason,
    reject: F,
) -> (RecordSet, Quarantine)
where
    F: Fn(&Record) -> bool + Sync,
{
    let flags: Vec<bool> = working.rows.par_iter().map(|row| reject(row)).collect();
    let rejected_ids: HashSet<String> = working
        .rows
        .iter()
        .zip(&flags)
        .filter(|(_, rejected)| **rejected)
        .filter_map(|(row, _)| row.key(id_column))
        .collect();

    let RecordSet { columns, rows } = working;
    let before = quarantine.len();
    let mut admitted: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());

    for (row, rejected) in rows.into_iter().zip(flags) {
        match row.key(id_column) {
            Some(id) if rejected_ids.contains(&id) => {
                if rejected && admitted.insert(id) {
                    quarantine.admit(&columns, row, reason);
                }
            }
            Some(_) => kept.push(row),
            None if rejected => quarantine.admit(&columns, row, reason),
            None => kept.push(row),
        }
    }

    log::info!(
        "stage {} ({reason}): kept {} pairs, quarantined {} records",
        reason.stage(),
        kept.len(),
        quarantine.len() - before
    );

    (RecordSet::with_rows(columns, kept), quarantine)
}

fn score_of(row: &Record, column: &str) -> f64 {
    row.get(column).as_f64().unwrap_or(f64::NEG_INFINITY)
}

/// Keep the highest-scoring pair per left identifier. Ties keep the earliest
/// pair; surviving pairs keep their working-set order. Missing scores rank
/// lowest.
pub fn select_best_match(working: RecordSet, id_column: &str, score_column: &str) -> RecordSet {
    let mut best: HashMap<String, usize> = HashMap::new();
    for (i, row) in working.rows.iter().enumerate() {
        let Some(id) = row.key(id_column) else {
            continue;
        };
        let score = score_of(row, score_column);
        best.entry(id)
            .and_modify(|current| {
                if score > score_of(&working.rows[*current], score_column) {
                    *current = i;
                }
            })
            .or_insert(i);
    }

    let RecordSet { columns, rows } = working;
    let before = rows.len();
    let kept: Vec<Record> = rows
        .into_iter()
        .enumerate()
        .filter(|(i, row)| match row.key(id_column) {
            Some(id) => best.get(&id) == Some(i),
            None => true,
        })
        .map(|(_, row)| row)
        .collect();

    log::info!("stage 7 (best match): {before} pairs -> {}", kept.len());
    RecordSet::with_rows(columns, kept)
}

/// Right identifiers claimed by more than one distinct left identifier.
pub fn colliding_targets(working: &RecordSet, left_id: &str, right_id: &str) -> HashSet<String> {
    let mut claims: HashMap<String, HashSet<String>> = HashMap::new();
    for row in &working.rows {
        if let (Some(l), Some(r)) = (row.key(left_id), row.key(right_id)) {
            claims.entry(r).or_default().insert(l);
        }
    }
    claims
        .into_iter()
        .filter(|(_, lefts)| lefts.len() > 1)
        .map(|(r, _)| r)
        .collect()
}

// ---------------------------------------------------------------------------
// Authority fingerprint
// ---------------------------------------------------------------------------

/// First 12 hex chars of SHA-256 over the named fields joined by `|`
/// (null as empty).
pub fn authority_fingerprint(record: &Record, fields: &[String]) -> String {
    let joined = fields
        .iter()
        .map(|f| record.get(f).to_text())
        .collect::<Vec<_>>()
        .join("|");
    let digest = Sha256::digest(joined.as_bytes());
    let hex = format!("{digest:x}");
    hex[..12].to_string()
}

pub fn add_authority_fingerprint(set: &mut RecordSet, fields: &[String]) {
    set.rows.par_iter_mut().for_each(|row| {
        let hash = authority_fingerprint(row, fields);
        row.set(AUTHORITY_HASH_COLUMN, Value::text(hash));
    });
    set.add_column(AUTHORITY_HASH_COLUMN);
}

/// Fingerprints that do not map to exactly one distinct non-null value of
/// `left_district_id`.
pub fn ambiguous_authorities(working: &RecordSet, left_district_id: &str) -> HashSet<String> {
    let mut districts: HashMap<String, HashSet<String>> = HashMap::new();
    for row in &working.rows {
        let Some(hash) = row.key(AUTHORITY_HASH_COLUMN) else {
            continue;
        };
        let entry = districts.entry(hash).or_default();
        if let Some(district) = row.key(left_district_id) {
            entry.insert(district);
        }
    }
    districts
        .into_iter()
        .filter(|(_, ids)| ids.len() != 1)
        .map(|(hash, _)| hash)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(left: &str, right: &str, score: f64) -> Record {
        [
            ("L_ID", Value::text(left)),
            ("R_ID", Value::text(right)),
            ("score", Value::Number(score)),
        ]
        .into_iter()
        .collect()
    }

    fn working(rows: Vec<Record>) -> RecordSet {
        RecordSet::with_rows(vec!["L_ID".into(), "R_ID".into(), "score".into()], rows)
    }

    fn ids(set: &RecordSet, column: &str) -> Vec<String> {
        set.rows.iter().map(|r| r.get(column).to_text()).collect()
    }

    #[test]
    fn reason_strings_and_stages() {
        assert_eq!(QuarantineReason::NoNearbyCandidate.to_string(), "no nearby candidate schools");
        assert_eq!(QuarantineReason::SuspectedDuplicate.to_string(), "suspected duplicate match");
        assert_eq!(QuarantineReason::OutOfScopeRegion.stage(), 1);
        assert_eq!(QuarantineReason::NoSingleAuthority.stage(), 9);
        assert_eq!(QuarantineReason::MissingIdentifier.stage(), 0);
    }

    #[test]
    fn identifier_gate_quarantines_blank_and_repeated_ids() {
        let mut blank = pair("", "x", 1.0);
        blank.set("L_ID", Value::Null);
        let set = working(vec![pair("a", "x", 1.0), blank, pair("b", "y", 1.0), pair("b", "z", 1.0), pair("c", "w", 1.0)]);

        let (kept, q) = identifier_gate(set, Quarantine::new(), "L_ID");
        assert_eq!(ids(&kept, "L_ID"), vec!["a", "c"]);
        assert_eq!(q.len(), 3);

        let out = q.into_record_set();
        assert_eq!(ids(&out, "R_ID"), vec!["x", "y", "z"]);
        assert_eq!(
            ids(&out, REASON_COLUMN),
            vec!["missing school identifier", "repeated school identifier", "repeated school identifier"]
        );
        assert_eq!(out.rows[0].get(STAGE_COLUMN), &Value::Number(0.0));
    }

    #[test]
    fn admitted_columns_stay_unique_and_ordered() {
        let mut q = Quarantine::new();
        let first = vec!["L_ID".to_string(), "R_ID".to_string()];
        let second = vec!["R_ID".to_string(), "L_ID".to_string(), "score".to_string()];
        q.admit(&first, pair("a", "x", 1.0), QuarantineReason::NoNearbyCandidate);
        q.admit(&second, pair("b", "y", 1.0), QuarantineReason::SchoolNamesDisagree);
        q.admit(&second, pair("c", "z", 1.0), QuarantineReason::SchoolNamesDisagree);
        let out = q.into_record_set();
        assert_eq!(out.columns, vec!["L_ID", "R_ID", "score", REASON_COLUMN, STAGE_COLUMN]);
    }

    #[test]
    fn gate_removes_every_pair_of_a_failing_left_record() {
        let set = working(vec![pair("a", "x", 90.0), pair("a", "y", 40.0), pair("b", "z", 80.0)]);
        let (kept, q) = apply_gate(set, Quarantine::new(), "L_ID", QuarantineReason::SchoolNamesDisagree, |r| {
            r.get("score").as_f64().unwrap_or(0.0) < 60.0
        });
        assert_eq!(ids(&kept, "L_ID"), vec!["b"]);
        assert_eq!(q.len(), 1);

        let out = q.into_record_set();
        assert_eq!(out.rows[0].get("R_ID"), &Value::text("y"));
        assert_eq!(out.rows[0].get(REASON_COLUMN), &Value::text("school names disagree"));
        assert_eq!(out.rows[0].get(STAGE_COLUMN), &Value::Number(5.0));
        assert_eq!(out.columns, vec!["L_ID", "R_ID", "score", REASON_COLUMN, STAGE_COLUMN]);
    }

    #[test]
    fn gates_accumulate_and_sort_by_stage() {
        let set = working(vec![pair("a", "x", 10.0), pair("b", "x", 70.0), pair("c", "y", 70.0)]);
        let q = Quarantine::new();
        let (set, q) = apply_gate(set, q, "L_ID", QuarantineReason::SuspectedDuplicate, |r| {
            r.get("L_ID") == &Value::text("c")
        });
        let (set, q) = apply_gate(set, q, "L_ID", QuarantineReason::NoNearbyCandidate, |r| {
            r.get("L_ID") == &Value::text("a")
        });
        assert_eq!(ids(&set, "L_ID"), vec!["b"]);
        assert_eq!(q.reason_counts().get("suspected duplicate match"), Some(&1));

        let out = q.into_record_set();
        assert_eq!(ids(&out, "L_ID"), vec!["a", "c"]);
    }

    #[test]
    fn gate_never_grows_working_set() {
        let set = working(vec![pair("a", "x", 1.0), pair("b", "y", 2.0)]);
        let (kept, q) = apply_gate(set, Quarantine::new(), "L_ID", QuarantineReason::SchoolNamesDisagree, |_| false);
        assert_eq!(kept.len(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn best_match_keeps_highest_score() {
        let set = working(vec![pair("a", "x", 70.0), pair("a", "y", 90.0), pair("b", "z", 60.0)]);
        let best = select_best_match(set, "L_ID", "score");
        assert_eq!(ids(&best, "R_ID"), vec!["y", "z"]);
    }

    #[test]
    fn best_match_ties_keep_first() {
        let set = working(vec![pair("a", "x", 80.0), pair("a", "y", 80.0)]);
        let best = select_best_match(set, "L_ID", "score");
        assert_eq!(ids(&best, "R_ID"), vec!["x"]);
    }

    #[test]
    fn collisions_need_distinct_left_ids() {
        let set = working(vec![pair("a", "x", 1.0), pair("b", "x", 1.0), pair("c", "y", 1.0), pair("c", "y", 1.0)]);
        let targets = colliding_targets(&set, "L_ID", "R_ID");
        assert_eq!(targets, HashSet::from(["x".to_string()]));
    }

    #[test]
    fn fingerprint_is_12_hex_chars_and_stable() {
        let r: Record = [("a", Value::text("Toronto DSB")), ("b", Value::Null)].into_iter().collect();
        let fields = vec!["a".to_string(), "b".to_string()];
        let h = authority_fingerprint(&r, &fields);
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, authority_fingerprint(&r, &fields));

        let other: Record = [("a", Value::text("Toronto DSB")), ("b", Value::text("ON"))].into_iter().collect();
        assert_ne!(h, authority_fingerprint(&other, &fields));
    }

    #[test]
    fn authority_with_two_left_districts_is_ambiguous() {
        let rows = vec![
            [(AUTHORITY_HASH_COLUMN, Value::text("h1")), ("LEA", Value::text("1"))].into_iter().collect(),
            [(AUTHORITY_HASH_COLUMN, Value::text("h1")), ("LEA", Value::text("2"))].into_iter().collect(),
            [(AUTHORITY_HASH_COLUMN, Value::text("h2")), ("LEA", Value::text("3"))].into_iter().collect(),
            [(AUTHORITY_HASH_COLUMN, Value::text("h2")), ("LEA", Value::text("3"))].into_iter().collect(),
            [(AUTHORITY_HASH_COLUMN, Value::text("h3")), ("LEA", Value::Null)].into_iter().collect::<Record>(),
        ];
        let set = RecordSet::with_rows(vec![AUTHORITY_HASH_COLUMN.into(), "LEA".into()], rows);
        let ambiguous = ambiguous_authorities(&set, "LEA");
        assert!(ambiguous.contains("h1"));
        assert!(!ambiguous.contains("h2"));
        assert!(ambiguous.contains("h3"));
    }
}
