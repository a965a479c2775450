use std::collections::HashSet;

use crate::config::{ReconConfig, SourceConfig};
use crate::error::ReconError;
use crate::evidence::{compute_summary, SummaryColumns};
use crate::geo::derive_coordinates;
use crate::model::{RecordSet, ReconInput, ReconMeta, ReconResult, StageReport};
use crate::normalize::{normalize_columns, normalized_column, NormalizeOptions};
use crate::proximity::{proximity_join, CoordinateColumns, JoinMode, ProximitySpec, DISTANCE_COLUMN};
use crate::quarantine::{
    add_authority_fingerprint, ambiguous_authorities, apply_gate, colliding_targets, identifier_gate, select_best_match,
    Quarantine,
    QuarantineReason, AUTHORITY_HASH_COLUMN,
};
use crate::similarity::{add_exact_match, add_similarity_score};
use crate::standardize::{standardize_column, standardized_column, Standardizer, Vocabulary};

/// Derived column: exact postal code agreement.
pub const POSTAL_MATCH_COLUMN: &str = "postal_code_match";

/// Run the matching pipeline per config. Returns matched + quarantined sets
/// and a summary.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconResult, ReconError> {
    let left = prepare_source(&config.left, &input.left)?;
    let right = prepare_source(&config.right, &input.right)?;
    if let Some(authority) = &config.authority {
        for field in &authority.fields {
            right.require_column(&config.right.role, field)?;
        }
    }

    let school_standardizer = match &config.standardize.school {
        Some(table) => Standardizer::new(table)?,
        None => Standardizer::builtin(Vocabulary::School)?,
    };
    let district_standardizer = match &config.standardize.district {
        Some(table) => Standardizer::new(table)?,
        None => Standardizer::builtin(Vocabulary::District)?,
    };

    let left_id = config.left.columns.id.as_str();
    let left_records = left.len();
    let mut stages = Vec::new();
    let quarantine = Quarantine::new();

    // 0. Identifier check: every later gate is keyed by the left id
    let (working, quarantine) = identifier_gate(left, quarantine, left_id);
    stages.push(StageReport {
        stage: 0,
        name: stage_name(0).into(),
        rows_in: left_records,
        rows_out: working.len(),
        quarantined: quarantine.len(),
    });

    // 1. Geographic eligibility
    let excluded = config.scope.excluded();
    let (working, quarantine) = reported_gate(&mut stages, working, quarantine, left_id, QuarantineReason::OutOfScopeRegion, |r| {
        match &config.left.columns.region {
            Some(region) => r
                .key(region)
                .is_some_and(|code| excluded.contains(&code.to_uppercase())),
            None => false,
        }
    });

    // 2. Proximity
    let spec = ProximitySpec {
        left: CoordinateColumns::new(&config.left.columns.latitude, &config.left.columns.longitude),
        right: CoordinateColumns::new(&config.right.columns.latitude, &config.right.columns.longitude),
        max_distance_m: config.proximity.max_distance_m,
    };
    let survivors = working.len();
    let joined = proximity_join(&working, &right, &spec, JoinMode::Left);
    let before = quarantine.len();
    let (mut working, quarantine) = apply_gate(joined, quarantine, left_id, QuarantineReason::NoNearbyCandidate, |r| {
        r.get(DISTANCE_COLUMN).is_null()
    });
    stages.push(StageReport {
        stage: 2,
        name: stage_name(2).into(),
        rows_in: survivors,
        rows_out: working.len(),
        quarantined: quarantine.len() - before,
    });

    // 3. Normalize + standardize
    let rows_in = working.len();
    let fields = NameFields::new(config);
    let mut to_normalize: Vec<String> = fields.all_columns();
    for extra in &config.normalize.extra_columns {
        if !to_normalize.contains(extra) {
            to_normalize.push(extra.clone());
        }
    }
    let options = NormalizeOptions {
        fold_accents: config.normalize.fold_accents,
    };
    normalize_columns(&mut working, &to_normalize, options);
    for column in [&fields.left_school, &fields.right_school] {
        standardize_column(&mut working, &normalized_column(column), &standardized_column(column), &school_standardizer);
    }
    for (left_district, right_district) in &fields.district {
        for column in [left_district, right_district] {
            standardize_column(
                &mut working,
                &normalized_column(column),
                &standardized_column(column),
                &district_standardizer,
            );
        }
    }
    stages.push(passthrough(3, rows_in, working.len()));

    // 4. Similarity
    let school_similarity = config.school_similarity_column();
    let district_similarity = config.district_similarity_column();
    add_similarity_score(
        &mut working,
        &standardized_column(&fields.left_school),
        &standardized_column(&fields.right_school),
        &school_similarity,
        false,
    );
    if let Some((l, r)) = &fields.district {
        add_similarity_score(&mut working, &standardized_column(l), &standardized_column(r), &district_similarity, false);
    }
    if let Some((l, r)) = &fields.city {
        add_similarity_score(&mut working, &normalized_column(l), &normalized_column(r), &config.city_similarity_column(), false);
    }
    if let Some((l, r)) = &fields.region {
        add_similarity_score(&mut working, &normalized_column(l), &normalized_column(r), &config.region_similarity_column(), false);
    }
    if let (Some(l), Some(r)) = (&config.left.columns.postal_code, &config.right.columns.postal_code) {
        add_exact_match(&mut working, l, r, POSTAL_MATCH_COLUMN);
    }
    stages.push(passthrough(4, working.len(), working.len()));

    // 5. School name agreement
    let school_threshold = config.thresholds.school_name;
    let (working, quarantine) = reported_gate(&mut stages, working, quarantine, left_id, QuarantineReason::SchoolNamesDisagree, |r| {
        r.get(&school_similarity).as_f64().unwrap_or(0.0) < school_threshold
    });

    // 6. District agreement, only where the reference side has a district
    let presence = config.district_presence_column();
    let district_threshold = config.thresholds.district_name;
    let district_armed = fields.district.is_some();
    if !district_armed {
        log::info!("stage 6 skipped: no district column pair configured");
    }
    let (working, quarantine) = reported_gate(&mut stages, working, quarantine, left_id, QuarantineReason::DistrictNamesDisagree, |r| {
        district_armed
            && presence.is_some_and(|p| !r.get(p).is_null())
            && r.get(&district_similarity).as_f64().unwrap_or(0.0) < district_threshold
    });

    // 7. Best match
    let rows_in = working.len();
    let working = select_best_match(working, left_id, &school_similarity);
    stages.push(passthrough(7, rows_in, working.len()));

    // 8. Duplicate target
    let right_id = config.right.columns.id.as_str();
    let collisions = colliding_targets(&working, left_id, right_id);
    let (mut working, mut quarantine) = reported_gate(&mut stages, working, quarantine, left_id, QuarantineReason::SuspectedDuplicate, |r| {
        r.key(right_id).is_some_and(|id| collisions.contains(&id))
    });

    // 9. Single authority (optional)
    if let (Some(authority), Some(left_district_id)) = (&config.authority, &config.left.columns.district_id) {
        add_authority_fingerprint(&mut working, &authority.fields);
        let ambiguous: HashSet<String> = ambiguous_authorities(&working, left_district_id);
        (working, quarantine) = reported_gate(&mut stages, working, quarantine, left_id, QuarantineReason::NoSingleAuthority, |r| {
            r.key(AUTHORITY_HASH_COLUMN).is_some_and(|h| ambiguous.contains(&h))
        });
    }

    let mut matched = working;
    if let Some(prefix) = config.trailing_prefix() {
        matched.move_prefix_to_end(prefix);
    }
    let quarantined = quarantine.into_record_set();

    let summary = compute_summary(
        left_records,
        &matched,
        &quarantined,
        stages,
        &SummaryColumns {
            school_similarity: &school_similarity,
            district_similarity: &district_similarity,
            district_presence: if district_armed { presence } else { None },
        },
    );
    log::info!(
        "{}: {} left records -> {} matched, {} quarantined",
        config.name,
        summary.left_records,
        summary.matched,
        summary.quarantined
    );

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            left_role: config.left.role.clone(),
            right_role: config.right.role.clone(),
            max_distance_m: config.proximity.max_distance_m,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        matched,
        quarantined,
    })
}

/// Derive WKT coordinates if configured, then check every configured column
/// exists. A missing column is fatal for the run.
fn prepare_source(source: &SourceConfig, set: &RecordSet) -> Result<RecordSet, ReconError> {
    let mut set = set.clone();
    if let Some(wkt) = &source.point_wkt {
        set.require_column(&source.role, wkt)?;
        derive_coordinates(&mut set, wkt, &source.columns.latitude, &source.columns.longitude);
    }
    for (_, column) in source.columns.configured() {
        set.require_column(&source.role, column)?;
    }
    Ok(set)
}

/// Column pairs compared across the two sides. Optional pairs are present
/// only when both sides configure them.
struct NameFields {
    left_school: String,
    right_school: String,
    district: Option<(String, String)>,
    city: Option<(String, String)>,
    region: Option<(String, String)>,
}

impl NameFields {
    fn new(config: &ReconConfig) -> Self {
        let (l, r) = (&config.left.columns, &config.right.columns);
        let both = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(a), Some(b)) => Some((a.clone(), b.clone())),
            _ => None,
        };
        Self {
            left_school: l.name.clone(),
            right_school: r.name.clone(),
            district: both(&l.district, &r.district),
            city: both(&l.city, &r.city),
            region: both(&l.region, &r.region),
        }
    }

    fn all_columns(&self) -> Vec<String> {
        let mut columns = vec![self.left_school.clone(), self.right_school.clone()];
        for (l, r) in [&self.district, &self.city, &self.region].into_iter().flatten() {
            columns.push(l.clone());
            columns.push(r.clone());
        }
        columns
    }
}

pub fn stage_name(stage: u8) -> &'static str {
    match stage {
        0 => "identifier check",
        1 => "geographic eligibility",
        2 => "proximity",
        3 => "normalize and standardize",
        4 => "similarity",
        5 => "school name agreement",
        6 => "district agreement",
        7 => "best match",
        8 => "duplicate target",
        9 => "single authority",
        _ => "unknown",
    }
}

fn passthrough(stage: u8, rows_in: usize, rows_out: usize) -> StageReport {
    StageReport {
        stage,
        name: stage_name(stage).into(),
        rows_in,
        rows_out,
        quarantined: 0,
    }
}

/// [`apply_gate`] plus its stage report.
fn reported_gate<F>(
    stages: &mut Vec<StageReport>,
    working: RecordSet,
    quarantine: Quarantine,
    id_column: &str,
    reason: QuarantineReason,
    reject: F,
) -> (RecordSet, Quarantine)
where
    F: Fn(&crate::model::Record) -> bool + Sync,
{
    let rows_in = working.len();
    let before = quarantine.len();
    let (kept, quarantine) = apply_gate(working, quarantine, id_column, reason, reject);
    stages.push(StageReport {
        stage: reason.stage(),
        name: stage_name(reason.stage()).into(),
        rows_in,
        rows_out: kept.len(),
        quarantined: quarantine.len() - before,
    });
    (kept, quarantine)
}
