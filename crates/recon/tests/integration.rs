use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use schoolmatch_recon::config::ReconConfig;
use schoolmatch_recon::engine::{run, POSTAL_MATCH_COLUMN};
use schoolmatch_recon::model::{ReconInput, ReconResult, Value};
use schoolmatch_recon::proximity::DISTANCE_COLUMN;
use schoolmatch_recon::quarantine::{AUTHORITY_HASH_COLUMN, REASON_COLUMN};
use schoolmatch_recon::table::read_csv_file;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load(config_file: &str) -> (ReconConfig, ReconInput) {
    let dir = fixtures_dir();
    let toml = std::fs::read_to_string(dir.join(config_file)).unwrap();
    let config = ReconConfig::from_toml(&toml).unwrap();

    let read = |file: &Option<String>, prefix: &str| {
        let path = dir.join(file.as_deref().unwrap());
        read_csv_file(&path, prefix).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
    };
    let input = ReconInput {
        left: read(&config.left.file, &config.left.prefix),
        right: read(&config.right.file, &config.right.prefix),
    };
    (config, input)
}

fn load_and_run(config_file: &str) -> ReconResult {
    let (config, input) = load(config_file);
    run(&config, &input).unwrap()
}

fn ids(result: &ReconResult) -> Vec<String> {
    result.matched.rows.iter().map(|r| r.get("FOCUS_SCHOOL_ID").to_text()).collect()
}

fn quarantined_by_id(result: &ReconResult) -> BTreeMap<String, String> {
    result
        .quarantined
        .rows
        .iter()
        .map(|r| (r.get("FOCUS_SCHOOL_ID").to_text(), r.get(REASON_COLUMN).to_text()))
        .collect()
}

// -------------------------------------------------------------------------
// FOCUS -> NCES
// -------------------------------------------------------------------------

#[test]
fn every_left_record_lands_in_exactly_one_output() {
    let result = load_and_run("focus-nces.link.toml");

    let matched: HashSet<String> = ids(&result).into_iter().collect();
    let quarantined: HashSet<String> = quarantined_by_id(&result).into_keys().collect();

    assert_eq!(result.summary.left_records, 10);
    assert_eq!(matched.len() + quarantined.len(), 10);
    assert!(matched.is_disjoint(&quarantined));
    assert_eq!(result.matched.len(), matched.len(), "one matched row per left record");
    assert_eq!(result.quarantined.len(), quarantined.len(), "one quarantine row per left record");
}

#[test]
fn focus_nces_classification() {
    let result = load_and_run("focus-nces.link.toml");

    assert_eq!(ids(&result), vec!["1", "4", "9"]);

    let expected: BTreeMap<String, String> = [
        ("2", "out of scope region"),
        ("3", "no nearby candidate schools"),
        ("10", "no nearby candidate schools"),
        ("7", "school names disagree"),
        ("8", "district names disagree"),
        ("5", "suspected duplicate match"),
        ("6", "suspected duplicate match"),
    ]
    .into_iter()
    .map(|(id, reason)| (id.to_string(), reason.to_string()))
    .collect();
    assert_eq!(quarantined_by_id(&result), expected);

    assert_eq!(result.summary.reason_counts["no nearby candidate schools"], 2);
    assert_eq!(result.summary.reason_counts["suspected duplicate match"], 2);
}

#[test]
fn abbreviated_names_match_after_standardization() {
    let result = load_and_run("focus-nces.link.toml");
    let lincoln = &result.matched.rows[0];

    assert_eq!(lincoln.get("NCES_NCESSCH"), &Value::text("550001"));
    assert_eq!(lincoln.get("FOCUS_SCHOOL_NAME_standardized"), &Value::text("lincoln"));
    assert_eq!(lincoln.get("NCES_SCH_NAME_standardized"), &Value::text("lincoln"));
    assert_eq!(lincoln.get("focus_nces_school_name_similarity"), &Value::Number(100.0));
    assert_eq!(lincoln.get("focus_nces_district_name_similarity"), &Value::Number(100.0));
    assert_eq!(lincoln.get("focus_nces_city_similarity"), &Value::Number(100.0));
    assert_eq!(lincoln.get(POSTAL_MATCH_COLUMN), &Value::Bool(true));
    // Originals are untouched.
    assert_eq!(lincoln.get("FOCUS_SCHOOL_NAME"), &Value::text("Lincoln Elementary School"));
}

#[test]
fn best_candidate_survives_among_colocated_campuses() {
    let result = load_and_run("focus-nces.link.toml");
    let roosevelt = result
        .matched
        .rows
        .iter()
        .find(|r| r.get("FOCUS_SCHOOL_ID") == &Value::text("4"))
        .unwrap();
    assert_eq!(roosevelt.get("NCES_SCH_NAME"), &Value::text("Roosevelt Middle School"));
    assert_eq!(roosevelt.get("focus_nces_school_name_similarity"), &Value::Number(100.0));
}

#[test]
fn far_candidate_is_not_a_pair() {
    let result = load_and_run("focus-nces.link.toml");
    let equator = result
        .quarantined
        .rows
        .iter()
        .find(|r| r.get("FOCUS_SCHOOL_ID") == &Value::text("3"))
        .unwrap();
    assert!(equator.get(DISTANCE_COLUMN).is_null());
    assert!(equator.get("NCES_NCESSCH").is_null());
    // The original fields survive into quarantine.
    assert_eq!(equator.get("FOCUS_SCHOOL_NAME"), &Value::text("Equator School"));
}

#[test]
fn missing_reference_district_does_not_penalize() {
    let result = load_and_run("focus-nces.link.toml");
    let charter = result
        .matched
        .rows
        .iter()
        .find(|r| r.get("FOCUS_SCHOOL_ID") == &Value::text("9"))
        .unwrap();
    assert!(charter.get("NCES_LEAID").is_null());
    assert!(charter.get("focus_nces_district_name_similarity").as_f64().unwrap() < 60.0);
}

#[test]
fn working_set_never_grows_across_gates() {
    let result = load_and_run("focus-nces.link.toml");
    let mut quarantined = 0;
    for stage in &result.summary.stages {
        if stage.stage != 2 {
            assert!(stage.rows_out <= stage.rows_in, "stage {} grew", stage.stage);
        }
        quarantined += stage.quarantined;
    }
    assert_eq!(quarantined, result.summary.quarantined);
    // No authority gate configured.
    assert!(result.summary.stages.iter().all(|s| s.stage != 9));
}

#[test]
fn reference_columns_are_grouped_last() {
    let result = load_and_run("focus-nces.link.toml");
    let columns = &result.matched.columns;
    let first = columns.iter().position(|c| c.starts_with("NCES_")).unwrap();
    assert!(columns[first..].iter().all(|c| c.starts_with("NCES_")));
    assert!(columns[..first].contains(&"focus_nces_school_name_similarity".to_string()));
}

#[test]
fn summary_serializes_with_meta() {
    let result = load_and_run("focus-nces.link.toml");
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["meta"]["config_name"], "FOCUS to NCES schools");
    assert_eq!(json["meta"]["max_distance_m"], 100.0);
    assert_eq!(json["summary"]["matched"], 3);
    assert_eq!(json["summary"]["mean_school_name_similarity"], 100.0);
    assert!(json.get("matched").is_none());
}

#[test]
fn larger_radius_does_not_rescue_the_equator_school() {
    let (mut config, input) = load("focus-nces.link.toml");
    config.proximity.max_distance_m = 50_000.0;
    let result = run(&config, &input).unwrap();
    assert_eq!(quarantined_by_id(&result)["3"], "no nearby candidate schools");
}

// -------------------------------------------------------------------------
// FOCUS -> ODEF (WKT geometry, accents, single-authority gate)
// -------------------------------------------------------------------------

#[test]
fn canada_authority_gate() {
    let result = load_and_run("focus-odef.link.toml");

    assert_eq!(ids(&result), vec!["c3"]);
    let expected: BTreeMap<String, String> = [
        ("c1", "no single authority match"),
        ("c2", "no single authority match"),
        ("c4", "no nearby candidate schools"),
    ]
    .into_iter()
    .map(|(id, reason)| (id.to_string(), reason.to_string()))
    .collect();
    assert_eq!(quarantined_by_id(&result), expected);

    let hash = result.matched.rows[0].get(AUTHORITY_HASH_COLUMN).to_text();
    assert_eq!(hash.len(), 12);
    assert_eq!(result.summary.stages.last().map(|s| s.stage), Some(9));
}

#[test]
fn accents_fold_before_scoring() {
    let (mut config, input) = load("focus-odef.link.toml");
    config.authority = None;
    let result = run(&config, &input).unwrap();

    let c1 = result
        .matched
        .rows
        .iter()
        .find(|r| r.get("FOCUS_SCHOOL_ID") == &Value::text("c1"))
        .unwrap();
    assert_eq!(c1.get("FOCUS_SCHOOL_NAME_normalized"), &Value::text("ecole sainte therese"));
    assert_eq!(c1.get("focus_odef_school_name_similarity"), &Value::Number(100.0));
    assert!(c1.get("ODEF_LAT").as_f64().is_some());
}
