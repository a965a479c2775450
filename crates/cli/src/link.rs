//! `smatch run` and `smatch validate`: config-driven school linkage.

use std::path::{Path, PathBuf};

use schoolmatch_recon::config::{ReconConfig, SourceConfig};
use schoolmatch_recon::table::{read_csv_file, write_csv_file};
use schoolmatch_recon::{ReconInput, ReconResult, RecordSet};

use crate::exit_codes::EXIT_INVALID_CONFIG;
use crate::CliError;

pub struct RunOptions {
    pub config: PathBuf,
    pub json: bool,
    pub matched: Option<PathBuf>,
    pub quarantined: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub max_distance: Option<f64>,
}

fn load_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {e}", config_path.display())))?;
    ReconConfig::from_toml(&config_str).map_err(CliError::recon)
}

fn load_source(base_dir: &Path, side: &str, source: &SourceConfig) -> Result<RecordSet, CliError> {
    let file = source.file.as_deref().ok_or_else(|| CliError {
        code: EXIT_INVALID_CONFIG,
        message: format!("role '{}' has no input file", source.role),
        hint: Some(format!("set `file` under [{side}]")),
    })?;
    let path = base_dir.join(file);
    let set = read_csv_file(&path, &source.prefix).map_err(|e| {
        let mut err = CliError::recon(e);
        err.message = format!("cannot read {}: {}", path.display(), err.message);
        err
    })?;
    log::info!("{}: loaded {} rows from {}", source.role, set.len(), path.display());
    Ok(set)
}

/// Flag path wins; otherwise the config path, resolved against the config dir.
fn output_path(base_dir: &Path, flag: Option<PathBuf>, configured: Option<&str>) -> Option<PathBuf> {
    flag.or_else(|| configured.map(|p| base_dir.join(p)))
}

fn ensure_parent(path: &Path) -> Result<(), CliError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .map_err(|e| CliError::io(format!("cannot create {}: {e}", dir.display()))),
        _ => Ok(()),
    }
}

fn write_set(set: &RecordSet, path: &Path) -> Result<(), CliError> {
    ensure_parent(path)?;
    write_csv_file(set, path)
        .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
    eprintln!("wrote {} ({} rows)", path.display(), set.len());
    Ok(())
}

pub fn cmd_run(opts: RunOptions) -> Result<(), CliError> {
    let mut config = load_config(&opts.config)?;
    if let Some(meters) = opts.max_distance {
        config.proximity.max_distance_m = meters;
        config.validate().map_err(CliError::recon)?;
    }

    // Resolve file paths relative to config file's directory
    let base_dir = opts.config.parent().unwrap_or_else(|| Path::new("."));

    let input = ReconInput {
        left: load_source(base_dir, "left", &config.left)?,
        right: load_source(base_dir, "right", &config.right)?,
    };

    let result = schoolmatch_recon::run(&config, &input).map_err(CliError::recon)?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| CliError::other(format!("JSON serialization error: {e}")))?;

    if let Some(path) = output_path(base_dir, opts.matched, config.output.matched.as_deref()) {
        write_set(&result.matched, &path)?;
    }
    if let Some(path) = output_path(base_dir, opts.quarantined, config.output.quarantined.as_deref()) {
        write_set(&result.quarantined, &path)?;
    }
    if let Some(path) = output_path(base_dir, opts.summary, config.output.summary.as_deref()) {
        ensure_parent(&path)?;
        std::fs::write(&path, &json_str)
            .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
        eprintln!("wrote {}", path.display());
    }

    if opts.json {
        println!("{json_str}");
    }

    print_summary(&result);
    Ok(())
}

fn print_summary(result: &ReconResult) {
    let s = &result.summary;
    eprintln!(
        "{} -> {}: {} records, {} matched, {} quarantined (within {} m)",
        result.meta.left_role,
        result.meta.right_role,
        s.left_records,
        s.matched,
        s.quarantined,
        result.meta.max_distance_m,
    );
    for (reason, count) in &s.reason_counts {
        eprintln!("  {count:>6}  {reason}");
    }
    if let Some(d) = s.mean_distance_m {
        eprintln!("mean distance: {d:.1} m");
    }
    if let Some(score) = s.mean_school_name_similarity {
        eprintln!("mean school name similarity: {score:.1}");
    }
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    eprintln!(
        "{}: ok ({} -> {}, within {} m)",
        config_path.display(),
        config.left.role,
        config.right.role,
        config.proximity.max_distance_m,
    );
    Ok(())
}
