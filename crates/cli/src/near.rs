//! `smatch near`: standalone geographic proximity join of two CSVs.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use schoolmatch_recon::proximity::{CoordinateColumns, ProximitySpec};
use schoolmatch_recon::table::{read_csv_file, write_csv, write_csv_file};
use schoolmatch_recon::{proximity_join, JoinMode, RecordSet};

use crate::CliError;

#[derive(Clone, Copy, ValueEnum)]
pub enum How {
    /// Only records with a counterpart within range
    Inner,
    /// Every left record, counterpart fields null when none is in range
    Left,
    /// Every right record, counterpart fields null when none is in range
    Right,
}

impl From<How> for JoinMode {
    fn from(how: How) -> Self {
        match how {
            How::Inner => JoinMode::Inner,
            How::Left => JoinMode::Left,
            How::Right => JoinMode::Right,
        }
    }
}

#[derive(Args)]
pub struct NearArgs {
    /// Left CSV file
    left: PathBuf,

    /// Right CSV file
    right: PathBuf,

    /// Latitude column of the left file
    #[arg(long)]
    left_lat: String,

    /// Longitude column of the left file
    #[arg(long)]
    left_lon: String,

    /// Latitude column of the right file (after --right-prefix)
    #[arg(long)]
    right_lat: String,

    /// Longitude column of the right file (after --right-prefix)
    #[arg(long)]
    right_lon: String,

    /// Prefix applied to every left header
    #[arg(long, default_value = "")]
    left_prefix: String,

    /// Prefix applied to every right header
    #[arg(long, default_value = "")]
    right_prefix: String,

    /// Maximum geodesic distance in meters
    #[arg(long, default_value_t = 100.0)]
    max_distance: f64,

    /// Which unmatched records to keep
    #[arg(long, value_enum, default_value_t = How::Left)]
    how: How,

    /// Write the joined CSV here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn load(path: &Path, prefix: &str, side: &str, lat: &str, lon: &str) -> Result<RecordSet, CliError> {
    let set = read_csv_file(path, prefix)
        .map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))?;
    for column in [lat, lon] {
        set.require_column(side, column).map_err(|e| {
            CliError::recon(e).with_hint(format!("columns in {} are: {}", path.display(), set.columns.join(", ")))
        })?;
    }
    Ok(set)
}

pub fn cmd_near(args: NearArgs) -> Result<(), CliError> {
    if !(args.max_distance.is_finite() && args.max_distance > 0.0) {
        return Err(CliError::args(format!(
            "--max-distance must be a positive number of meters, got {}",
            args.max_distance
        )));
    }

    let left = load(&args.left, &args.left_prefix, "left", &args.left_lat, &args.left_lon)?;
    let right = load(&args.right, &args.right_prefix, "right", &args.right_lat, &args.right_lon)?;

    let spec = ProximitySpec {
        left: CoordinateColumns::new(args.left_lat.as_str(), args.left_lon.as_str()),
        right: CoordinateColumns::new(args.right_lat.as_str(), args.right_lon.as_str()),
        max_distance_m: args.max_distance,
    };
    let mode = JoinMode::from(args.how);
    let joined = proximity_join(&left, &right, &spec, mode);
    log::info!(
        "near ({mode}): {} x {} rows within {} m -> {} rows",
        left.len(),
        right.len(),
        args.max_distance,
        joined.len()
    );

    match args.output {
        Some(path) => {
            write_csv_file(&joined, &path)
                .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
            eprintln!("wrote {} ({} rows)", path.display(), joined.len());
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_csv(&joined, &mut lock).map_err(|e| CliError::io(format!("cannot write stdout: {e}")))?;
            lock.flush().map_err(|e| CliError::io(format!("cannot write stdout: {e}")))?;
        }
    }
    Ok(())
}
