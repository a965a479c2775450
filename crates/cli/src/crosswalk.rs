//! `smatch crosswalk`: pair distinct name values of two CSV columns.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use schoolmatch_recon::crosswalk::{crosswalk_columns, to_record_set};
use schoolmatch_recon::table::{read_csv_file, write_csv, write_csv_file};

use crate::CliError;

#[derive(Args)]
pub struct CrosswalkArgs {
    /// Left CSV file
    left: PathBuf,

    /// Column of the left file to compare
    left_column: String,

    /// Right CSV file
    right: PathBuf,

    /// Column of the right file to compare
    right_column: String,

    /// Minimum similarity score (0-100)
    #[arg(long, default_value_t = 75.0)]
    threshold: f64,

    /// Write the crosswalk CSV here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

pub fn cmd_crosswalk(args: CrosswalkArgs) -> Result<(), CliError> {
    if !(0.0..=100.0).contains(&args.threshold) {
        return Err(CliError::args(format!("--threshold must be within 0..=100, got {}", args.threshold)));
    }

    let mut sets = Vec::with_capacity(2);
    for (path, column, side) in [(&args.left, &args.left_column, "left"), (&args.right, &args.right_column, "right")] {
        let set = read_csv_file(path, "")
            .map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))?;
        set.require_column(side, column).map_err(CliError::recon)?;
        sets.push(set);
    }

    let matches = crosswalk_columns(&sets[0], &args.left_column, &sets[1], &args.right_column, args.threshold);
    // Same header on both sides still needs two output columns.
    let right_header = if args.left_column == args.right_column {
        format!("{}_right", args.right_column)
    } else {
        args.right_column.clone()
    };
    let out = to_record_set(&matches, &args.left_column, &right_header);

    match args.output {
        Some(path) => {
            write_csv_file(&out, &path)
                .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
            eprintln!("wrote {} ({} pairs)", path.display(), out.len());
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_csv(&out, &mut lock).map_err(|e| CliError::io(format!("cannot write stdout: {e}")))?;
            lock.flush().map_err(|e| CliError::io(format!("cannot write stdout: {e}")))?;
        }
    }
    Ok(())
}
