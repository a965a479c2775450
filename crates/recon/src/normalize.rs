//! Generic text cleanup for name-like fields.
//!
//! Every normalized column is written next to its source as
//! `<column>_normalized`; source columns are never modified.

use rayon::prelude::*;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::{RecordSet, Value};

/// Suffix of the derived column holding normalized text.
pub const NORMALIZED_SUFFIX: &str = "_normalized";

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Drop diacritics before normalizing ("École" -> "ecole").
    pub fold_accents: bool,
}

pub fn normalized_column(column: &str) -> String {
    format!("{column}{NORMALIZED_SUFFIX}")
}

/// Lowercase, drop `.` `,` `'`, turn `-` and `_` into spaces, trim, and
/// collapse whitespace runs to a single space.
pub fn normalize_text(input: &str) -> String {
    let cleaned: String = input
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '\''))
        .map(|c| if matches!(c, '-' | '_') { ' ' } else { c })
        .collect();
    collapse_whitespace(&cleaned)
}

/// NFKD-decompose and drop combining marks.
pub fn fold_accents(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

pub(crate) fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_value(value: &Value, options: NormalizeOptions) -> String {
    let raw = value.to_text();
    if options.fold_accents {
        normalize_text(&fold_accents(&raw))
    } else {
        normalize_text(&raw)
    }
}

/// Add a `<column>_normalized` field for each named column. Null inputs
/// normalize to "". Unknown columns are skipped with a warning; the rest of
/// the batch still runs. Returns the derived column names that were added.
pub fn normalize_columns(
    set: &mut RecordSet,
    columns: &[String],
    options: NormalizeOptions,
) -> Vec<String> {
    let mut added = Vec::new();

    for column in columns {
        if !set.has_column(column) {
            log::warn!("normalize: column '{column}' not found, skipping");
            continue;
        }

        let target = normalized_column(column);
        set.rows.par_iter_mut().for_each(|row| {
            let normalized = normalize_value(row.get(column), options);
            row.set(target.clone(), Value::Text(normalized));
        });
        set.add_column(target.clone());
        added.push(target);
    }

    added
}
