//! Bounded string similarity in [0, 100].
//!
//! The score is the normalized indel ratio: `100 * (1 - indel / (len_a + len_b))`,
//! where `indel` counts the insertions and deletions turning one string into
//! the other. Equivalently `200 * lcs / (len_a + len_b)`. Lengths are in chars.

use rayon::prelude::*;

use crate::model::{RecordSet, Value};
use crate::normalize::collapse_whitespace;

/// Administrative phrases stripped before scoring when both sides contain
/// them, most specific first.
pub const SHARED_BOILERPLATE: [&str; 5] = [
    "township school district",
    "consolidated school district",
    "unified school district",
    "public schools",
    "school district",
];

/// Similarity of two strings. 100 for identical non-empty input, 0 when either
/// side is empty.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(&a, &b);
    200.0 * lcs as f64 / (a.len() + b.len()) as f64
}

/// Highest score two strings of these lengths could reach.
pub fn ratio_upper_bound(len_a: usize, len_b: usize) -> f64 {
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    200.0 * len_a.min(len_b) as f64 / (len_a + len_b) as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];

    for lc in long {
        for (j, sc) in short.iter().enumerate() {
            curr[j + 1] = if lc == sc {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Lowercase both strings and, if both contain one of [`SHARED_BOILERPLATE`]
/// (checked in order), remove every occurrence of that phrase from both.
pub fn strip_shared_phrase(a: &str, b: &str) -> (String, String) {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    for phrase in SHARED_BOILERPLATE {
        if a.contains(phrase) && b.contains(phrase) {
            return (
                collapse_whitespace(&a.replace(phrase, "")),
                collapse_whitespace(&b.replace(phrase, "")),
            );
        }
    }

    (collapse_whitespace(&a), collapse_whitespace(&b))
}

/// [`ratio`] after [`strip_shared_phrase`].
pub fn ratio_without_shared_phrase(a: &str, b: &str) -> f64 {
    let (a, b) = strip_shared_phrase(a, b);
    ratio(&a, &b)
}

/// Score two cells. Null on either side scores 0.
pub fn score_values(a: &Value, b: &Value, strip_shared: bool) -> f64 {
    if a.is_null() || b.is_null() {
        return 0.0;
    }
    let (a, b) = (a.to_text(), b.to_text());
    if strip_shared {
        ratio_without_shared_phrase(&a, &b)
    } else {
        ratio(&a, &b)
    }
}

/// Materialize `target = score(left_column, right_column)` for every row.
/// Input columns are untouched; a missing column reads as null.
pub fn add_similarity_score(
    set: &mut RecordSet,
    left_column: &str,
    right_column: &str,
    target: &str,
    strip_shared: bool,
) {
    for column in [left_column, right_column] {
        if !set.has_column(column) {
            log::warn!("similarity: column '{column}' not found, scoring as null");
        }
    }

    set.rows.par_iter_mut().for_each(|row| {
        let score = score_values(row.get(left_column), row.get(right_column), strip_shared);
        row.set(target, Value::Number(score));
    });
    set.add_column(target);
}

/// Materialize `target = (left_column == right_column)` on trimmed text.
/// Null never equals anything, including another null.
pub fn add_exact_match(set: &mut RecordSet, left_column: &str, right_column: &str, target: &str) {
    set.rows.par_iter_mut().for_each(|row| {
        let matched = match (row.key(left_column), row.key(right_column)) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        };
        row.set(target, Value::Bool(matched));
    });
    set.add_column(target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;

    #[test]
    fn identical_is_100() {
        assert_eq!(ratio("lincoln", "lincoln"), 100.0);
    }

    #[test]
    fn empty_is_0() {
        assert_eq!(ratio("lincoln", ""), 0.0);
        assert_eq!(ratio("", "lincoln"), 0.0);
        assert_eq!(ratio("", ""), 0.0);
    }

    #[test]
    fn known_ratio() {
        // lcs("abcd", "abed") = 3 -> 200 * 3 / 8
        assert_eq!(ratio("abcd", "abed"), 75.0);
        // Disjoint alphabets share nothing.
        assert_eq!(ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn raw_school_names_score_below_100() {
        let raw = ratio("lincoln elementary school", "lincoln elem sch");
        assert!(raw < 100.0);
        // lcs = 16 ("lincoln elem sch"), lengths 25 + 16
        assert!((raw - 3200.0 / 41.0).abs() < 1e-9);
    }

    #[test]
    fn upper_bound_dominates_ratio() {
        let pairs = [("racine", "racine unified"), ("a", "abcdef"), ("xyz", "zyx")];
        for (a, b) in pairs {
            assert!(ratio(a, b) <= ratio_upper_bound(a.chars().count(), b.chars().count()));
        }
    }

    #[test]
    fn shared_phrase_stripped_most_specific_first() {
        let (a, b) = strip_shared_phrase(
            "Racine Unified School District",
            "Kenosha Unified School District",
        );
        assert_eq!(a, "racine");
        assert_eq!(b, "kenosha");

        // Only "school district" is shared.
        let (a, b) = strip_shared_phrase("Fox Township School District", "Fox School District");
        assert_eq!(a, "fox township");
        assert_eq!(b, "fox");
    }

    #[test]
    fn unshared_phrase_kept() {
        let (a, b) = strip_shared_phrase("Racine School District", "Racine Public Schools");
        assert_eq!(a, "racine school district");
        assert_eq!(b, "racine public schools");
    }

    #[test]
    fn boilerplate_does_not_inflate_score() {
        let with = ratio("racine unified school district", "kenosha unified school district");
        let without = ratio_without_shared_phrase(
            "racine unified school district",
            "kenosha unified school district",
        );
        assert!(without < with);
    }

    #[test]
    fn null_scores_zero() {
        assert_eq!(score_values(&Value::Null, &Value::text("a"), false), 0.0);
    }

    #[test]
    fn columns_scored_row_wise() {
        let rows = vec![
            [("A", Value::text("lincoln")), ("B", Value::text("lincoln"))].into_iter().collect(),
            [("A", Value::text("lincoln"))].into_iter().collect::<Record>(),
        ];
        let mut set = RecordSet::with_rows(vec!["A".into(), "B".into()], rows);
        add_similarity_score(&mut set, "A", "B", "sim", false);
        assert_eq!(set.rows[0].get("sim"), &Value::Number(100.0));
        assert_eq!(set.rows[1].get("sim"), &Value::Number(0.0));
        assert_eq!(set.rows[0].get("A"), &Value::text("lincoln"));
        assert_eq!(set.columns.last().map(String::as_str), Some("sim"));
    }

    #[test]
    fn exact_match_trims_and_rejects_null() {
        let rows = vec![
            [("L", Value::text("53403")), ("R", Value::text(" 53403"))].into_iter().collect(),
            [("L", Value::text("53403")), ("R", Value::text("53404"))].into_iter().collect(),
            Record::new(),
        ];
        let mut set = RecordSet::with_rows(vec!["L".into(), "R".into()], rows);
        add_exact_match(&mut set, "L", "R", "zip_match");
        assert_eq!(set.rows[0].get("zip_match"), &Value::Bool(true));
        assert_eq!(set.rows[1].get("zip_match"), &Value::Bool(false));
        assert_eq!(set.rows[2].get("zip_match"), &Value::Bool(false));
    }
}
