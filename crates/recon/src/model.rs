use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Values + records
// ---------------------------------------------------------------------------

/// A single cell. Source files load as `Text` or `Null`; derived columns add
/// `Number` and `Bool`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

static NULL: Value = Value::Null;

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// `Null` for `None` and for NaN, so a missing number never masquerades as a value.
    pub fn number(n: Option<f64>) -> Self {
        match n {
            Some(n) if !n.is_nan() => Self::Number(n),
            _ => Self::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view. Text is parsed on demand; anything unparseable is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        let n = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
            Self::Bool(_) | Self::Null => return None,
        };
        if n.is_nan() {
            None
        } else {
            Some(n)
        }
    }

    /// Text view used for keys and string comparisons. `Null` becomes "".
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One row from one source (or a joined candidate pair). Fields absent from
/// the map read as `Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&NULL)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.fields.insert(column.into(), value);
    }

    /// Identifier view of a column: trimmed text, `None` when null or blank.
    pub fn key(&self, column: &str) -> Option<String> {
        let text = self.get(column).to_text();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// An ordered collection of records sharing a column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn require_column(&self, role: &str, column: &str) -> Result<(), ReconError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(ReconError::missing_column(role, column))
        }
    }

    /// Register a derived column. Existing columns keep their position.
    pub fn add_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        if !self.has_column(&column) {
            self.columns.push(column);
        }
    }

    /// Distinct non-null keys of `column`, in first-appearance order.
    pub fn distinct_keys(&self, column: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter_map(|r| r.key(column))
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    /// Move every column starting with `prefix` to the end, preserving order
    /// within both groups.
    pub fn move_prefix_to_end(&mut self, prefix: &str) {
        let (trailing, leading): (Vec<String>, Vec<String>) = self
            .columns
            .drain(..)
            .partition(|c| c.starts_with(prefix));
        self.columns = leading.into_iter().chain(trailing).collect();
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Pre-loaded record sets for the two sides of a run.
pub struct ReconInput {
    pub left: RecordSet,
    pub right: RecordSet,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

/// Working-set size before and after one pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: u8,
    pub name: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub quarantined: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconSummary {
    pub left_records: usize,
    pub matched: usize,
    pub quarantined: usize,
    pub reason_counts: BTreeMap<String, usize>,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_school_name_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_district_name_similarity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub left_role: String,
    pub right_role: String,
    pub max_distance_m: f64,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    /// One row per matched left record.
    #[serde(skip)]
    pub matched: RecordSet,
    /// One row per quarantined left record, with `quarantine_reason`.
    #[serde(skip)]
    pub quarantined: RecordSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_reads_null() {
        let r: Record = [("a", Value::text("x"))].into_iter().collect();
        assert_eq!(r.get("a"), &Value::text("x"));
        assert!(r.get("b").is_null());
        assert_eq!(r.key("b"), None);
    }

    #[test]
    fn numeric_view_parses_text() {
        assert_eq!(Value::text(" 43.07 ").as_f64(), Some(43.07));
        assert_eq!(Value::text("n/a").as_f64(), None);
        assert_eq!(Value::text("NaN").as_f64(), None);
        assert_eq!(Value::number(Some(f64::NAN)), Value::Null);
    }

    #[test]
    fn blank_key_is_none() {
        let r: Record = [("id", Value::text("   "))].into_iter().collect();
        assert_eq!(r.key("id"), None);
    }

    #[test]
    fn prefix_columns_move_to_end() {
        let mut set = RecordSet::new(vec![
            "FOCUS_ID".into(),
            "NCES_ID".into(),
            "NCES_NAME".into(),
            "score".into(),
        ]);
        set.move_prefix_to_end("NCES_");
        assert_eq!(set.columns, vec!["FOCUS_ID", "score", "NCES_ID", "NCES_NAME"]);
    }

    #[test]
    fn distinct_keys_keep_first_appearance() {
        let rows = ["b", "a", "b", ""]
            .iter()
            .map(|id| [("id", Value::text(*id))].into_iter().collect())
            .collect();
        let set = RecordSet::with_rows(vec!["id".into()], rows);
        assert_eq!(set.distinct_keys("id"), vec!["b", "a"]);
    }
}
