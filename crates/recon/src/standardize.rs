//! Domain vocabulary standardization: abbreviation expansion followed by
//! boilerplate removal, so matching sees the proper-noun core of a name
//! ("racine usd" and "racine unified school district" both become "racine").
//!
//! The vocabularies are data (`terms/*.toml`), not code. A table is compiled
//! once into a [`Standardizer`] and then applied row-parallel.

use rayon::prelude::*;
use regex::{NoExpand, Regex};
use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{RecordSet, Value};
use crate::normalize::collapse_whitespace;

/// Suffix of the derived column holding standardized text.
pub const STANDARDIZED_SUFFIX: &str = "_standardized";

const DISTRICT_TERMS: &str = include_str!("../terms/district.toml");
const SCHOOL_TERMS: &str = include_str!("../terms/school.toml");

pub fn standardized_column(column: &str) -> String {
    format!("{column}{STANDARDIZED_SUFFIX}")
}

// ---------------------------------------------------------------------------
// Term tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    School,
    District,
}

impl std::fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::School => write!(f, "school"),
            Self::District => write!(f, "district"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Expansion {
    pub from: String,
    pub to: String,
}

/// Ordered expansion and removal entries. Entries are lowercase phrases
/// matched on word boundaries, not raw patterns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TermTable {
    #[serde(default)]
    pub expansions: Vec<Expansion>,
    #[serde(default)]
    pub removals: Vec<String>,
    #[serde(default = "default_expansion_passes")]
    pub expansion_passes: usize,
    #[serde(default = "default_removal_passes")]
    pub removal_passes: usize,
}

fn default_expansion_passes() -> usize {
    1
}

fn default_removal_passes() -> usize {
    2
}

impl TermTable {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))
    }

    /// The vocabulary shipped with the crate.
    pub fn builtin(vocabulary: Vocabulary) -> Result<Self, ReconError> {
        match vocabulary {
            Vocabulary::School => Self::from_toml(SCHOOL_TERMS),
            Vocabulary::District => Self::from_toml(DISTRICT_TERMS),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled standardizer
// ---------------------------------------------------------------------------

/// The four boundary-checked forms of one removal term: surrounded by
/// spaces, leading, trailing, and the whole string.
struct Removal {
    inner: Regex,
    leading: Regex,
    trailing: Regex,
    whole: Regex,
}

pub struct Standardizer {
    expansions: Vec<(Regex, String)>,
    removals: Vec<Removal>,
    expansion_passes: usize,
    removal_passes: usize,
}

fn compile(term: &str, pattern: String) -> Result<Regex, ReconError> {
    Regex::new(&pattern).map_err(|e| ReconError::TermTable {
        term: term.into(),
        message: e.to_string(),
    })
}

impl Standardizer {
    pub fn new(table: &TermTable) -> Result<Self, ReconError> {
        let mut expansions = Vec::with_capacity(table.expansions.len());
        for entry in &table.expansions {
            let word = word_pattern(&entry.from)?;
            expansions.push((compile(&entry.from, word)?, entry.to.clone()));
        }

        let mut removals = Vec::with_capacity(table.removals.len());
        for term in &table.removals {
            let word = word_pattern(term)?;
            removals.push(Removal {
                inner: compile(term, format!(" {word} "))?,
                leading: compile(term, format!(r"^{word}\s+"))?,
                trailing: compile(term, format!(r"\s+{word}$"))?,
                whole: compile(term, format!("^{word}$"))?,
            });
        }

        Ok(Self {
            expansions,
            removals,
            expansion_passes: table.expansion_passes,
            removal_passes: table.removal_passes,
        })
    }

    pub fn builtin(vocabulary: Vocabulary) -> Result<Self, ReconError> {
        Self::new(&TermTable::builtin(vocabulary)?)
    }

    /// Standardize already-normalized text. Expansion runs before removal so
    /// abbreviations that expand into boilerplate ("sd") disappear entirely.
    pub fn standardize(&self, input: &str) -> String {
        let mut text = input.to_string();

        for _ in 0..self.expansion_passes {
            for (pattern, replacement) in &self.expansions {
                text = pattern.replace_all(&text, NoExpand(replacement)).into_owned();
            }
        }

        for _ in 0..self.removal_passes {
            for removal in &self.removals {
                text = removal.inner.replace_all(&text, " ").into_owned();
                text = removal.leading.replace_all(&text, "").into_owned();
                text = removal.trailing.replace_all(&text, "").into_owned();
                text = removal.whole.replace_all(&text, "").into_owned();
            }
        }

        collapse_whitespace(&text)
    }
}

fn word_pattern(term: &str) -> Result<String, ReconError> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return Err(ReconError::TermTable {
            term: term.into(),
            message: "empty term".into(),
        });
    }
    Ok(format!(r"\b{}\b", regex::escape(trimmed)))
}

/// Write `standardizer(source)` into `target` for every row. Null or missing
/// source values standardize to "".
pub fn standardize_column(set: &mut RecordSet, source: &str, target: &str, standardizer: &Standardizer) {
    if !set.has_column(source) {
        log::warn!("standardize: column '{source}' not found, skipping");
        return;
    }

    set.rows.par_iter_mut().for_each(|row| {
        let standardized = standardizer.standardize(&row.get(source).to_text());
        row.set(target, Value::Text(standardized));
    });
    set.add_column(target);
}
