use std::collections::HashSet;

use serde::Deserialize;

use crate::error::ReconError;
use crate::standardize::TermTable;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    pub name: String,
    /// The side whose records are classified (matched or quarantined).
    pub left: SourceConfig,
    /// The reference side.
    pub right: SourceConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub standardize: StandardizeConfig,
    #[serde(default)]
    pub authority: Option<AuthorityConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Short lowercase tag ("focus", "nces"), used in derived column names.
    pub role: String,
    /// CSV path, relative to the config file.
    #[serde(default)]
    pub file: Option<String>,
    /// Prepended to every header at load time ("NCES_").
    #[serde(default)]
    pub prefix: String,
    /// Column holding `POINT (lon lat)`; latitude/longitude are derived from it.
    #[serde(default)]
    pub point_wkt: Option<String>,
    pub columns: ColumnMapping,
}

/// Column names after prefixing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMapping {
    pub id: String,
    pub name: String,
    pub latitude: String,
    pub longitude: String,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub district_id: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl ColumnMapping {
    /// Every configured column, with its mapping key.
    pub fn configured(&self) -> Vec<(&'static str, &str)> {
        let mut columns = vec![
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("latitude", self.latitude.as_str()),
            ("longitude", self.longitude.as_str()),
        ];
        let optional = [
            ("district", &self.district),
            ("district_id", &self.district_id),
            ("city", &self.city),
            ("region", &self.region),
            ("postal_code", &self.postal_code),
        ];
        for (key, column) in optional {
            if let Some(column) = column {
                columns.push((key, column.as_str()));
            }
        }
        columns
    }
}

// ---------------------------------------------------------------------------
// Proximity, scope, thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProximityConfig {
    #[serde(default = "default_max_distance_m")]
    pub max_distance_m: f64,
}

fn default_max_distance_m() -> f64 {
    100.0
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            max_distance_m: default_max_distance_m(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeConfig {
    /// Jurisdiction codes removed at stage 1 (compared trimmed, case-insensitive).
    #[serde(default)]
    pub exclude_regions: Vec<String>,
}

impl ScopeConfig {
    pub fn excluded(&self) -> HashSet<String> {
        self.exclude_regions
            .iter()
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    #[serde(default = "default_agreement")]
    pub school_name: f64,
    #[serde(default = "default_agreement")]
    pub district_name: f64,
    #[serde(default = "default_crosswalk")]
    pub crosswalk: f64,
}

fn default_agreement() -> f64 {
    60.0
}

fn default_crosswalk() -> f64 {
    75.0
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            school_name: default_agreement(),
            district_name: default_agreement(),
            crosswalk: default_crosswalk(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalize + Standardize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeConfig {
    #[serde(default)]
    pub fold_accents: bool,
    /// Additional columns to normalize. Unknown names are skipped with a warning.
    #[serde(default)]
    pub extra_columns: Vec<String>,
}

/// Inline term tables replacing the built-in vocabularies.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StandardizeConfig {
    #[serde(default)]
    pub school: Option<TermTable>,
    #[serde(default)]
    pub district: Option<TermTable>,
}

// ---------------------------------------------------------------------------
// Authority + Output
// ---------------------------------------------------------------------------

/// Single-authority gate: right-side fields whose fingerprint must map to
/// exactly one left district identifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorityConfig {
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub matched: Option<String>,
    #[serde(default)]
    pub quarantined: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Columns with this prefix go last in the matched output.
    /// Defaults to `right.prefix`.
    #[serde(default)]
    pub trailing_prefix: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        for side in [&self.left, &self.right] {
            let role = side.role.trim();
            if role.is_empty() {
                return Err(ReconError::ConfigValidation("role must not be empty".into()));
            }
            if role.chars().any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')) {
                return Err(ReconError::ConfigValidation(format!(
                    "role '{role}' must be lowercase letters, digits, or '_'"
                )));
            }
            for (key, column) in side.columns.configured() {
                if column.trim().is_empty() {
                    return Err(ReconError::ConfigValidation(format!(
                        "{role}: columns.{key} must not be empty"
                    )));
                }
            }
        }

        if self.left.role == self.right.role {
            return Err(ReconError::ConfigValidation(format!(
                "left and right share role '{}'",
                self.left.role
            )));
        }

        if !self.left.prefix.is_empty() && self.left.prefix == self.right.prefix {
            return Err(ReconError::ConfigValidation(format!(
                "left and right share prefix '{}'",
                self.left.prefix
            )));
        }

        let max = self.proximity.max_distance_m;
        if !(max.is_finite() && max > 0.0) {
            return Err(ReconError::ConfigValidation(format!(
                "proximity.max_distance_m must be a positive number, got {max}"
            )));
        }

        let thresholds = [
            ("school_name", self.thresholds.school_name),
            ("district_name", self.thresholds.district_name),
            ("crosswalk", self.thresholds.crosswalk),
        ];
        for (key, value) in thresholds {
            if !(0.0..=100.0).contains(&value) {
                return Err(ReconError::ConfigValidation(format!(
                    "thresholds.{key} must be within 0..=100, got {value}"
                )));
            }
        }

        if !self.scope.exclude_regions.is_empty() && self.left.columns.region.is_none() {
            return Err(ReconError::ConfigValidation(
                "scope.exclude_regions requires left.columns.region".into(),
            ));
        }

        if let Some(authority) = &self.authority {
            if authority.fields.is_empty() {
                return Err(ReconError::ConfigValidation(
                    "authority.fields must name at least one right-side column".into(),
                ));
            }
            if self.left.columns.district_id.is_none() {
                return Err(ReconError::ConfigValidation(
                    "authority gate requires left.columns.district_id".into(),
                ));
            }
        }

        if self.left.columns.district.is_some() != self.right.columns.district.is_some() {
            log::warn!("district column configured on one side only; district agreement is skipped");
        }

        Ok(())
    }

    /// Prefix grouped at the end of the matched output, if any.
    pub fn trailing_prefix(&self) -> Option<&str> {
        self.output
            .trailing_prefix
            .as_deref()
            .or(Some(self.right.prefix.as_str()))
            .filter(|p| !p.is_empty())
    }

    fn pair_column(&self, what: &str) -> String {
        format!("{}_{}_{what}", self.left.role, self.right.role)
    }

    pub fn school_similarity_column(&self) -> String {
        self.pair_column("school_name_similarity")
    }

    pub fn district_similarity_column(&self) -> String {
        self.pair_column("district_name_similarity")
    }

    pub fn city_similarity_column(&self) -> String {
        self.pair_column("city_similarity")
    }

    pub fn region_similarity_column(&self) -> String {
        self.pair_column("region_similarity")
    }

    /// Right-side column whose presence arms the district agreement gate.
    pub fn district_presence_column(&self) -> Option<&str> {
        let right = &self.right.columns;
        right.district_id.as_deref().or(right.district.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
