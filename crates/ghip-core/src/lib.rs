//! Core domain model for the GHIP data-acquisition pipeline.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ghip-core";

/// Default sex stratifier for observations that carry none.
pub const SEX_ALL: &str = "all";

/// ISO 3166-1 alpha-3 country code, normalized to lowercase.
///
/// The store's canonical form is lowercase; provider CSVs use uppercase,
/// which callers uppercase at the extraction boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercased form, as used by the UNICEF/SDMX CSV `REF_AREA` column.
    pub fn to_provider_form(&self) -> String {
        self.0.to_ascii_uppercase()
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CountryCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One (indicator code, country code) pair, the unit of staleness tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorKey {
    pub indicator: String,
    pub country: CountryCode,
}

impl IndicatorKey {
    pub fn new(indicator: impl Into<String>, country: CountryCode) -> Self {
        Self {
            indicator: indicator.into(),
            country,
        }
    }
}

impl fmt::Display for IndicatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.indicator, self.country)
    }
}

/// One downloadable resource discovered on a provider listing page.
///
/// Ephemeral: re-derived from the live listing on every run, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    pub published: NaiveDate,
    pub retrieved: NaiveDate,
    pub download_url: String,
}

/// Which columns of a provider CSV hold which fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Column holding the indicator code (e.g. `GHO (CODE)`).
    pub code: String,
    /// Column holding the human-readable indicator name.
    pub full_name: String,
    /// Column holding the year/period.
    pub date: String,
    /// Column holding the numeric value.
    pub value: String,
    /// Optional sex stratifier column.
    pub sex: Option<String>,
    /// Optional country-code column for multi-country resources.
    pub country: Option<String>,
}

impl ColumnMapping {
    pub fn new(
        code: impl Into<String>,
        full_name: impl Into<String>,
        date: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            full_name: full_name.into(),
            date: date.into(),
            value: value.into(),
            sex: None,
            country: None,
        }
    }

    pub fn with_sex(mut self, column: impl Into<String>) -> Self {
        self.sex = Some(column.into());
        self
    }

    pub fn with_country(mut self, column: impl Into<String>) -> Self {
        self.country = Some(column.into());
        self
    }
}

/// One extracted observation for a (indicator, country) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub year: i32,
    pub value: f64,
    pub sex: String,
}

/// Everything the upsert step needs for one (indicator, country) pair:
/// provenance plus the observation rows extracted from one fetched resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBatch {
    pub key: IndicatorKey,
    pub country_name: String,
    pub indicator_name: String,
    pub source: String,
    pub download_date: NaiveDate,
    pub update_date: NaiveDate,
    pub observations: Vec<Observation>,
}

/// Logical update category, mapping to a fixed set of sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateCategory {
    HealthStatus,
    ServiceCoverage,
    RiskFactors,
    HealthSystems,
}

impl UpdateCategory {
    pub const ALL: [UpdateCategory; 4] = [
        UpdateCategory::HealthStatus,
        UpdateCategory::ServiceCoverage,
        UpdateCategory::RiskFactors,
        UpdateCategory::HealthSystems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateCategory::HealthStatus => "health-status",
            UpdateCategory::ServiceCoverage => "service-coverage",
            UpdateCategory::RiskFactors => "risk-factors",
            UpdateCategory::HealthSystems => "health-systems",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "health-status" => Some(UpdateCategory::HealthStatus),
            "service-coverage" => Some(UpdateCategory::ServiceCoverage),
            "risk-factors" => Some(UpdateCategory::RiskFactors),
            "health-systems" => Some(UpdateCategory::HealthSystems),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the UI-facing time-series read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub country: CountryCode,
    pub country_name: String,
    pub year: i32,
    pub value: f64,
    pub sex: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_code_normalizes_to_lowercase() {
        let code = CountryCode::new(" FRA ");
        assert_eq!(code.as_str(), "fra");
        assert_eq!(code.to_provider_form(), "FRA");
    }

    #[test]
    fn category_round_trips_through_parse() {
        for category in UpdateCategory::ALL {
            assert_eq!(UpdateCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(
            UpdateCategory::parse("Health-Status"),
            Some(UpdateCategory::HealthStatus)
        );
        assert_eq!(UpdateCategory::parse("weather"), None);
    }

    #[test]
    fn indicator_key_display_is_code_slash_country() {
        let key = IndicatorKey::new("WHOSIS_000001", CountryCode::new("FRA"));
        assert_eq!(key.to_string(), "WHOSIS_000001/fra");
    }
}
