//! Provider-facing adapters: HDX resource-listing catalog, country
//! registry, CSV table parsing, and indicator extraction.
//!
//! Everything here is read-only with respect to the store; the upsert side
//! lives in `ghip-sync`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use ghip_core::{
    CatalogEntry, ColumnMapping, CountryCode, IndicatorBatch, IndicatorKey, Observation, SEX_ALL,
};
use ghip_storage::{FetchError, HttpClient};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ghip-adapters";

/// Base URL of the HDX portal all three providers republish through.
pub const HDX_BASE_URL: &str = "https://data.humdata.org";

/// Date format used on HDX listing pages ("24 June 2024").
const LISTING_DATE_FORMAT: &str = "%d %B %Y";

// ---------------------------------------------------------------------------
// Country registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct CountriesFile {
    regions: HashMap<String, HashMap<String, Vec<CountryInfo>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CountryInfo {
    name: String,
    alpha3: String,
}

/// Lookup table from alpha-3 code to display name, loaded from the
/// `countries.json` asset shipped at the workspace root.
#[derive(Debug, Clone, Default)]
pub struct CountryRegistry {
    names: HashMap<CountryCode, String>,
}

impl CountryRegistry {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let file: CountriesFile = serde_json::from_str(text).context("parsing countries JSON")?;
        let mut names = HashMap::new();
        for subregions in file.regions.into_values() {
            for countries in subregions.into_values() {
                for info in countries {
                    names.insert(CountryCode::new(&info.alpha3), info.name.to_lowercase());
                }
            }
        }
        Ok(Self { names })
    }

    pub fn name_of(&self, code: &CountryCode) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    pub fn codes(&self) -> Vec<CountryCode> {
        let mut codes: Vec<_> = self.names.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Split the requested codes into (code -> name) for known countries and
    /// the list of codes the registry does not carry.
    pub fn resolve(
        &self,
        codes: &[CountryCode],
    ) -> (HashMap<CountryCode, String>, Vec<CountryCode>) {
        let mut known = HashMap::new();
        let mut unknown = Vec::new();
        for code in codes {
            match self.name_of(code) {
                Some(name) => {
                    known.insert(code.clone(), name.to_string());
                }
                None => unknown.push(code.clone()),
            }
        }
        (known, unknown)
    }
}

/// Turn a display name into the dash-separated form HDX uses in dataset
/// slugs. Apostrophes and commas are the usual trap ("Cote d'Ivoire",
/// "Korea, Republic of"); a wrong slug silently yields no catalog.
pub fn country_name_slug(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .replace(',', "")
        .replace('\'', "-")
}

// ---------------------------------------------------------------------------
// Fetch strategy and listing URLs
// ---------------------------------------------------------------------------

/// How a dataset's listing page is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// One listing per country, addressed by alpha-3 code (`who-data-for-fra`).
    PerCountryCode,
    /// One listing per country, addressed by slugified display name
    /// (`world-bank-health-indicators-for-france`).
    PerCountryName,
    /// One listing serving every country's rows (the UNICEF datasets).
    SingleResource,
}

impl FetchStrategy {
    pub fn is_per_country(&self) -> bool {
        !matches!(self, FetchStrategy::SingleResource)
    }
}

/// Resolve the listing-page URL for a dataset. Returns `None` when a
/// per-country-name source is asked about a country the registry cannot
/// name; callers treat that as an empty catalog, never as up-to-date data.
pub fn listing_url(
    base_url: &str,
    dataset: &str,
    strategy: FetchStrategy,
    country: Option<&CountryCode>,
    registry: &CountryRegistry,
) -> Option<String> {
    match strategy {
        FetchStrategy::SingleResource => Some(format!("{base_url}/dataset/{dataset}")),
        FetchStrategy::PerCountryCode => {
            let code = country?;
            Some(format!("{base_url}/dataset/{dataset}-for-{code}"))
        }
        FetchStrategy::PerCountryName => {
            let code = country?;
            let name = registry.name_of(code)?;
            Some(format!(
                "{base_url}/dataset/{dataset}-for-{}",
                country_name_slug(name)
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Resource catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("listing page unreachable: {0}")]
    Io(#[from] FetchError),
}

/// Which resource of a listing a source wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSelector {
    /// Nth entry in listing order.
    Index(usize),
    /// First entry whose title contains the given fragment.
    TitleContains(String),
}

impl ResourceSelector {
    pub fn pick<'a>(&self, entries: &'a [CatalogEntry]) -> Option<&'a CatalogEntry> {
        match self {
            ResourceSelector::Index(i) => entries.get(*i),
            ResourceSelector::TitleContains(fragment) => {
                entries.iter().find(|e| e.title.contains(fragment.as_str()))
            }
        }
    }
}

/// Parse an HDX dataset page's resource list into catalog entries.
///
/// Collects every entry in listing order; an entry missing its title, date,
/// or download link is skipped and parsing continues. A page without a
/// resource list yields an empty catalog.
pub fn parse_resource_listing(
    html: &str,
    base_url: &str,
    retrieved: NaiveDate,
) -> Vec<CatalogEntry> {
    let document = Html::parse_document(html);
    let item_selector = match Selector::parse(".resource-list .resource-item") {
        Ok(sel) => sel,
        Err(_) => return Vec::new(),
    };

    document
        .select(&item_selector)
        .filter_map(|item| parse_resource_item(&item, base_url, retrieved))
        .collect()
}

fn parse_resource_item(
    item: &ElementRef<'_>,
    base_url: &str,
    retrieved: NaiveDate,
) -> Option<CatalogEntry> {
    let title_selector = Selector::parse("a[title]").ok()?;
    let date_selector = Selector::parse(".update-date").ok()?;
    let download_selector = Selector::parse(".resource-download-button").ok()?;

    let title = item
        .select(&title_selector)
        .next()
        .and_then(|a| a.value().attr("title"))
        .map(str::trim)
        .filter(|t| !t.is_empty())?
        .to_string();

    // The update-date element wraps a label and the date on separate lines;
    // the date is the last non-empty line.
    let date_text = item
        .select(&date_selector)
        .next()
        .map(|n| n.text().collect::<String>())?;
    let date_line = date_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .next_back()?;
    let published = NaiveDate::parse_from_str(date_line, LISTING_DATE_FORMAT).ok()?;

    let href = item
        .select(&download_selector)
        .next()
        .and_then(|n| n.value().attr("href"))?;
    let download_url = if href.starts_with('/') {
        format!("{base_url}{href}")
    } else {
        href.to_string()
    };

    Some(CatalogEntry {
        title,
        published,
        retrieved,
        download_url,
    })
}

/// Live catalog resolution over HTTP.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    http: HttpClient,
    base_url: String,
}

impl ResourceCatalog {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: HDX_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch and parse one listing page. An unreachable page is an I/O
    /// failure; a reachable page with no parseable entries is an empty
    /// catalog.
    pub async fn entries(
        &self,
        run_id: Uuid,
        source_id: &str,
        listing_url: &str,
        retrieved: NaiveDate,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        let body = self.http.get_bytes(run_id, source_id, listing_url).await?;
        Ok(parse_resource_listing(&body.text(), &self.base_url, retrieved))
    }
}

// ---------------------------------------------------------------------------
// Tabular resources
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TableError {
    #[error("csv parse error: {0}")]
    Csv(#[from] csv::Error),
    #[error("resource has no header row")]
    NoHeader,
}

/// A parsed CSV resource: named columns over string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn parse_csv(text: &str) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(TableError::Csv)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() {
            return Err(TableError::NoHeader);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }

    fn cell<'a>(&self, row: &'a [String], column: usize) -> &'a str {
        row.get(column).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("resource download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("resource unparseable: {0}")]
    Table(#[from] TableError),
}

/// Downloads one selected catalog entry and parses it as CSV.
#[derive(Debug, Clone)]
pub struct ResourceLoader {
    http: HttpClient,
}

impl ResourceLoader {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub async fn load(
        &self,
        run_id: Uuid,
        source_id: &str,
        entry: &CatalogEntry,
    ) -> Result<DataTable, LoadError> {
        let body = self
            .http
            .get_bytes(run_id, source_id, &entry.download_url)
            .await?;
        Ok(DataTable::parse_csv(&body.text())?)
    }
}

// ---------------------------------------------------------------------------
// Indicator extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("mapped column {0:?} not present in resource")]
    MissingColumn(String),
}

/// Provenance shared by every batch cut from one fetched resource.
#[derive(Debug, Clone)]
pub struct ExtractSpec<'a> {
    pub mapping: &'a ColumnMapping,
    pub source: &'a str,
    pub download_date: NaiveDate,
    pub update_date: NaiveDate,
}

/// Coerce a provider date cell to a year: leading digits, first four kept.
/// Handles "2016", "2016-06", and trailing-text variants; anything else is
/// dropped per-row.
pub fn coerce_year(raw: &str) -> Option<i32> {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    digits[..4].parse().ok()
}

fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Slice the rows relevant to each stale pair out of a parsed table.
///
/// A pair whose indicator code never appears is dropped silently (the
/// provider does not carry it in this revision), as is a pair whose matched
/// rows all fail year/value coercion. Multi-country tables are additionally
/// filtered on the country column using the provider's uppercase codes.
pub fn extract_batches(
    table: &DataTable,
    spec: &ExtractSpec<'_>,
    stale: &[IndicatorKey],
    country_names: &HashMap<CountryCode, String>,
) -> Result<Vec<IndicatorBatch>, ExtractError> {
    let mapping = spec.mapping;
    let col = |name: &str| {
        table
            .column(name)
            .ok_or_else(|| ExtractError::MissingColumn(name.to_string()))
    };

    let code_col = col(&mapping.code)?;
    let name_col = col(&mapping.full_name)?;
    let date_col = col(&mapping.date)?;
    let value_col = col(&mapping.value)?;
    let sex_col = mapping.sex.as_deref().map(col).transpose()?;
    let country_col = mapping.country.as_deref().map(col).transpose()?;

    let mut batches = Vec::new();

    for key in stale {
        let Some(country_name) = country_names.get(&key.country) else {
            continue;
        };
        let provider_code = key.country.to_provider_form();

        let mut indicator_name = String::new();
        let mut observations = Vec::new();

        for row in table.rows() {
            if table.cell(row, code_col) != key.indicator {
                continue;
            }
            if let Some(cc) = country_col {
                if table.cell(row, cc) != provider_code {
                    continue;
                }
            }

            if indicator_name.is_empty() {
                indicator_name = table.cell(row, name_col).trim().to_string();
            }

            let Some(year) = coerce_year(table.cell(row, date_col)) else {
                continue;
            };
            let Some(value) = parse_value(table.cell(row, value_col)) else {
                continue;
            };
            let sex = sex_col
                .map(|c| table.cell(row, c).trim())
                .filter(|s| !s.is_empty())
                .unwrap_or(SEX_ALL)
                .to_string();

            observations.push(Observation { year, value, sex });
        }

        if observations.is_empty() {
            continue;
        }
        if indicator_name.is_empty() {
            indicator_name = key.indicator.clone();
        }

        batches.push(IndicatorBatch {
            key: key.clone(),
            country_name: country_name.clone(),
            indicator_name,
            source: spec.source.to_string(),
            download_date: spec.download_date,
            update_date: spec.update_date,
            observations,
        });
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const LISTING_HTML: &str = r#"
    <html><body>
      <ul class="hdx-bs3 resource-list">
        <li class="resource-item">
          <a title="WHO quality of care indicators" href="/d/1">link</a>
          <div class="update-date">Modified:
            24 June 2024
          </div>
          <a class="resource-download-button" href="/dataset/x/resource/1/download/who.csv">DL</a>
        </li>
        <li class="resource-item">
          <a title="HIV Indicators for France" href="/d/2">link</a>
          <div class="update-date">Modified:
            3 January 2023
          </div>
          <a class="resource-download-button" href="https://mirror.example.org/hiv.csv">DL</a>
        </li>
        <li class="resource-item">
          <a href="/d/3">entry without title attribute</a>
          <div class="update-date">never</div>
        </li>
      </ul>
    </body></html>"#;

    #[test]
    fn listing_collects_every_wellformed_entry() {
        let entries = parse_resource_listing(LISTING_HTML, HDX_BASE_URL, d(2026, 8, 25));
        // Two good entries out of three; the malformed one is skipped, and
        // parsing does not stop after the first success.
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "WHO quality of care indicators");
        assert_eq!(entries[0].published, d(2024, 6, 24));
        assert_eq!(
            entries[0].download_url,
            "https://data.humdata.org/dataset/x/resource/1/download/who.csv"
        );
        assert_eq!(entries[1].published, d(2023, 1, 3));
        assert_eq!(entries[1].download_url, "https://mirror.example.org/hiv.csv");
    }

    #[test]
    fn listing_without_resource_list_is_empty() {
        let entries = parse_resource_listing("<html><body>404</body></html>", HDX_BASE_URL, d(2026, 8, 25));
        assert!(entries.is_empty());
    }

    #[test]
    fn selector_picks_by_index_and_title() {
        let entries = parse_resource_listing(LISTING_HTML, HDX_BASE_URL, d(2026, 8, 25));
        let by_index = ResourceSelector::Index(1).pick(&entries).unwrap();
        assert_eq!(by_index.published, d(2023, 1, 3));
        let by_title = ResourceSelector::TitleContains("HIV Indicators".into())
            .pick(&entries)
            .unwrap();
        assert_eq!(by_title.title, "HIV Indicators for France");
        assert!(ResourceSelector::Index(9).pick(&entries).is_none());
        assert!(ResourceSelector::TitleContains("Malaria".into())
            .pick(&entries)
            .is_none());
    }

    const COUNTRIES_JSON: &str = r#"{
      "regions": {
        "Europe": {
          "Western Europe": [
            {"name": "France", "alpha3": "FRA"},
            {"name": "United Kingdom", "alpha3": "GBR"}
          ]
        },
        "Africa": {
          "Western Africa": [
            {"name": "Cote d'Ivoire", "alpha3": "CIV"}
          ]
        }
      }
    }"#;

    #[test]
    fn registry_resolves_names_and_flags_unknowns() {
        let registry = CountryRegistry::from_json(COUNTRIES_JSON).unwrap();
        assert_eq!(registry.name_of(&CountryCode::new("FRA")), Some("france"));
        let (known, unknown) = registry.resolve(&[
            CountryCode::new("fra"),
            CountryCode::new("xyz"),
        ]);
        assert_eq!(known.len(), 1);
        assert_eq!(unknown, vec![CountryCode::new("xyz")]);
    }

    #[test]
    fn name_slug_handles_punctuation() {
        assert_eq!(country_name_slug("Cote d'Ivoire"), "cote-d-ivoire");
        assert_eq!(country_name_slug("Korea, Republic of"), "korea-republic-of");
        assert_eq!(country_name_slug("France"), "france");
    }

    #[test]
    fn listing_url_follows_strategy() {
        let registry = CountryRegistry::from_json(COUNTRIES_JSON).unwrap();
        let fra = CountryCode::new("fra");
        assert_eq!(
            listing_url(HDX_BASE_URL, "who-data", FetchStrategy::PerCountryCode, Some(&fra), &registry),
            Some("https://data.humdata.org/dataset/who-data-for-fra".to_string())
        );
        assert_eq!(
            listing_url(
                HDX_BASE_URL,
                "world-bank-health-indicators",
                FetchStrategy::PerCountryName,
                Some(&CountryCode::new("civ")),
                &registry
            ),
            Some("https://data.humdata.org/dataset/world-bank-health-indicators-for-cote-d-ivoire".to_string())
        );
        assert_eq!(
            listing_url(HDX_BASE_URL, "unicef-mnch-mmr", FetchStrategy::SingleResource, None, &registry),
            Some("https://data.humdata.org/dataset/unicef-mnch-mmr".to_string())
        );
        // Unknown country under a name-addressed source: no catalog.
        assert_eq!(
            listing_url(
                HDX_BASE_URL,
                "world-bank-health-indicators",
                FetchStrategy::PerCountryName,
                Some(&CountryCode::new("xyz")),
                &registry
            ),
            None
        );
    }

    #[test]
    fn csv_parses_headers_and_flexible_rows() {
        let table = DataTable::parse_csv("a,b,c\n1,2,3\n4,5\n").unwrap();
        assert_eq!(table.column("b"), Some(1));
        assert_eq!(table.len(), 2);
        // Short row reads as empty cell, not a panic.
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(table.cell(rows[1], 2), "");
    }

    #[test]
    fn year_coercion_takes_leading_digits() {
        assert_eq!(coerce_year("2016"), Some(2016));
        assert_eq!(coerce_year(" 2016-06 "), Some(2016));
        assert_eq!(coerce_year("2021 (provisional)"), Some(2021));
        assert_eq!(coerce_year("n/a"), None);
        assert_eq!(coerce_year("85"), None);
    }

    fn who_table() -> DataTable {
        DataTable::parse_csv(
            "GHO (CODE),GHO (DISPLAY),Numeric,ENDYEAR,DIMENSION (NAME)\n\
             WHOSIS_000001,Life expectancy at birth (years),82.5,2019,Both sexes\n\
             WHOSIS_000001,Life expectancy at birth (years),85.1,2019,Female\n\
             WHOSIS_000001,Life expectancy at birth (years),bad,2020,Both sexes\n\
             WHOSIS_000002,Healthy life expectancy (HALE) at birth (years),72.1,2019,Both sexes\n",
        )
        .unwrap()
    }

    fn who_mapping() -> ColumnMapping {
        ColumnMapping::new("GHO (CODE)", "GHO (DISPLAY)", "ENDYEAR", "Numeric")
            .with_sex("DIMENSION (NAME)")
    }

    #[test]
    fn extraction_slices_per_pair_and_drops_bad_rows() {
        let mapping = who_mapping();
        let spec = ExtractSpec {
            mapping: &mapping,
            source: "who-data",
            download_date: d(2026, 8, 25),
            update_date: d(2024, 6, 24),
        };
        let fra = CountryCode::new("fra");
        let stale = vec![
            IndicatorKey::new("WHOSIS_000001", fra.clone()),
            IndicatorKey::new("WHOSIS_000002", fra.clone()),
            IndicatorKey::new("NOT_PUBLISHED", fra.clone()),
        ];
        let names = HashMap::from([(fra.clone(), "france".to_string())]);

        let batches = extract_batches(&who_table(), &spec, &stale, &names).unwrap();
        // Absent indicator dropped silently; two batches remain.
        assert_eq!(batches.len(), 2);

        let first = &batches[0];
        assert_eq!(first.key.indicator, "WHOSIS_000001");
        assert_eq!(first.indicator_name, "Life expectancy at birth (years)");
        assert_eq!(first.update_date, d(2024, 6, 24));
        // The "bad" value row is dropped per-row; the two parseable rows stay.
        assert_eq!(first.observations.len(), 2);
        assert_eq!(first.observations[0].sex, "Both sexes");
        assert_eq!(first.observations[1].sex, "Female");
    }

    #[test]
    fn extraction_filters_multi_country_tables_by_code() {
        let table = DataTable::parse_csv(
            "REF_AREA,INDICATOR,Indicator,OBS_VALUE,TIME_PERIOD\n\
             FRA,MMR_100k,Maternal mortality ratio,8,2017\n\
             DZA,MMR_100k,Maternal mortality ratio,112,2017\n\
             FRA,MMR_100k,Maternal mortality ratio,7,2020\n",
        )
        .unwrap();
        let mapping = ColumnMapping::new("INDICATOR", "Indicator", "TIME_PERIOD", "OBS_VALUE")
            .with_country("REF_AREA");
        let spec = ExtractSpec {
            mapping: &mapping,
            source: "unicef-mnch-mmr",
            download_date: d(2026, 8, 25),
            update_date: d(2024, 1, 1),
        };
        let fra = CountryCode::new("fra");
        let stale = vec![IndicatorKey::new("MMR_100k", fra.clone())];
        let names = HashMap::from([(fra, "france".to_string())]);

        let batches = extract_batches(&table, &spec, &stale, &names).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].observations.len(), 2);
        assert_eq!(batches[0].observations[0].sex, SEX_ALL);
        assert_eq!(batches[0].observations[1].year, 2020);
    }

    #[test]
    fn extraction_reports_missing_mapped_column() {
        let table = DataTable::parse_csv("a,b\n1,2\n").unwrap();
        let mapping = who_mapping();
        let spec = ExtractSpec {
            mapping: &mapping,
            source: "who-data",
            download_date: d(2026, 8, 25),
            update_date: d(2024, 6, 24),
        };
        let fra = CountryCode::new("fra");
        let names = HashMap::from([(fra.clone(), "france".to_string())]);
        let err = extract_batches(
            &table,
            &spec,
            &[IndicatorKey::new("WHOSIS_000001", fra)],
            &names,
        )
        .unwrap_err();
        assert!(matches!(err, ExtractError::MissingColumn(c) if c == "GHO (CODE)"));
    }

    #[test]
    fn pair_with_only_uncoercible_rows_is_dropped() {
        let table = DataTable::parse_csv(
            "GHO (CODE),GHO (DISPLAY),Numeric,ENDYEAR,DIMENSION (NAME)\n\
             WHOSIS_000001,Life expectancy,not-a-number,bad-year,Both sexes\n",
        )
        .unwrap();
        let mapping = who_mapping();
        let spec = ExtractSpec {
            mapping: &mapping,
            source: "who-data",
            download_date: d(2026, 8, 25),
            update_date: d(2024, 6, 24),
        };
        let fra = CountryCode::new("fra");
        let names = HashMap::from([(fra.clone(), "france".to_string())]);
        let batches = extract_batches(
            &table,
            &spec,
            &[IndicatorKey::new("WHOSIS_000001", fra)],
            &names,
        )
        .unwrap();
        assert!(batches.is_empty());
    }
}
