//! Refresh pipeline coordination: staleness filtering, the Postgres upsert
//! engine, and the bounded fan-out orchestrator.
//!
//! One *unit* of work is one (source, country) pipeline for per-country
//! sources, or one (source, country-batch) pipeline for single-resource
//! sources: catalog -> staleness check -> download -> extract -> upsert.
//! Units never abort their siblings; their outcomes are aggregated into a
//! [`RefreshReport`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ghip_adapters::{
    extract_batches, listing_url, CatalogError, CountryRegistry, DataTable, ExtractError,
    ExtractSpec, FetchStrategy, LoadError, ResourceCatalog, ResourceLoader, ResourceSelector,
};
use ghip_core::{
    CatalogEntry, ColumnMapping, CountryCode, IndicatorBatch, IndicatorKey, SeriesPoint,
    UpdateCategory,
};
use ghip_storage::{HttpClient, HttpClientConfig};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ghip-sync";

const SCHEMA_SQL: &str = include_str!("schema.sql");

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Overall join deadline for one refresh call's fan-out.
    pub refresh_deadline_secs: u64,
    pub scheduler_enabled: bool,
    pub refresh_cron_1: String,
    pub refresh_cron_2: String,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    /// Read configuration from the environment. The database URL has no
    /// default; credentials are never carried in source.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set (no built-in default)")?,
            user_agent: std::env::var("GHIP_USER_AGENT")
                .unwrap_or_else(|_| "ghip-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("GHIP_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            refresh_deadline_secs: std::env::var("GHIP_REFRESH_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            scheduler_enabled: std::env::var("GHIP_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            refresh_cron_1: std::env::var("GHIP_REFRESH_CRON_1")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            refresh_cron_2: std::env::var("GHIP_REFRESH_CRON_2")
                .unwrap_or_else(|_| "0 0 18 * * *".to_string()),
            workspace_root: std::env::var("GHIP_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        })
    }

    pub fn countries_path(&self) -> PathBuf {
        self.workspace_root.join("countries.json")
    }
}

// ---------------------------------------------------------------------------
// Store contract + staleness
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// Write/read contract the orchestrator depends on. The Postgres
/// implementation is [`PgStore`]; tests substitute an in-memory double.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Stored remote-publication date for one pair, if any metadata exists.
    async fn indicator_update_date(
        &self,
        key: &IndicatorKey,
    ) -> Result<Option<NaiveDate>, StoreError>;

    /// Atomically upsert one (indicator, country) batch: country row,
    /// metadata row, and every observation, all-or-nothing.
    async fn upsert_batch(&self, batch: &IndicatorBatch) -> Result<(), StoreError>;
}

/// A pair is stale when no metadata exists or the stored publication date is
/// strictly older than the remote one. Equal dates are up to date, so a
/// provider republishing identical data under the same date is not refetched.
pub fn is_stale(stored: Option<NaiveDate>, published: NaiveDate) -> bool {
    stored.map_or(true, |date| date < published)
}

/// Filter the requested pairs down to those needing a refetch. Pure read.
pub async fn stale_keys<S: HealthStore + ?Sized>(
    store: &S,
    keys: &[IndicatorKey],
    published: NaiveDate,
) -> Result<Vec<IndicatorKey>, StoreError> {
    let mut stale = Vec::new();
    for key in keys {
        let stored = store.indicator_update_date(key).await?;
        if is_stale(stored, published) {
            stale.push(key.clone());
        }
    }
    Ok(stale)
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema, statement by statement.
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema_statements(SCHEMA_SQL) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("applying schema statement: {statement}"))?;
        }
        Ok(())
    }

    /// All known countries, ordered by code.
    pub async fn countries(&self) -> Result<Vec<(CountryCode, String)>, StoreError> {
        let rows = sqlx::query("SELECT id_country, country_name FROM country ORDER BY id_country")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let code: String = row.try_get("id_country")?;
            let name: String = row.try_get("country_name")?;
            out.push((CountryCode::new(code), name));
        }
        Ok(out)
    }

    /// UI-facing read path: one indicator's time series over a set of
    /// countries, optionally bounded by a year range.
    pub async fn series(
        &self,
        indicator: &str,
        countries: &[CountryCode],
        year_range: Option<(i32, i32)>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let codes: Vec<String> = countries.iter().map(|c| c.as_str().to_string()).collect();
        let (from, to) = year_range.unwrap_or((0, 9999));
        let rows = sqlx::query(
            r#"
            SELECT t.id_country, c.country_name, t.year_recorded, t.value, t.sexe
              FROM timed_indicator t
              JOIN country c ON c.id_country = t.id_country
             WHERE t.id_indicator = $1
               AND t.id_country = ANY($2)
               AND t.year_recorded BETWEEN $3 AND $4
             ORDER BY t.id_country, t.year_recorded, t.sexe
            "#,
        )
        .bind(indicator)
        .bind(&codes)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let code: String = row.try_get("id_country")?;
            out.push(SeriesPoint {
                country: CountryCode::new(code),
                country_name: row.try_get("country_name")?,
                year: row.try_get("year_recorded")?,
                value: row.try_get("value")?,
                sex: row.try_get("sexe")?,
            });
        }
        Ok(out)
    }
}

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

#[async_trait]
impl HealthStore for PgStore {
    async fn indicator_update_date(
        &self,
        key: &IndicatorKey,
    ) -> Result<Option<NaiveDate>, StoreError> {
        let row = sqlx::query(
            "SELECT update_date FROM indicator WHERE id_indicator = $1 AND id_country = $2",
        )
        .bind(&key.indicator)
        .bind(key.country.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("update_date")?)),
            None => Ok(None),
        }
    }

    async fn upsert_batch(&self, batch: &IndicatorBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Country: insert-if-unseen; an existing display name is kept.
        sqlx::query(
            "INSERT INTO country (id_country, country_name) VALUES ($1, $2)
             ON CONFLICT (id_country) DO NOTHING",
        )
        .bind(batch.key.country.as_str())
        .bind(&batch.country_name)
        .execute(&mut *tx)
        .await?;

        // Metadata: full overwrite; this row's update_date is the new
        // staleness baseline for the pair.
        sqlx::query(
            r#"
            INSERT INTO indicator
                (id_indicator, id_country, name_indicator, source, download_date, update_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id_indicator, id_country) DO UPDATE SET
                name_indicator = EXCLUDED.name_indicator,
                source = EXCLUDED.source,
                download_date = EXCLUDED.download_date,
                update_date = EXCLUDED.update_date
            "#,
        )
        .bind(&batch.key.indicator)
        .bind(batch.key.country.as_str())
        .bind(&batch.indicator_name)
        .bind(&batch.source)
        .bind(batch.download_date)
        .bind(batch.update_date)
        .execute(&mut *tx)
        .await?;

        // Values: keyed upsert, overwrite value only. The conflict target is
        // resolved by the database, never read-modify-write here.
        for obs in &batch.observations {
            sqlx::query(
                r#"
                INSERT INTO timed_indicator
                    (id_indicator, id_country, year_recorded, value, sexe)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id_indicator, id_country, year_recorded, sexe)
                DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(&batch.key.indicator)
            .bind(batch.key.country.as_str())
            .bind(obs.year)
            .bind(obs.value)
            .bind(&obs.sex)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Category configuration
// ---------------------------------------------------------------------------

/// One data source within a category: which dataset, how its listing is
/// addressed, which resource to take, which indicators to extract, and the
/// worker-pool width for its fan-out.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub source_id: String,
    pub strategy: FetchStrategy,
    pub selector: ResourceSelector,
    pub indicators: Vec<String>,
    pub mapping: ColumnMapping,
    pub workers: usize,
}

fn who_mapping() -> ColumnMapping {
    ColumnMapping::new("GHO (CODE)", "GHO (DISPLAY)", "ENDYEAR", "Numeric")
        .with_sex("DIMENSION (NAME)")
}

fn world_bank_mapping() -> ColumnMapping {
    ColumnMapping::new("Indicator Code", "Indicator Name", "Year", "Value")
}

fn unicef_mapping() -> ColumnMapping {
    ColumnMapping::new("INDICATOR", "Indicator", "TIME_PERIOD", "OBS_VALUE")
        .with_country("REF_AREA")
}

fn who_source(selector: ResourceSelector, indicators: &[&str], workers: usize) -> SourceSpec {
    SourceSpec {
        source_id: "who-data".to_string(),
        strategy: FetchStrategy::PerCountryCode,
        selector,
        indicators: indicators.iter().map(|s| s.to_string()).collect(),
        mapping: who_mapping(),
        workers,
    }
}

fn world_bank_source(indicators: &[&str], workers: usize) -> SourceSpec {
    SourceSpec {
        source_id: "world-bank-health-indicators".to_string(),
        strategy: FetchStrategy::PerCountryName,
        selector: ResourceSelector::Index(0),
        indicators: indicators.iter().map(|s| s.to_string()).collect(),
        mapping: world_bank_mapping(),
        workers,
    }
}

fn unicef_source(dataset: &str, indicator: &str, workers: usize) -> SourceSpec {
    SourceSpec {
        source_id: dataset.to_string(),
        strategy: FetchStrategy::SingleResource,
        selector: ResourceSelector::Index(0),
        indicators: vec![indicator.to_string()],
        mapping: unicef_mapping(),
        workers,
    }
}

/// The fixed (source, indicator-list, column-mapping) tuples behind each
/// update category.
pub fn category_sources(category: UpdateCategory) -> Vec<SourceSpec> {
    match category {
        UpdateCategory::HealthStatus => vec![
            who_source(
                ResourceSelector::Index(0),
                &["WHOSIS_000001", "WHOSIS_000002"],
                3,
            ),
            world_bank_source(
                &["SH.DYN.MORT", "SH.DYN.MORT.FE", "SH.DYN.MORT.MA", "SH.DYN.NMRT"],
                3,
            ),
            unicef_source("unicef-mnch-mmr", "MMR_100k", 1),
        ],
        UpdateCategory::ServiceCoverage => vec![
            who_source(
                ResourceSelector::TitleContains("HIV Indicators".to_string()),
                &["HIV_0000000001"],
                3,
            ),
            who_source(
                ResourceSelector::TitleContains("Tuberculosis Indicators".to_string()),
                &["MDG_0000000020"],
                3,
            ),
            who_source(
                ResourceSelector::TitleContains("Malaria Indicators".to_string()),
                &["MALARIA_EST_INCIDENCE"],
                3,
            ),
            who_source(
                ResourceSelector::TitleContains(
                    "Immunization coverage and vaccine-preventable diseases Indicators"
                        .to_string(),
                ),
                &["WHS3_62", "WHS3_41", "WHS3_57"],
                3,
            ),
        ],
        UpdateCategory::RiskFactors => vec![
            unicef_source("unicef-nt-ant-whz-po2", "NT_ANT_WHZ_PO2", 2),
            unicef_source("unicef-ws-ppl-w-sm", "WS_PPL_W-PRE", 2),
            unicef_source("unicef-ws-ppl-w-b", "WS_PPL_W-B", 2),
            unicef_source("unicef-nt-bw-lbw", "NT_BW_LBW", 2),
        ],
        UpdateCategory::HealthSystems => vec![world_bank_source(
            &["SH.UHC.SRVS.CV.XD", "SH.MED.BEDS.ZS", "SP.REG.BRTH.ZS", "SP.REG.DTHS.ZS"],
            4,
        )],
    }
}

// ---------------------------------------------------------------------------
// Resource provider contract
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Network-facing half of the pipeline, abstracted so orchestrator tests can
/// stub provider behaviour without HTTP.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Resolve the listing for one source (scoped to a country for
    /// per-country sources). A country unmappable to a listing URL yields an
    /// empty catalog, not an error.
    async fn catalog(
        &self,
        run_id: Uuid,
        spec: &SourceSpec,
        country: Option<&CountryCode>,
    ) -> Result<Vec<CatalogEntry>, ProviderError>;

    async fn table(
        &self,
        run_id: Uuid,
        source_id: &str,
        entry: &CatalogEntry,
    ) -> Result<DataTable, ProviderError>;
}

/// Live HDX-backed provider.
pub struct LiveProvider {
    catalog: ResourceCatalog,
    loader: ResourceLoader,
    registry: Arc<CountryRegistry>,
}

impl LiveProvider {
    pub fn new(http: HttpClient, registry: Arc<CountryRegistry>) -> Self {
        Self {
            catalog: ResourceCatalog::new(http.clone()),
            loader: ResourceLoader::new(http),
            registry,
        }
    }
}

#[async_trait]
impl ResourceProvider for LiveProvider {
    async fn catalog(
        &self,
        run_id: Uuid,
        spec: &SourceSpec,
        country: Option<&CountryCode>,
    ) -> Result<Vec<CatalogEntry>, ProviderError> {
        let Some(url) = listing_url(
            self.catalog.base_url(),
            &spec.source_id,
            spec.strategy,
            country,
            &self.registry,
        ) else {
            return Ok(Vec::new());
        };
        let retrieved = Utc::now().date_naive();
        Ok(self
            .catalog
            .entries(run_id, &spec.source_id, &url, retrieved)
            .await?)
    }

    async fn table(
        &self,
        run_id: Uuid,
        source_id: &str,
        entry: &CatalogEntry,
    ) -> Result<DataTable, ProviderError> {
        Ok(self.loader.load(run_id, source_id, entry).await?)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Coarse category status surfaced to the UI; per-pair detail stays in the
/// report and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryStatus {
    UpToDate,
    Refreshed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub source: String,
    /// Country scope for per-country units; `None` for batch units.
    pub country: Option<CountryCode>,
    pub refreshed: Vec<IndicatorKey>,
    pub failed: Vec<(IndicatorKey, String)>,
    /// Unit-level failure before any upsert (catalog, download, extraction).
    pub error: Option<String>,
}

impl UnitOutcome {
    fn fresh(spec: &SourceSpec, country: Option<CountryCode>) -> Self {
        Self {
            source: spec.source_id.clone(),
            country,
            refreshed: Vec::new(),
            failed: Vec::new(),
            error: None,
        }
    }

    fn failed_with(spec: &SourceSpec, country: Option<CountryCode>, message: String) -> Self {
        Self {
            source: spec.source_id.clone(),
            country,
            refreshed: Vec::new(),
            failed: Vec::new(),
            error: Some(message),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub run_id: Uuid,
    pub category: UpdateCategory,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitOutcome>,
}

impl RefreshReport {
    pub fn status(&self) -> CategoryStatus {
        if self.units.iter().any(|u| !u.is_ok()) {
            CategoryStatus::Error
        } else if self.units.iter().any(|u| !u.refreshed.is_empty()) {
            CategoryStatus::Refreshed
        } else {
            CategoryStatus::UpToDate
        }
    }
}

#[derive(Debug, Clone)]
enum UnitScope {
    Country(CountryCode),
    Batch(Vec<CountryCode>),
}

pub struct RefreshOrchestrator<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    registry: Arc<CountryRegistry>,
    deadline: Duration,
}

pub type LiveOrchestrator = RefreshOrchestrator<PgStore, LiveProvider>;

impl<S, P> RefreshOrchestrator<S, P>
where
    S: HealthStore + 'static,
    P: ResourceProvider + 'static,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, registry: Arc<CountryRegistry>) -> Self {
        Self {
            store,
            provider,
            registry,
            deadline: Duration::from_secs(30),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<CountryRegistry> {
        self.registry.clone()
    }

    /// Refresh one category for a snapshot of country codes. Blocks until
    /// every fanned-out unit completes or the deadline elapses; on deadline,
    /// unfinished units are abandoned in place and already-committed upserts
    /// are retained.
    pub async fn refresh(
        &self,
        category: UpdateCategory,
        countries: &[CountryCode],
    ) -> RefreshReport {
        self.run_specs(category, category_sources(category), countries)
            .await
    }

    /// Refresh one category for every country the registry knows.
    pub async fn refresh_all(&self, category: UpdateCategory) -> RefreshReport {
        let countries = self.registry.codes();
        self.refresh(category, &countries).await
    }

    async fn run_specs(
        &self,
        category: UpdateCategory,
        specs: Vec<SourceSpec>,
        countries: &[CountryCode],
    ) -> RefreshReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, %category, countries = countries.len(), "starting refresh");

        let mut units: Vec<(SourceSpec, UnitScope, Arc<Semaphore>)> = Vec::new();
        for spec in specs {
            let limit = Arc::new(Semaphore::new(spec.workers.max(1)));
            if spec.strategy.is_per_country() {
                for country in countries {
                    units.push((spec.clone(), UnitScope::Country(country.clone()), limit.clone()));
                }
            } else {
                units.push((spec.clone(), UnitScope::Batch(countries.to_vec()), limit.clone()));
            }
        }

        let mut join_set = JoinSet::new();
        for (index, (spec, scope, limit)) in units.iter().cloned().enumerate() {
            let store = self.store.clone();
            let provider = self.provider.clone();
            let registry = self.registry.clone();
            join_set.spawn(async move {
                let _permit = limit.acquire_owned().await.expect("semaphore not closed");
                let outcome = run_unit(store, provider, registry, run_id, spec, scope).await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<UnitOutcome>> = vec![None; units.len()];
        let joined = tokio::time::timeout(self.deadline, async {
            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok((index, outcome)) => outcomes[index] = Some(outcome),
                    Err(err) => warn!(%run_id, "refresh unit task failed to join: {err}"),
                }
            }
        })
        .await;

        if joined.is_err() {
            // Abandon in place: in-flight units keep running and any upsert
            // they commit afterwards is valid, but this report closes now.
            warn!(%run_id, %category, "refresh deadline elapsed; abandoning unfinished units");
            join_set.detach_all();
        }

        let units = units
            .into_iter()
            .zip(outcomes)
            .map(|((spec, scope, _), outcome)| {
                outcome.unwrap_or_else(|| {
                    let country = match scope {
                        UnitScope::Country(c) => Some(c),
                        UnitScope::Batch(_) => None,
                    };
                    UnitOutcome::failed_with(&spec, country, "deadline elapsed".to_string())
                })
            })
            .collect();

        let report = RefreshReport {
            run_id,
            category,
            started_at,
            finished_at: Utc::now(),
            units,
        };
        info!(%run_id, %category, status = ?report.status(), "refresh finished");
        report
    }
}

/// One full pipeline: catalog -> staleness -> download -> extract -> upsert.
/// Never panics across the task boundary; every failure lands in the outcome.
async fn run_unit<S: HealthStore, P: ResourceProvider>(
    store: Arc<S>,
    provider: Arc<P>,
    registry: Arc<CountryRegistry>,
    run_id: Uuid,
    spec: SourceSpec,
    scope: UnitScope,
) -> UnitOutcome {
    let (scope_country, countries) = match &scope {
        UnitScope::Country(c) => (Some(c.clone()), vec![c.clone()]),
        UnitScope::Batch(list) => (None, list.clone()),
    };

    let entries = match provider.catalog(run_id, &spec, scope_country.as_ref()).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%run_id, source = %spec.source_id, "catalog resolution failed: {err}");
            return UnitOutcome::failed_with(&spec, scope_country, err.to_string());
        }
    };
    // An empty catalog means staleness cannot be determined, not that the
    // pairs are up to date.
    if entries.is_empty() {
        return UnitOutcome::failed_with(&spec, scope_country, "empty catalog".to_string());
    }
    let Some(entry) = spec.selector.pick(&entries) else {
        return UnitOutcome::failed_with(
            &spec,
            scope_country,
            "no matching resource in catalog".to_string(),
        );
    };

    let requested: Vec<IndicatorKey> = spec
        .indicators
        .iter()
        .flat_map(|indicator| {
            countries
                .iter()
                .map(move |country| IndicatorKey::new(indicator.clone(), country.clone()))
        })
        .collect();

    let stale = match stale_keys(store.as_ref(), &requested, entry.published).await {
        Ok(stale) => stale,
        Err(err) => return UnitOutcome::failed_with(&spec, scope_country, err.to_string()),
    };
    if stale.is_empty() {
        debug!(%run_id, source = %spec.source_id, "all pairs up to date; skipping download");
        return UnitOutcome::fresh(&spec, scope_country);
    }

    let mut stale_countries: Vec<CountryCode> = stale.iter().map(|k| k.country.clone()).collect();
    stale_countries.sort();
    stale_countries.dedup();
    let (names, unknown) = registry.resolve(&stale_countries);
    if !unknown.is_empty() {
        warn!(%run_id, source = %spec.source_id, ?unknown, "countries missing from registry");
    }
    if names.is_empty() {
        return UnitOutcome::failed_with(
            &spec,
            scope_country,
            "no requested country known to the registry".to_string(),
        );
    }

    let table = match provider.table(run_id, &spec.source_id, entry).await {
        Ok(table) => table,
        Err(err) => {
            warn!(%run_id, source = %spec.source_id, "resource download failed: {err}");
            return UnitOutcome::failed_with(&spec, scope_country, err.to_string());
        }
    };

    let extract_spec = ExtractSpec {
        mapping: &spec.mapping,
        source: &spec.source_id,
        download_date: Utc::now().date_naive(),
        update_date: entry.published,
    };
    let batches = match extract_batches(&table, &extract_spec, &stale, &names) {
        Ok(batches) => batches,
        Err(err @ ExtractError::MissingColumn(_)) => {
            warn!(%run_id, source = %spec.source_id, "extraction failed: {err}");
            return UnitOutcome::failed_with(&spec, scope_country, err.to_string());
        }
    };

    let mut outcome = UnitOutcome::fresh(&spec, scope_country);
    for batch in &batches {
        match store.upsert_batch(batch).await {
            Ok(()) => outcome.refreshed.push(batch.key.clone()),
            Err(err) => {
                warn!(%run_id, key = %batch.key, "upsert failed; pair stays stale: {err}");
                outcome.failed.push((batch.key.clone(), err.to_string()));
            }
        }
    }
    outcome
}

// ---------------------------------------------------------------------------
// Live wiring + scheduler
// ---------------------------------------------------------------------------

/// Build the live orchestrator from env-derived config: HTTP client,
/// country registry, Postgres store.
pub async fn connect_live(config: &SyncConfig) -> Result<Arc<LiveOrchestrator>> {
    let http = HttpClient::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?;
    let registry = Arc::new(
        CountryRegistry::from_path(config.countries_path()).context("loading country registry")?,
    );
    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    let provider = Arc::new(LiveProvider::new(http, registry.clone()));
    Ok(Arc::new(
        RefreshOrchestrator::new(store, provider, registry)
            .with_deadline(Duration::from_secs(config.refresh_deadline_secs)),
    ))
}

/// Cron-driven full refresh over all known countries, one pass per category.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<LiveOrchestrator>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let mut scheduler = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.refresh_cron_1, &config.refresh_cron_2] {
        let orchestrator = orchestrator.clone();
        let job = Job::new_async(cron.as_str(), move |_id, _lock| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                for category in UpdateCategory::ALL {
                    let report = orchestrator.refresh_all(category).await;
                    info!(
                        run_id = %report.run_id,
                        %category,
                        status = ?report.status(),
                        "scheduled refresh pass finished"
                    );
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        scheduler.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(scheduler))
}
