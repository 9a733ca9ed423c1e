//! Entity pipelines: fetch → stage → reconcile or append
//!
//! Every step reads the staging table back instead of passing fetched
//! records straight through, so the historical and fact tables are always
//! fed from what the staging area holds.

pub mod combine;
pub mod summary;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

pub use combine::{combine_countries, CombinedCountries};
pub use summary::{
    BatchSummary, LoadOutcome, PipelineFailure, RunSummary, SkippedPipeline, TableStatus,
};

use crate::config::{HttpConfig, SourceConfig};
use crate::entity::{
    self, EntitySpec, LoadStrategy, AIR_QUALITY, COUNTRIES, REGIONS_STATS, WEATHER,
};
use crate::error::{IngestError, Result};
use crate::facts;
use crate::reconcile;
use crate::run::RunContext;
use crate::sources::{
    capitals_from_countries, AirQualityFetcher, AqicnClient, Capital, CountriesFetcher,
    CountryFieldSet, FetchBatch, Fetcher, OpenMeteoClient, RegionStatsFetcher, RestCountriesClient,
    SourceError, WeatherFetcher, CAPITALS,
};
use crate::staging::{self, StagingReport};
use crate::store::{FactStore, HistoricalStore, StagingStore, Warehouse};

/// Pipelines selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PipelineKind {
    Countries,
    RegionsStats,
    Weather,
    AirQuality,
    All,
}

impl PipelineKind {
    /// Pipelines that read what the countries pipeline loaded in the same batch
    pub const DOWNSTREAM: [PipelineKind; 3] = [
        PipelineKind::RegionsStats,
        PipelineKind::Weather,
        PipelineKind::AirQuality,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Countries => "countries",
            PipelineKind::RegionsStats => "regions_stats",
            PipelineKind::Weather => "weather",
            PipelineKind::AirQuality => "air_quality",
            PipelineKind::All => "all",
        }
    }
}

/// Source clients, built once per process
#[derive(Debug, Clone)]
pub struct Sources {
    pub rest_countries: RestCountriesClient,
    pub open_meteo: OpenMeteoClient,
    /// Absent when no AQICN token is configured
    pub aqicn: Option<AqicnClient>,
    pub regions: Vec<String>,
    pub capitals: Vec<Capital>,
}

impl Sources {
    pub fn from_config(sources: &SourceConfig, http: &HttpConfig) -> Result<Self> {
        let aqicn = sources
            .aqicn_token
            .clone()
            .map(|token| AqicnClient::new(sources.aqicn_url.clone(), Some(token), http))
            .transpose()?;

        Ok(Self {
            rest_countries: RestCountriesClient::new(sources.rest_countries_url.clone(), http)?,
            open_meteo: OpenMeteoClient::new(sources.open_meteo_url.clone(), http)?,
            aqicn,
            regions: sources.regions.clone(),
            capitals: CAPITALS.to_vec(),
        })
    }
}

/// A staging table filled from one fetch
struct Staged {
    fetched: usize,
    skipped: usize,
    errors: Vec<SourceError>,
    report: StagingReport,
}

pub struct Pipeline {
    warehouse: Arc<dyn Warehouse>,
    sources: Sources,
}

impl Pipeline {
    pub fn new(warehouse: Arc<dyn Warehouse>, sources: Sources) -> Self {
        Self { warehouse, sources }
    }

    pub fn warehouse(&self) -> &dyn Warehouse {
        self.warehouse.as_ref()
    }

    /// Run one pipeline, or all of them, under the run's id
    pub async fn run(&self, kind: PipelineKind, ctx: &RunContext) -> BatchSummary {
        let outcome = match kind {
            PipelineKind::All => return self.all(ctx).await,
            PipelineKind::Countries => self.countries(ctx).await,
            PipelineKind::RegionsStats => self.regions_stats(ctx).await,
            PipelineKind::Weather => self.weather(ctx).await,
            PipelineKind::AirQuality => self.air_quality(ctx).await,
        };

        let mut batch = BatchSummary::new(ctx.run_id.clone());
        batch.record(kind.as_str(), outcome);
        batch
    }

    /// Countries first, since air quality reads its capitals; the rest concurrently.
    ///
    /// When countries fails nothing else is started and the other pipelines
    /// are reported as skipped.
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn all(&self, ctx: &RunContext) -> BatchSummary {
        let mut batch = BatchSummary::new(ctx.run_id.clone());
        let countries = self.countries(ctx).await;
        let upstream_ok = countries.is_ok();
        batch.record(PipelineKind::Countries.as_str(), countries);

        if upstream_ok {
            let (regions, weather, air_quality) = tokio::join!(
                self.regions_stats(ctx),
                self.weather(ctx),
                self.air_quality(ctx)
            );
            batch.record(PipelineKind::RegionsStats.as_str(), regions);
            batch.record(PipelineKind::Weather.as_str(), weather);
            batch.record(PipelineKind::AirQuality.as_str(), air_quality);
        } else {
            for kind in PipelineKind::DOWNSTREAM {
                batch.skip(kind.as_str(), "upstream countries failed");
            }
        }

        for failure in &batch.failures {
            warn!(pipeline = %failure.pipeline, error = %failure.error, "Pipeline failed");
        }
        for skipped in &batch.skipped {
            warn!(pipeline = %skipped.pipeline, reason = %skipped.reason, "Pipeline skipped");
        }
        info!(
            succeeded = batch.summaries.len(),
            failed = batch.failures.len(),
            skipped = batch.skipped.len(),
            "All pipelines finished"
        );
        batch
    }

    /// Fetch the three country views, stage each, merge their join into `th_countries`.
    ///
    /// Field sets are staged independently. If any of them could not be
    /// fetched or staged, the others still land in staging but the merge
    /// is not attempted.
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn countries(&self, ctx: &RunContext) -> Result<RunSummary> {
        let started_at = Utc::now();
        let [basic, geo, culture] = CountryFieldSet::ALL
            .map(|set| CountriesFetcher::new(self.sources.rest_countries.clone(), set));

        let (basic_batch, geo_batch, culture_batch) =
            tokio::join!(basic.fetch(), geo.fetch(), culture.fetch());

        let mut staged = Vec::with_capacity(3);
        let mut incomplete = Vec::new();
        for (fetcher, batch) in [
            (&basic, basic_batch),
            (&geo, geo_batch),
            (&culture, culture_batch),
        ] {
            let spec = fetcher.field_set().entity();
            let outcome = match batch {
                Ok(batch) => self.stage(spec, batch, ctx).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(report) => staged.push(report),
                Err(e) => {
                    warn!(entity = spec.name, error = %e, "Country field set not staged");
                    incomplete.push(format!("{}: {}", spec.name, e));
                }
            }
        }

        if !incomplete.is_empty() {
            return Err(IngestError::StagingIncomplete {
                entity: COUNTRIES.name.to_string(),
                detail: incomplete.join("; "),
            });
        }

        let wh = self.warehouse();
        let basic_rows = staging::read_staging(wh, CountryFieldSet::Basic.entity()).await?;
        let geo_rows = staging::read_staging(wh, CountryFieldSet::Geo.entity()).await?;
        let culture_rows = staging::read_staging(wh, CountryFieldSet::Culture.entity()).await?;

        let combined = combine_countries(&basic_rows, &geo_rows, &culture_rows);
        if combined.unmatched > 0 {
            warn!(
                unmatched = combined.unmatched,
                "Countries without geo or culture data dropped"
            );
        }

        let report = reconcile::reconcile(wh, &COUNTRIES, &combined.rows, ctx).await?;

        Ok(finish(
            &COUNTRIES,
            ctx,
            started_at,
            staged,
            LoadOutcome::Merge(report),
            Some(combined.unmatched),
        ))
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn regions_stats(&self, ctx: &RunContext) -> Result<RunSummary> {
        let started_at = Utc::now();
        let fetcher = RegionStatsFetcher::new(
            self.sources.rest_countries.clone(),
            self.sources.regions.clone(),
        );

        let staged = self.fetch_and_stage(&fetcher, &REGIONS_STATS, ctx).await?;
        let rows = staging::read_staging(self.warehouse(), &REGIONS_STATS).await?;
        let report = reconcile::reconcile(self.warehouse(), &REGIONS_STATS, &rows, ctx).await?;

        Ok(finish(
            &REGIONS_STATS,
            ctx,
            started_at,
            vec![staged],
            LoadOutcome::Merge(report),
            None,
        ))
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn weather(&self, ctx: &RunContext) -> Result<RunSummary> {
        let started_at = Utc::now();
        let fetcher = WeatherFetcher::new(
            self.sources.open_meteo.clone(),
            self.sources.capitals.clone(),
        );

        let staged = self.fetch_and_stage(&fetcher, &WEATHER, ctx).await?;
        let rows = staging::read_staging(self.warehouse(), &WEATHER).await?;
        let report = facts::append(self.warehouse(), &WEATHER, &rows, ctx).await?;

        Ok(finish(
            &WEATHER,
            ctx,
            started_at,
            vec![staged],
            LoadOutcome::Append(report),
            None,
        ))
    }

    /// Air quality for every capital currently in `th_countries`
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn air_quality(&self, ctx: &RunContext) -> Result<RunSummary> {
        let started_at = Utc::now();
        let client =
            self.sources.aqicn.clone().ok_or_else(|| {
                IngestError::config("AQICN_API_TOKEN is required for air quality")
            })?;

        let countries = self.warehouse.list_historical(&COUNTRIES).await?;
        let cities = capitals_from_countries(&countries);
        if cities.is_empty() {
            warn!("No capitals in the countries table; run the countries pipeline first");
        }
        info!(cities = cities.len(), "Capitals selected for air quality");

        let fetcher = AirQualityFetcher::new(client, cities);
        let staged = self.fetch_and_stage(&fetcher, &AIR_QUALITY, ctx).await?;
        let rows = staging::read_staging(self.warehouse(), &AIR_QUALITY).await?;
        let report = facts::append(self.warehouse(), &AIR_QUALITY, &rows, ctx).await?;

        Ok(finish(
            &AIR_QUALITY,
            ctx,
            started_at,
            vec![staged],
            LoadOutcome::Append(report),
            None,
        ))
    }

    /// Row counts of every staging, historical and fact table
    pub async fn status(&self) -> Result<Vec<TableStatus>> {
        table_status(self.warehouse()).await
    }

    async fn fetch_and_stage(
        &self,
        fetcher: &dyn Fetcher,
        spec: &'static EntitySpec,
        ctx: &RunContext,
    ) -> Result<Staged> {
        let batch = fetcher.fetch().await?;
        self.stage(spec, batch, ctx).await
    }

    async fn stage(
        &self,
        spec: &'static EntitySpec,
        batch: FetchBatch,
        ctx: &RunContext,
    ) -> Result<Staged> {
        let fetched = batch.records.len();
        if fetched == 0 {
            warn!(entity = spec.name, "Source returned no records");
        }
        let report = staging::load(self.warehouse(), spec, batch.records, ctx).await?;

        Ok(Staged {
            fetched,
            skipped: batch.skipped,
            errors: batch.errors,
            report,
        })
    }
}

/// Row counts per table of `warehouse`
pub async fn table_status(warehouse: &dyn Warehouse) -> Result<Vec<TableStatus>> {
    let mut status = Vec::new();

    for spec in entity::catalog() {
        if let Some(table) = spec.staging_table {
            status.push(TableStatus {
                entity: spec.name.to_string(),
                table: table.to_string(),
                rows: warehouse.count_staging(table).await?,
            });
        }
        if let Some(table) = spec.target_table {
            let rows = match spec.strategy {
                LoadStrategy::Merge => warehouse.count_historical(spec).await?,
                LoadStrategy::Append => warehouse.count_facts(spec).await?,
                LoadStrategy::StagingOnly => continue,
            };
            status.push(TableStatus {
                entity: spec.name.to_string(),
                table: table.to_string(),
                rows,
            });
        }
    }

    Ok(status)
}

fn finish(
    spec: &EntitySpec,
    ctx: &RunContext,
    started_at: DateTime<Utc>,
    staged: Vec<Staged>,
    load: LoadOutcome,
    unmatched: Option<usize>,
) -> RunSummary {
    let finished_at = Utc::now();
    let fetched = staged.iter().map(|s| s.fetched).sum();
    let skipped = staged.iter().map(|s| s.skipped).sum();
    let mut source_errors = Vec::new();
    let mut staging = Vec::with_capacity(staged.len());
    for s in staged {
        source_errors.extend(s.errors);
        staging.push(s.report);
    }

    let summary = RunSummary {
        run_id: ctx.run_id.clone(),
        entity: spec.name.to_string(),
        started_at,
        finished_at,
        duration_ms: (finished_at - started_at).num_milliseconds(),
        fetched,
        skipped,
        source_errors,
        staging,
        no_data: fetched == 0,
        load,
        unmatched,
    };

    info!(
        entity = spec.name,
        fetched = summary.fetched,
        source_errors = summary.source_errors.len(),
        failed_rows = summary.load.failed_rows(),
        no_data = summary.no_data,
        duration_ms = summary.duration_ms,
        "Pipeline finished"
    );

    summary
}
