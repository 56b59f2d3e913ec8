use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::ai::{backend_from_config, ClassificationClient, CompletionBackend, RetryPolicy};
use crate::analysis::{
    process_cve_mentions, refresh_cve_details, run_category_assignment, run_company_extraction,
    run_subgroup_discovery, CategoryRunReport, SubgroupRunReport, Taxonomy,
};
use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::feed::dates::normalize_stored_dates;
use crate::feed::{run_ingest, FeedFetcher, IngestReport};
use crate::services::{CveLookup, MitreCveClient};

/// Counts from one pass over every stage. Steps that failed are named in
/// `failed_steps`; their counters stay at zero.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub ingest: Option<IngestReport>,
    pub dates_normalized: usize,
    pub companies_inserted: usize,
    pub cve_mentions: usize,
    pub cve_details: usize,
    pub categories: CategoryRunReport,
    pub subgroups: Vec<SubgroupRunReport>,
    pub failed_steps: Vec<String>,
}

impl PipelineReport {
    pub fn subgroups_created(&self) -> usize {
        self.subgroups.iter().map(|r| r.subgroups_created).sum()
    }

    fn record<T: Default>(&mut self, step: &str, result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(step, error = %e, "Pipeline step failed");
                self.failed_steps.push(step.to_string());
                T::default()
            }
        }
    }
}

pub struct Pipeline {
    config: Config,
    repository: Repository,
    client: ClassificationClient,
    cve_lookup: Arc<dyn CveLookup>,
    fetcher: FeedFetcher,
    taxonomy: Taxonomy,
}

impl Pipeline {
    /// Opens storage and builds the LLM backend. Either failing is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        let backend = backend_from_config(&config)?;
        let cve_lookup = Arc::new(MitreCveClient::new(config.cve_api_url.clone())?);
        Self::with_parts(config, repository, backend, cve_lookup)
    }

    /// Assembles a pipeline from already-built collaborators.
    pub fn with_parts(
        config: Config,
        repository: Repository,
        backend: Arc<dyn CompletionBackend>,
        cve_lookup: Arc<dyn CveLookup>,
    ) -> Result<Self> {
        let client = ClassificationClient::new(backend, RetryPolicy::from_config(&config));
        let taxonomy = Taxonomy::from_config(&config);
        Ok(Self {
            fetcher: FeedFetcher::new()?,
            config,
            repository,
            client,
            cve_lookup,
            taxonomy,
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub async fn ingest(&self) -> IngestReport {
        run_ingest(&self.repository, &self.fetcher, &self.config.feeds).await
    }

    pub async fn group(&self) -> Result<CategoryRunReport> {
        run_category_assignment(
            &self.repository,
            &self.client,
            &self.taxonomy,
            self.config.max_token_chunk,
        )
        .await
    }

    pub async fn subgroup(&self, category: &str) -> Result<SubgroupRunReport> {
        if !self.taxonomy.is_known(category) {
            tracing::warn!(category, "Category is not configured; nothing will be selected");
        }
        run_subgroup_discovery(
            &self.repository,
            &self.client,
            category,
            self.config.max_token_chunk,
        )
        .await
    }

    /// Phase 2 for every category plus the catch-all, a few categories at a time.
    pub async fn subgroup_all(&self) -> Vec<Result<SubgroupRunReport>> {
        let concurrency = self.config.subgroup_concurrency.max(1);
        stream::iter(self.taxonomy.names())
            .map(|category| self.subgroup(category))
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Records CVE mentions, then refreshes cached details.
    pub async fn cves(&self) -> Result<(usize, usize)> {
        let mentions = process_cve_mentions(&self.repository).await?;
        let details = refresh_cve_details(&self.repository, self.cve_lookup.as_ref()).await?;
        Ok((mentions, details))
    }

    pub async fn run_once(&self) -> PipelineReport {
        let mut report = PipelineReport::default();
        tracing::info!("Pipeline run started");

        if !self.config.feeds.is_empty() {
            report.ingest = Some(self.ingest().await);
        }

        let dates = normalize_stored_dates(&self.repository).await;
        report.dates_normalized = report.record("normalize_dates", dates);

        let companies =
            run_company_extraction(&self.repository, &self.client, self.config.max_token_chunk)
                .await;
        report.companies_inserted = report.record("companies", companies);

        let mentions = process_cve_mentions(&self.repository).await;
        report.cve_mentions = report.record("cve_mentions", mentions);

        let details = refresh_cve_details(&self.repository, self.cve_lookup.as_ref()).await;
        report.cve_details = report.record("cve_details", details);

        let categories = self.group().await;
        report.categories = report.record("categories", categories);

        for result in self.subgroup_all().await {
            if let Some(subgroups) = report.record("subgroups", result.map(Some)) {
                report.subgroups.push(subgroups);
            }
        }

        tracing::info!(
            classified = report.categories.assigned,
            subgroups = report.subgroups_created(),
            failed_steps = report.failed_steps.len(),
            "Pipeline run finished"
        );
        report
    }

    /// Runs forever on the configured interval until interrupted.
    pub async fn run_forever(&self) -> Result<()> {
        let period = Duration::from_secs(self.config.run_interval_minutes.max(1) * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                    tracing::info!(minutes = period.as_secs() / 60, "Sleeping until next run");
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, stopping");
                    return Ok(());
                }
            }
        }
    }
}
