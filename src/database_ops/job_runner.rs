use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::action_log::{save_report, JobReport};
use super::igdb::client::{CatalogSource, IgdbConfig};
use super::igdb::{covers, dedupe, ingest, matcher, repair};
use super::installers::{moderation, sweeper};
use super::media::MediaStore;
use super::models::ResourceKind;
use super::store::{ActionLogStore, CatalogStore, InstallerStore};

/// Collaborators a job may reach for. The catalog source is optional so installer-only runs
/// work without IGDB credentials.
#[derive(Clone)]
pub struct JobContext {
    pub installers: Arc<dyn InstallerStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub action_log: Arc<dyn ActionLogStore>,
    pub media: Arc<dyn MediaStore>,
    pub igdb: IgdbConfig,
    source: Option<Arc<dyn CatalogSource>>,
}

impl JobContext {
    /// Context over one store backing all three repositories.
    pub fn from_store<S>(store: Arc<S>, media: Arc<dyn MediaStore>) -> Self
    where
        S: InstallerStore + CatalogStore + ActionLogStore + 'static,
    {
        Self {
            installers: store.clone(),
            catalog: store.clone(),
            action_log: store,
            media,
            igdb: IgdbConfig::default(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CatalogSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_igdb_config(mut self, cfg: IgdbConfig) -> Self {
        self.igdb = cfg;
        self
    }

    pub fn source(&self) -> Result<&dyn CatalogSource> {
        self.source
            .as_deref()
            .ok_or_else(|| anyhow!("IGDB client not configured (set TWITCH_CLIENT_ID and TWITCH_CLIENT_SECRET)"))
    }
}

#[async_trait::async_trait]
pub trait MaintenanceJob: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &JobContext) -> Result<JobReport>;
}

/// Every scheduled or one-off pass the binary can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    AutoProcessInstallers,
    ClearOrphanVersions,
    ClearOrphanRevisions,
    DeleteUnchangedForks,
    CleanActionLog,
    LoadIgdb(ResourceKind),
    MatchIgdbGames,
    SyncIgdbPlatforms,
    DeduplicateLutrisGames,
    SyncIgdbCoverart { force: bool },
    DeduplicateIgdbGames,
    FixIgdbGames,
    RemoveDlcsFromGames,
}

impl Job {
    /// Installer housekeeping in the order the scheduler runs it. The action log is cleaned
    /// first so this run's own zero counters survive.
    pub const INSTALLER_MAINTENANCE: [Job; 5] = [
        Job::CleanActionLog,
        Job::AutoProcessInstallers,
        Job::ClearOrphanVersions,
        Job::ClearOrphanRevisions,
        Job::DeleteUnchangedForks,
    ];

    /// Full IGDB refresh: mirror, then link, then artwork.
    pub const IGDB_SYNC: [Job; 8] = [
        Job::LoadIgdb(ResourceKind::Platform),
        Job::LoadIgdb(ResourceKind::Genre),
        Job::LoadIgdb(ResourceKind::Game),
        Job::LoadIgdb(ResourceKind::Cover),
        Job::SyncIgdbPlatforms,
        Job::MatchIgdbGames,
        Job::DeduplicateLutrisGames,
        Job::SyncIgdbCoverart { force: false },
    ];

    /// Whether the job talks to the remote catalog.
    pub fn needs_source(&self) -> bool {
        matches!(self, Job::LoadIgdb(_) | Job::SyncIgdbCoverart { .. })
    }
}

#[async_trait::async_trait]
impl MaintenanceJob for Job {
    fn name(&self) -> &'static str {
        match self {
            Job::AutoProcessInstallers => "auto_process_installers",
            Job::ClearOrphanVersions => "clear_orphan_versions",
            Job::ClearOrphanRevisions => "clear_orphan_revisions",
            Job::DeleteUnchangedForks => "delete_unchanged_forks",
            Job::CleanActionLog => "clean_action_log",
            Job::LoadIgdb(ResourceKind::Game) => "load_igdb_games",
            Job::LoadIgdb(ResourceKind::Genre) => "load_igdb_genres",
            Job::LoadIgdb(ResourceKind::Platform) => "load_igdb_platforms",
            Job::LoadIgdb(ResourceKind::Cover) => "load_igdb_covers",
            Job::MatchIgdbGames => "match_igdb_games",
            Job::SyncIgdbPlatforms => "sync_igdb_platforms",
            Job::DeduplicateLutrisGames => "deduplicate_lutris_games",
            Job::SyncIgdbCoverart { .. } => "sync_igdb_coverart",
            Job::DeduplicateIgdbGames => "deduplicate_igdb_games",
            Job::FixIgdbGames => "fix_igdb_games",
            Job::RemoveDlcsFromGames => "remove_dlcs_from_games",
        }
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobReport> {
        let catalog = ctx.catalog.as_ref();
        match *self {
            Job::AutoProcessInstallers => {
                moderation::auto_process_installers(ctx.installers.as_ref()).await
            }
            Job::ClearOrphanVersions => sweeper::clear_orphan_versions(ctx.installers.as_ref()).await,
            Job::ClearOrphanRevisions => {
                sweeper::clear_orphan_revisions(ctx.installers.as_ref()).await
            }
            Job::DeleteUnchangedForks => {
                sweeper::delete_unchanged_forks(ctx.installers.as_ref()).await
            }
            Job::CleanActionLog => sweeper::clean_action_log(ctx.action_log.as_ref()).await,
            Job::LoadIgdb(ResourceKind::Game) => {
                ingest::load_igdb_games(ctx.source()?, catalog, &ctx.igdb).await
            }
            Job::LoadIgdb(kind) => {
                ingest::load_igdb_resource(ctx.source()?, catalog, kind, &ctx.igdb).await
            }
            Job::MatchIgdbGames => matcher::match_igdb_games(catalog).await,
            Job::SyncIgdbPlatforms => matcher::sync_igdb_platforms(catalog).await,
            Job::DeduplicateLutrisGames => dedupe::deduplicate_lutris_games(catalog).await,
            Job::SyncIgdbCoverart { force } => {
                covers::sync_igdb_coverart(catalog, ctx.source()?, ctx.media.as_ref(), force).await
            }
            Job::DeduplicateIgdbGames => repair::deduplicate_igdb_games(catalog).await,
            Job::FixIgdbGames => repair::fix_igdb_games(catalog).await,
            Job::RemoveDlcsFromGames => Ok(repair::remove_dlcs_from_games(catalog).await?.report()),
        }
    }
}

pub struct JobRunner {
    ctx: JobContext,
}

impl JobRunner {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }

    /// Runs one job and writes its report to the action log.
    pub async fn run(&self, job: &dyn MaintenanceJob) -> Result<JobReport> {
        info!(job = job.name(), "starting job");
        let started = Instant::now();
        let report = job.run(&self.ctx).await?;
        save_report(self.ctx.action_log.as_ref(), &report).await?;
        info!(
            job = job.name(),
            entries = report.entries().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        );
        Ok(report)
    }

    /// Runs jobs one after another. A failing job does not stop the rest; the first error is
    /// returned once every job has had its turn.
    pub async fn run_all(&self, jobs: &[&dyn MaintenanceJob]) -> Result<Vec<(&'static str, JobReport)>> {
        let mut reports = Vec::with_capacity(jobs.len());
        let mut first_err: Option<anyhow::Error> = None;
        for job in jobs {
            match self.run(*job).await {
                Ok(report) => reports.push((job.name(), report)),
                Err(e) => {
                    error!(job = job.name(), error = %e, "job failed");
                    if first_err.is_none() {
                        first_err = Some(e.context(format!("job {} failed", job.name())));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}
