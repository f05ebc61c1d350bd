use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use library_jobs::database_ops::igdb::client::{IgdbClient, IgdbConfig};
use library_jobs::database_ops::igdb::IGDB_PROVIDER;
use library_jobs::database_ops::installers::validation::validate_installer;
use library_jobs::database_ops::job_runner::{Job, JobContext, JobRunner, MaintenanceJob};
use library_jobs::database_ops::media::{FsMediaStore, MediaStore, MemoryMediaStore};
use library_jobs::database_ops::memory_store::MemoryStore;
use library_jobs::database_ops::models::ResourceKind;
use library_jobs::database_ops::pg_store::PgStore;
use library_jobs::tracing::init_tracing;
use library_jobs::util::db::Db;
use library_jobs::util::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "jobs", version, about = "Game library maintenance jobs")]
struct Cli {
    /// Run against an empty in-memory store instead of Postgres
    #[arg(long, global = true, default_value_t = false)]
    dry_store: bool,
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    /// Media root (defaults to MEDIA_ROOT or ./media)
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Resource {
    Games,
    Genres,
    Platforms,
    Covers,
}

impl From<Resource> for ResourceKind {
    fn from(value: Resource) -> Self {
        match value {
            Resource::Games => ResourceKind::Game,
            Resource::Genres => ResourceKind::Genre,
            Resource::Platforms => ResourceKind::Platform,
            Resource::Covers => ResourceKind::Cover,
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Accept or delete pending installer revisions the rules can settle
    AutoProcessInstallers,
    /// Delete installer snapshots whose installer is gone
    ClearOrphanVersions,
    /// Delete revisions left without versions
    ClearOrphanRevisions,
    /// Delete placeholder forks nobody worked on
    DeleteUnchangedForks,
    /// Delete zero-valued action log counters
    CleanActionLog,
    /// All installer housekeeping passes, in order
    InstallerMaintenance,
    /// Mirror one IGDB resource into the provider store
    LoadIgdb {
        #[arg(value_enum)]
        resource: Resource,
    },
    /// Create or update local games from IGDB main games
    MatchIgdbGames,
    /// Link local platforms to IGDB platforms
    SyncIgdbPlatforms,
    /// Merge local games that only differ from IGDB games by apostrophe handling
    DeduplicateLutrisGames,
    /// Download IGDB covers for matched games
    SyncIgdbCoverart {
        /// Download again even when artwork is already present
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Load every IGDB resource, link platforms and games, then fetch covers
    IgdbSync,
    /// One-off: fold id-keyed IGDB game records into their slug-keyed twins
    DeduplicateIgdbGames,
    /// One-off: re-derive IGDB game keys from their payloads
    FixIgdbGames,
    /// One-off: delete unused local games created from IGDB DLCs and bundles
    RemoveDlcsFromGames,
    /// Check an installer script file without touching any store
    ValidateInstaller {
        path: PathBuf,
        #[arg(long)]
        runner: String,
    },
}

impl Commands {
    fn jobs(&self) -> Vec<Job> {
        match self {
            Commands::AutoProcessInstallers => vec![Job::AutoProcessInstallers],
            Commands::ClearOrphanVersions => vec![Job::ClearOrphanVersions],
            Commands::ClearOrphanRevisions => vec![Job::ClearOrphanRevisions],
            Commands::DeleteUnchangedForks => vec![Job::DeleteUnchangedForks],
            Commands::CleanActionLog => vec![Job::CleanActionLog],
            Commands::InstallerMaintenance => Job::INSTALLER_MAINTENANCE.to_vec(),
            Commands::LoadIgdb { resource } => vec![Job::LoadIgdb((*resource).into())],
            Commands::MatchIgdbGames => vec![Job::MatchIgdbGames],
            Commands::SyncIgdbPlatforms => vec![Job::SyncIgdbPlatforms],
            Commands::DeduplicateLutrisGames => vec![Job::DeduplicateLutrisGames],
            Commands::SyncIgdbCoverart { force } => vec![Job::SyncIgdbCoverart { force: *force }],
            Commands::IgdbSync => Job::IGDB_SYNC.to_vec(),
            Commands::DeduplicateIgdbGames => vec![Job::DeduplicateIgdbGames],
            Commands::FixIgdbGames => vec![Job::FixIgdbGames],
            Commands::RemoveDlcsFromGames => vec![Job::RemoveDlcsFromGames],
            Commands::ValidateInstaller { .. } => Vec::new(),
        }
    }
}

fn validate_file(path: &Path, runner: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading installer script {}", path.display()))?;
    let result = validate_installer(&content, runner);
    if result.is_valid {
        info!(path = %path.display(), runner, "installer script is valid");
        return Ok(());
    }
    for message in &result.errors {
        error!(path = %path.display(), runner, "{message}");
    }
    bail!("{} validation error(s) in {}", result.errors.len(), path.display())
}

async fn build_context(cli: &Cli, jobs: &[Job]) -> Result<JobContext> {
    let media_root = cli
        .media_root
        .clone()
        .or_else(|| env::env_opt("MEDIA_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./media"));

    let ctx = if cli.dry_store {
        warn!("--dry-store: running against an empty in-memory store");
        let media: Arc<dyn MediaStore> = Arc::new(MemoryMediaStore::new());
        JobContext::from_store(Arc::new(MemoryStore::new()), media)
    } else {
        let database_url = match &cli.db_url {
            Some(url) => url.clone(),
            None => env::db_url()?,
        };
        let db = Db::connect(&database_url, env::env_parse("DB_MAX_CONNS", 5u32)).await?;
        let media: Arc<dyn MediaStore> =
            Arc::new(FsMediaStore::for_provider(&media_root, IGDB_PROVIDER));
        JobContext::from_store(Arc::new(PgStore::new(db)), media)
    };

    let ctx = ctx.with_igdb_config(IgdbConfig::from_env());
    if jobs.iter().any(Job::needs_source) {
        let client = IgdbClient::new_from_env()?;
        return Ok(ctx.with_source(Arc::new(client)));
    }
    Ok(ctx)
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info,sqlx=warn")?;
    env::bootstrap_cli("jobs");

    let cli = Cli::parse();
    if let Commands::ValidateInstaller { path, runner } = &cli.command {
        return validate_file(path, runner);
    }

    let jobs = cli.command.jobs();
    let ctx = build_context(&cli, &jobs).await?;
    let runner = JobRunner::new(ctx);
    let refs: Vec<&dyn MaintenanceJob> = jobs.iter().map(|j| j as &dyn MaintenanceJob).collect();
    let reports = runner.run_all(&refs).await?;

    for (job, report) in &reports {
        for (key, value) in report.entries() {
            println!("{job}\t{key}={value}");
        }
    }
    Ok(())
}
