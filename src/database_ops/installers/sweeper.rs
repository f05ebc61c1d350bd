//! Housekeeping passes over revisions, abandoned forks and the action log.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::database_ops::action_log::JobReport;
use crate::database_ops::models::INSTALLER_CONTENT_TYPE;
use crate::database_ops::store::{ActionLogStore, InstallerStore};

/// Deletes installer snapshots whose installer no longer exists. Snapshots of new
/// installers have no target yet and are kept.
#[instrument(skip(store))]
pub async fn clear_orphan_versions(store: &dyn InstallerStore) -> Result<JobReport> {
    let mut deleted = 0usize;
    for version in store.versions_of_type(INSTALLER_CONTENT_TYPE).await? {
        let Some(installer_id) = version.object_id else {
            continue;
        };
        if store.installer(installer_id).await?.is_some() {
            continue;
        }
        warn!(
            target = "sweeper",
            version_id = version.id,
            revision_id = version.revision_id,
            installer_id,
            "deleting orphan version"
        );
        store.delete_version(version.id).await?;
        deleted += 1;
    }
    Ok(JobReport::new().with("clear_orphan_versions", deleted))
}

/// Deletes revisions left without any version.
#[instrument(skip(store))]
pub async fn clear_orphan_revisions(store: &dyn InstallerStore) -> Result<JobReport> {
    let deleted = store.delete_empty_revisions().await?;
    info!(target = "sweeper", deleted, "cleared empty revisions");
    Ok(JobReport::new().with("clear_orphan_revisions", deleted))
}

/// Periodically delete forked installers that never received any change.
#[instrument(skip(store))]
pub async fn delete_unchanged_forks(store: &dyn InstallerStore) -> Result<JobReport> {
    let mut deleted = 0usize;
    for installer in store.abandoned_installers().await? {
        info!(
            target = "sweeper",
            installer_id = installer.id,
            slug = %installer.slug,
            "deleting abandoned fork"
        );
        store.delete_installer(installer.id).await?;
        deleted += 1;
    }
    Ok(JobReport::new().with("delete_unchanged_forks", deleted))
}

/// Drops counters stuck at zero.
#[instrument(skip(store))]
pub async fn clean_action_log(store: &dyn ActionLogStore) -> Result<JobReport> {
    let deleted = store.delete_zero_values().await?;
    info!(target = "sweeper", deleted, "removed zero-valued action log entries");
    Ok(JobReport::new().with("clean_action_log", deleted))
}
