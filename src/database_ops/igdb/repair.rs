//! One-off repair passes over the IGDB mirror. Run by hand from the CLI, in this order:
//! `deduplicate-igdb-games`, then `fix-igdb-games`. `remove-dlcs-from-games` is independent.

use anyhow::Result;
use chrono::DateTime;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

use super::IGDB_PROVIDER;
use crate::database_ops::action_log::JobReport;
use crate::database_ops::models::{GameCategory, ResourceKind};
use crate::database_ops::store::CatalogStore;

/// Moves data from id-keyed records onto their older slug-keyed twins, then drops the
/// id-keyed copy and re-keys the survivor.
#[instrument(skip(store))]
pub async fn deduplicate_igdb_games(store: &dyn CatalogStore) -> Result<JobReport> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let mut deleted: BTreeSet<i64> = BTreeSet::new();
    let mut merged = 0usize;

    for by_id in store.provider_records(provider.id, ResourceKind::Game).await? {
        if deleted.contains(&by_id.id) {
            continue;
        }
        let Some(slug) = by_id.payload_slug() else {
            continue;
        };
        if by_id.slug == slug {
            // already slug based
            continue;
        }
        let internal_id = by_id.meta_i64("id").unwrap_or(by_id.internal_id);
        let twins = store
            .provider_records_by_slug(provider.id, ResourceKind::Game, slug)
            .await?;
        let Some(mut by_slug) = twins
            .into_iter()
            .find(|r| r.id != by_id.id && !deleted.contains(&r.id))
        else {
            debug!(target = "igdb", slug, "no slug based record to attach to");
            continue;
        };

        for mut game in store.games_for_provider_record(by_id.id).await? {
            game.provider_record_ids.insert(by_slug.id);
            store.save_game(&game).await?;
        }
        store.delete_provider_record(by_id.id).await?;
        deleted.insert(by_id.id);

        by_slug.metadata = by_id.metadata.clone();
        by_slug.slug = slug.to_string();
        by_slug.internal_id = internal_id;
        store.save_provider_record(&by_slug).await?;
        info!(target = "igdb", slug, internal_id, kept = by_slug.id, "folded IGDB duplicate");
        merged += 1;
    }

    Ok(JobReport::new().with("deduplicate_igdb_games_merged", merged))
}

/// Re-derives slug, internal id and update time of every IGDB game from its payload.
#[instrument(skip(store))]
pub async fn fix_igdb_games(store: &dyn CatalogStore) -> Result<JobReport> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let mut fixed = 0usize;
    let mut invalid = 0usize;

    for mut record in store.provider_records(provider.id, ResourceKind::Game).await? {
        let slug = record.payload_slug().map(str::to_string);
        let internal_id = record.meta_i64("id");
        let updated_at = record
            .meta_i64("updated_at")
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        let (Some(slug), Some(internal_id), Some(updated_at)) = (slug, internal_id, updated_at)
        else {
            warn!(target = "igdb", record_id = record.id, "payload lacks slug, id or updated_at");
            invalid += 1;
            continue;
        };
        if record.slug == slug
            && record.internal_id == internal_id
            && record.updated_at == Some(updated_at)
        {
            continue;
        }
        record.slug = slug;
        record.internal_id = internal_id;
        record.updated_at = Some(updated_at);
        store.save_provider_record(&record).await?;
        fixed += 1;
    }

    info!(target = "igdb", fixed, invalid, "IGDB game records fixed");
    Ok(JobReport::new()
        .with("fix_igdb_games_fixed", fixed)
        .with("fix_igdb_games_invalid", invalid))
}

/// Why [`remove_dlcs_from_games`] kept or removed a game, one counter per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlcCleanup {
    pub total: usize,
    pub skipped: usize,
    pub not_dlc: usize,
    pub unlinked: usize,
    pub with_installer: usize,
    pub user_owned: usize,
    pub removed: usize,
}

impl DlcCleanup {
    pub fn report(&self) -> JobReport {
        JobReport::new()
            .with("remove_dlcs_from_games_total", self.total)
            .with("remove_dlcs_from_games_skipped", self.skipped)
            .with("remove_dlcs_from_games_not_dlc", self.not_dlc)
            .with("remove_dlcs_from_games_unlinked", self.unlinked)
            .with("remove_dlcs_from_games_with_installer", self.with_installer)
            .with("remove_dlcs_from_games_user_owned", self.user_owned)
            .with("remove_dlcs_from_games_removed", self.removed)
    }
}

/// Deletes local games created from IGDB DLCs, expansions and bundles nobody uses.
#[instrument(skip(store))]
pub async fn remove_dlcs_from_games(store: &dyn CatalogStore) -> Result<DlcCleanup> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let mut stats = DlcCleanup::default();

    for record in store.provider_records(provider.id, ResourceKind::Game).await? {
        stats.total += 1;
        match record.category() {
            Some(GameCategory::MainGame) => {
                stats.skipped += 1;
                continue;
            }
            Some(GameCategory::DlcAddon | GameCategory::Bundle | GameCategory::Expansion) => {}
            _ => {
                stats.not_dlc += 1;
                continue;
            }
        }
        let Some(game) = store
            .games_for_provider_record(record.id)
            .await?
            .into_iter()
            .next()
        else {
            stats.unlinked += 1;
            continue;
        };
        if store.installer_count(game.id).await? > 0 {
            stats.with_installer += 1;
            continue;
        }
        if store.user_count(game.id).await? > 0 {
            stats.user_owned += 1;
            continue;
        }
        info!(target = "igdb", game = %game.slug, internal_id = record.internal_id, "removing DLC game");
        store.delete_game(game.id).await?;
        stats.removed += 1;
    }

    Ok(stats)
}
