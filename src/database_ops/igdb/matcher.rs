//! Links mirrored IGDB entities to local games and platforms.

use anyhow::Result;
use chrono::{DateTime, Datelike};
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

use super::IGDB_PROVIDER;
use crate::database_ops::action_log::JobReport;
use crate::database_ops::models::{GameCategory, ProviderRecord, ResourceKind};
use crate::database_ops::store::CatalogStore;

fn release_year(record: &ProviderRecord) -> Option<i32> {
    record
        .meta_i64("first_release_date")
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.year())
}

fn summary(record: &ProviderRecord) -> Option<&str> {
    record.meta_str("summary").filter(|s| !s.trim().is_empty())
}

/// Create or update local games from IGDB main games that are not linked yet.
#[instrument(skip(store))]
pub async fn match_igdb_games(store: &dyn CatalogStore) -> Result<JobReport> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let platforms: HashMap<i64, i64> = store
        .platforms_with_igdb_id()
        .await?
        .into_iter()
        .filter_map(|p| p.igdb_id.map(|igdb_id| (igdb_id, p.id)))
        .collect();

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut missing_slug = 0usize;
    let mut missing_platforms = 0usize;

    for record in store.provider_records(provider.id, ResourceKind::Game).await? {
        if record.category() != Some(GameCategory::MainGame) {
            continue;
        }
        if !store.games_for_provider_record(record.id).await?.is_empty() {
            debug!(target = "igdb", internal_id = record.internal_id, "already matched");
            continue;
        }
        let Some(slug) = record.payload_slug() else {
            error!(target = "igdb", metadata = %record.metadata, "missing slug");
            missing_slug += 1;
            continue;
        };

        let mut game = match store.game_by_slug(slug).await? {
            Some(game) => {
                info!(target = "igdb", name = %record.name, slug, "updating local game");
                updated += 1;
                game
            }
            None => {
                info!(target = "igdb", name = %record.name, slug, "creating local game");
                let name = if record.name.trim().is_empty() { slug } else { record.name.as_str() };
                created += 1;
                store.create_game(name, slug).await?
            }
        };

        if game.year.is_none() {
            game.year = release_year(&record);
        }
        if game.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
            if let Some(text) = summary(&record) {
                game.description = Some(text.to_string());
            }
        }
        for igdb_platform in record.platform_ids() {
            match platforms.get(&igdb_platform) {
                Some(platform_id) => {
                    game.platform_ids.insert(*platform_id);
                }
                None => {
                    warn!(target = "igdb", igdb_platform, "no platform with this IGDB id");
                    missing_platforms += 1;
                }
            }
        }
        game.provider_record_ids.insert(record.id);
        game.is_public = true;
        store.save_game(&game).await?;
    }

    info!(target = "igdb", created, updated, missing_slug, "IGDB game matching finished");
    Ok(JobReport::new()
        .with("match_igdb_games_created", created)
        .with("match_igdb_games_updated", updated)
        .with("match_igdb_games_missing_slug", missing_slug)
        .with("match_igdb_games_missing_platforms", missing_platforms))
}

/// Get-or-create a local platform for every IGDB platform and record its IGDB id.
#[instrument(skip(store))]
pub async fn sync_igdb_platforms(store: &dyn CatalogStore) -> Result<JobReport> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let mut created = 0usize;
    let mut linked = 0usize;

    for record in store.provider_records(provider.id, ResourceKind::Platform).await? {
        let Some(slug) = record.payload_slug() else {
            warn!(target = "igdb", internal_id = record.internal_id, "platform without slug");
            continue;
        };
        let mut platform = match store.platform_by_slug(slug).await? {
            Some(platform) => platform,
            None => {
                created += 1;
                store.create_platform(&record.name, slug).await?
            }
        };
        if platform.igdb_id != Some(record.internal_id) {
            platform.igdb_id = Some(record.internal_id);
            store.save_platform(&platform).await?;
        }
        linked += 1;
    }

    info!(target = "igdb", created, linked, "IGDB platform sync finished");
    Ok(JobReport::new()
        .with("sync_igdb_platforms_created", created)
        .with("sync_igdb_platforms_linked", linked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::models::{Game, ProviderPayload};
    use serde_json::{json, Value};

    async fn mirror(store: &MemoryStore, kind: ResourceKind, payload: Value) -> ProviderRecord {
        let provider = store.ensure_provider(IGDB_PROVIDER).await.unwrap();
        let payload = ProviderPayload::from_api(kind, &payload).unwrap();
        store
            .upsert_provider_record(provider.id, kind, &payload)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_game_linked_to_platform_and_record() {
        let store = MemoryStore::new();
        let pc = store.insert_platform("Windows", "windows", Some(6));
        let record = mirror(
            &store,
            ResourceKind::Game,
            json!({"id": 55, "slug": "half-life-2", "name": "Half-Life 2", "category": 0,
                   "platforms": [6], "first_release_date": 1100563200}),
        )
        .await;

        let report = match_igdb_games(&store).await.unwrap();
        assert_eq!(report.count("match_igdb_games_created"), 1);

        let game = store.game_by_slug("half-life-2").await.unwrap().unwrap();
        assert_eq!(game.name, "Half-Life 2");
        assert!(game.platform_ids.contains(&pc.id));
        assert!(game.provider_record_ids.contains(&record.id));
        assert!(game.is_public);
        assert_eq!(game.year, Some(2004));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = MemoryStore::new();
        mirror(
            &store,
            ResourceKind::Game,
            json!({"id": 55, "slug": "half-life-2", "name": "Half-Life 2", "category": 0}),
        )
        .await;
        match_igdb_games(&store).await.unwrap();
        let games = store.state().games.clone();

        let again = match_igdb_games(&store).await.unwrap();
        assert_eq!(again.count("match_igdb_games_created"), 0);
        assert_eq!(again.count("match_igdb_games_updated"), 0);
        assert_eq!(store.state().games, games);
    }

    #[tokio::test]
    async fn existing_game_keeps_its_fields() {
        let store = MemoryStore::new();
        let mut local = Game::new("Portal", "portal");
        local.description = Some("Hand written".into());
        let local = store.insert_game(local);
        mirror(
            &store,
            ResourceKind::Game,
            json!({"id": 71, "slug": "portal", "name": "Portal", "category": 0,
                   "summary": "From IGDB", "first_release_date": 1192579200, "platforms": [99]}),
        )
        .await;

        let report = match_igdb_games(&store).await.unwrap();
        assert_eq!(report.count("match_igdb_games_updated"), 1);
        assert_eq!(report.count("match_igdb_games_missing_platforms"), 1);
        let game = store.game(local.id).unwrap();
        assert_eq!(game.description.as_deref(), Some("Hand written"));
        assert_eq!(game.year, Some(2007));
        assert!(game.platform_ids.is_empty());
    }

    #[tokio::test]
    async fn empty_fields_are_filled_from_igdb() {
        let store = MemoryStore::new();
        let mut local = Game::new("Portal 2", "portal-2");
        local.description = Some("  ".into());
        local.year = Some(2010);
        let local = store.insert_game(local);
        mirror(
            &store,
            ResourceKind::Game,
            json!({"id": 72, "slug": "portal-2", "name": "Portal 2", "category": 0,
                   "summary": "Sequel to Portal", "first_release_date": 1303171200}),
        )
        .await;

        let report = match_igdb_games(&store).await.unwrap();
        assert_eq!(report.count("match_igdb_games_updated"), 1);
        let game = store.game(local.id).unwrap();
        assert_eq!(game.description.as_deref(), Some("Sequel to Portal"));
        assert_eq!(game.year, Some(2010));
    }

    #[tokio::test]
    async fn skips_dlcs_and_slugless_records() {
        let store = MemoryStore::new();
        mirror(
            &store,
            ResourceKind::Game,
            json!({"id": 1, "slug": "hl2-ep1", "name": "Episode One", "category": 1}),
        )
        .await;
        mirror(&store, ResourceKind::Game, json!({"id": 2, "slug": "", "name": "???", "category": 0}))
            .await;

        let report = match_igdb_games(&store).await.unwrap();
        assert_eq!(report.count("match_igdb_games_missing_slug"), 1);
        assert!(store.state().games.is_empty());
    }

    #[tokio::test]
    async fn platforms_get_their_igdb_ids() {
        let store = MemoryStore::new();
        let existing = store.insert_platform("Linux", "linux", None);
        mirror(&store, ResourceKind::Platform, json!({"id": 3, "slug": "linux", "name": "Linux"}))
            .await;
        mirror(&store, ResourceKind::Platform, json!({"id": 130, "slug": "switch", "name": "Nintendo Switch"}))
            .await;

        let report = sync_igdb_platforms(&store).await.unwrap();
        assert_eq!(report.count("sync_igdb_platforms_created"), 1);
        assert_eq!(report.count("sync_igdb_platforms_linked"), 2);

        let linux = store.platform_by_slug("linux").await.unwrap().unwrap();
        assert_eq!(linux.id, existing.id);
        assert_eq!(linux.igdb_id, Some(3));
        let switch = store.platform_by_slug("switch").await.unwrap().unwrap();
        assert_eq!(switch.name, "Nintendo Switch");
        assert_eq!(switch.igdb_id, Some(130));
    }
}
