use anyhow::Result;
use tracing::{debug, info, instrument};

use super::IGDB_PROVIDER;
use crate::database_ops::action_log::JobReport;
use crate::database_ops::store::CatalogStore;
use crate::normalization::slug::igdb_slugify;

/// IGDB turns apostrophes into dashes where local slugs drop them, so "Amy's Diner" exists
/// both as `amys-diner` and `amy-s-diner`. Folds each unlinked local copy into the
/// IGDB-linked game.
#[instrument(skip(store))]
pub async fn deduplicate_lutris_games(store: &dyn CatalogStore) -> Result<JobReport> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let mut merged = 0usize;

    for game in store.apostrophe_games_without_provider(provider.id).await? {
        let igdb_slug = igdb_slugify(&game.name);
        if igdb_slug == game.slug {
            continue;
        }
        let Some(survivor) = store
            .provider_linked_game_by_slug(provider.id, &igdb_slug)
            .await?
        else {
            debug!(target = "igdb", slug = %game.slug, %igdb_slug, "no IGDB twin");
            continue;
        };
        info!(
            target = "igdb",
            duplicate = %game.slug,
            survivor = %survivor.slug,
            "merging duplicate game"
        );
        store.merge_games(game.id, survivor.id).await?;
        merged += 1;
    }

    Ok(JobReport::new().with("deduplicate_lutris_games_merged", merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::models::{Game, Installer, ProviderPayload, ResourceKind};
    use serde_json::json;

    async fn igdb_linked_game(store: &MemoryStore, name: &str, slug: &str) -> Game {
        let provider = store.ensure_provider(IGDB_PROVIDER).await.unwrap();
        let payload = ProviderPayload::from_api(
            ResourceKind::Game,
            &json!({"id": 900, "slug": slug, "name": name, "category": 0}),
        )
        .unwrap();
        let record = store
            .upsert_provider_record(provider.id, ResourceKind::Game, &payload)
            .await
            .unwrap();
        let mut game = Game::new(name, slug);
        game.provider_record_ids.insert(record.id);
        store.insert_game(game)
    }

    #[tokio::test]
    async fn apostrophe_duplicate_is_merged_into_igdb_game() {
        let store = MemoryStore::new();
        let survivor = igdb_linked_game(&store, "Amy's Diner", "amy-s-diner").await;
        let mut local = Game::new("Amy's Diner", "amys-diner");
        local.year = Some(2011);
        let local = store.insert_game(local);
        store.insert_installer(Installer {
            id: 0,
            game_id: local.id,
            slug: "amys-diner-linux".into(),
            runner: "linux".into(),
            version: "Humble".into(),
            description: None,
            notes: String::new(),
            content: "exe: diner".into(),
            published: true,
        });
        store.add_library_entry(7, local.id);

        let report = deduplicate_lutris_games(&store).await.unwrap();
        assert_eq!(report.count("deduplicate_lutris_games_merged"), 1);

        let st = store.state();
        assert_eq!(st.games.len(), 1);
        let kept = &st.games[&survivor.id];
        assert_eq!(kept.year, Some(2011));
        assert!(st.installers.values().all(|i| i.game_id == survivor.id));
        assert!(st.library.contains(&(7, survivor.id)));
    }

    #[tokio::test]
    async fn pending_edits_and_unmatched_names_are_left_alone() {
        let store = MemoryStore::new();
        igdb_linked_game(&store, "Amy's Diner", "amy-s-diner").await;
        let mut edit = Game::new("Amy's Diner", "amys-diner-edit");
        edit.change_for = Some(1);
        store.insert_game(edit);
        store.insert_game(Game::new("Baldur's Gate", "baldurs-gate"));

        let report = deduplicate_lutris_games(&store).await.unwrap();
        assert_eq!(report.count("deduplicate_lutris_games_merged"), 0);
        assert_eq!(store.state().games.len(), 3);
    }
}
