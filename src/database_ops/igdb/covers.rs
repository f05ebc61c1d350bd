use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::client::CatalogSource;
use super::IGDB_PROVIDER;
use crate::database_ops::action_log::JobReport;
use crate::database_ops::media::{cover_relpath, MediaStore};
use crate::database_ops::models::ResourceKind;
use crate::database_ops::store::CatalogStore;

pub const COVER_FORMAT: &str = "cover_big";

/// Downloads IGDB cover art and attaches it to the matching local games.
///
/// `force` downloads again even when the file is already on disk or the game already
/// has artwork.
#[instrument(skip(store, source, media))]
pub async fn sync_igdb_coverart(
    store: &dyn CatalogStore,
    source: &dyn CatalogSource,
    media: &dyn MediaStore,
    force: bool,
) -> Result<JobReport> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let mut saved = 0usize;
    let mut skipped = 0usize;

    for cover in store.provider_records(provider.id, ResourceKind::Cover).await? {
        let Some(image_id) = cover.cover_image_id() else {
            warn!(target = "igdb", internal_id = cover.internal_id, "cover without image id");
            skipped += 1;
            continue;
        };
        let relpath = cover_relpath(COVER_FORMAT, image_id);
        if !force && media.exists(&relpath).await? {
            skipped += 1;
            continue;
        }
        let Some(igdb_game_id) = cover.cover_game_id() else {
            debug!(target = "igdb", image_id, "cover not attached to a game");
            skipped += 1;
            continue;
        };

        let candidates = store
            .provider_records_by_internal_id(provider.id, ResourceKind::Game, igdb_game_id)
            .await?;
        let Some(igdb_game) = candidates.iter().min_by_key(|r| r.id) else {
            debug!(target = "igdb", igdb_game_id, "no IGDB game for cover");
            skipped += 1;
            continue;
        };
        if candidates.len() > 1 {
            warn!(
                target = "igdb",
                igdb_game_id,
                count = candidates.len(),
                picked = igdb_game.id,
                "multiple games for cover"
            );
        }

        let games = store.games_for_provider_record(igdb_game.id).await?;
        let Some(mut game) = games.into_iter().next() else {
            warn!(target = "igdb", igdb_game_id, "no local game for IGDB game");
            skipped += 1;
            continue;
        };
        if game.coverart.is_some() && !force {
            skipped += 1;
            continue;
        }

        let data = source
            .fetch_image(image_id, COVER_FORMAT)
            .await
            .with_context(|| format!("downloading cover {image_id}"))?;
        media.write(&relpath, data).await?;
        game.coverart = Some(relpath);
        store.save_game(&game).await?;
        info!(target = "igdb", game = %game.slug, image_id, "saved cover");
        saved += 1;
    }

    Ok(JobReport::new()
        .with("sync_igdb_coverart_saved", saved)
        .with("sync_igdb_coverart_skipped", skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::igdb::ingest::tests::ScriptedSource;
    use crate::database_ops::media::MemoryMediaStore;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::models::{Game, ProviderPayload, ProviderRecord};
    use bytes::Bytes;
    use serde_json::{json, Value};

    async fn mirror(store: &MemoryStore, kind: ResourceKind, payload: Value) -> ProviderRecord {
        let provider = store.ensure_provider(IGDB_PROVIDER).await.unwrap();
        let payload = ProviderPayload::from_api(kind, &payload).unwrap();
        store
            .upsert_provider_record(provider.id, kind, &payload)
            .await
            .unwrap()
    }

    async fn seed(store: &MemoryStore, coverart: Option<&str>) -> Game {
        let record = mirror(
            store,
            ResourceKind::Game,
            json!({"id": 55, "slug": "half-life-2", "name": "Half-Life 2", "category": 0}),
        )
        .await;
        mirror(store, ResourceKind::Cover, json!({"id": 900, "image_id": "co1hl2", "game": 55})).await;
        mirror(store, ResourceKind::Cover, json!({"id": 901, "image_id": "co1zzz", "game": 4040})).await;
        let mut game = Game::new("Half-Life 2", "half-life-2");
        game.coverart = coverart.map(str::to_string);
        game.provider_record_ids.insert(record.id);
        store.insert_game(game)
    }

    #[tokio::test]
    async fn downloads_missing_covers() {
        let store = MemoryStore::new();
        let game = seed(&store, None).await;
        let source = ScriptedSource::new().image("co1hl2", b"jpeg-bytes");
        let media = MemoryMediaStore::new();

        let report = sync_igdb_coverart(&store, &source, &media, false).await.unwrap();
        assert_eq!(report.count("sync_igdb_coverart_saved"), 1);
        assert_eq!(
            media.get("cover_big/co1hl2.jpg"),
            Some(Bytes::from_static(b"jpeg-bytes"))
        );
        assert_eq!(
            store.game(game.id).unwrap().coverart.as_deref(),
            Some("cover_big/co1hl2.jpg")
        );

        // file now exists, nothing to do
        let again = sync_igdb_coverart(&store, &source, &media, false).await.unwrap();
        assert_eq!(again.count("sync_igdb_coverart_saved"), 0);
    }

    #[tokio::test]
    async fn existing_artwork_needs_force() {
        let store = MemoryStore::new();
        let game = seed(&store, Some("custom/hl2.png")).await;
        let source = ScriptedSource::new().image("co1hl2", b"new");
        let media = MemoryMediaStore::new();

        let report = sync_igdb_coverart(&store, &source, &media, false).await.unwrap();
        assert_eq!(report.count("sync_igdb_coverart_saved"), 0);
        assert_eq!(store.game(game.id).unwrap().coverart.as_deref(), Some("custom/hl2.png"));

        let forced = sync_igdb_coverart(&store, &source, &media, true).await.unwrap();
        assert_eq!(forced.count("sync_igdb_coverart_saved"), 1);
        assert_eq!(
            store.game(game.id).unwrap().coverart.as_deref(),
            Some("cover_big/co1hl2.jpg")
        );
    }

    #[tokio::test]
    async fn shared_internal_id_picks_the_oldest_record() {
        let store = MemoryStore::new();
        let first = seed(&store, None).await;
        let mut twin = mirror(
            &store,
            ResourceKind::Game,
            json!({"id": 56, "slug": "half-life-2-update", "name": "Half-Life 2: Update", "category": 0}),
        )
        .await;
        twin.internal_id = 55;
        store.save_provider_record(&twin).await.unwrap();
        let mut other = Game::new("Half-Life 2: Update", "half-life-2-update");
        other.provider_record_ids.insert(twin.id);
        let other = store.insert_game(other);

        let source = ScriptedSource::new().image("co1hl2", b"jpeg");
        let media = MemoryMediaStore::new();
        let report = sync_igdb_coverart(&store, &source, &media, false).await.unwrap();
        assert_eq!(report.count("sync_igdb_coverart_saved"), 1);
        assert_eq!(
            store.game(first.id).unwrap().coverart.as_deref(),
            Some("cover_big/co1hl2.jpg")
        );
        assert_eq!(store.game(other.id).unwrap().coverart, None);
    }

    #[tokio::test]
    async fn download_failure_aborts() {
        let store = MemoryStore::new();
        seed(&store, None).await;
        let source = ScriptedSource::new();
        let media = MemoryMediaStore::new();
        assert!(sync_igdb_coverart(&store, &source, &media, false).await.is_err());
    }
}
